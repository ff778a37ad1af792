use crate::dashboard::error::ApiError;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Thin JSON client shared by the layout and data collaborators.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("results-dashboard")
            .build()?;
        let base_url = Url::parse(base_url.trim_end_matches('/'))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` below the base URL, keeping the base path prefix
    /// (`http://host/api` + `/builds` becomes `http://host/api/builds`).
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ApiError::Network(format!("invalid url {joined}: {e}")))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let request = self.client.get(url).query(query);
        cancellable(cancel, Self::execute(request)).await
    }

    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let request = self.client.request(method, url).json(body);
        Self::execute(request).await
    }

    /// Send a request whose response body is ignored.
    pub async fn send(&self, method: Method, path: &str, body: &impl Serialize) -> Result<(), ApiError> {
        let url = self.endpoint(path)?;
        let resp = self.client.request(method, url).json(body).send().await?;
        check_status(resp).await.map(|_| ())
    }

    async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let resp = request.send().await?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(url));
    }
    Err(ApiError::Status {
        status: status.as_u16(),
        url,
    })
}

/// Race `fut` against `cancel`; cancellation wins ties.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        result = fut => result,
    }
}
