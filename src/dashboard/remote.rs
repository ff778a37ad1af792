//! Remote persistence of a user's layout set.
//!
//! The server stores the layout list as an opaque JSON string next to the
//! active layout id; encoding and decoding that string is the store's job.

use crate::dashboard::error::ApiError;
use crate::dashboard::http::ApiClient;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserConfigPayload {
    #[serde(default)]
    pub layouts: String,
    #[serde(default)]
    pub active_layout_id: String,
}

impl UserConfigPayload {
    pub fn active_id(&self) -> Option<&str> {
        Some(self.active_layout_id.as_str()).filter(|id| !id.is_empty())
    }
}

#[derive(Serialize)]
struct ActiveLayoutBody<'a> {
    active_layout_id: &'a str,
}

#[async_trait]
pub trait RemoteLayoutApi: Send + Sync {
    /// `Ok(None)` means the user has no stored configuration yet.
    async fn fetch_layouts(&self, user: UserId) -> Result<Option<UserConfigPayload>, ApiError>;

    /// Persist the whole set. Returns the server's echo when it sent one.
    async fn save_layouts(
        &self,
        user: UserId,
        payload: &UserConfigPayload,
    ) -> Result<Option<UserConfigPayload>, ApiError>;

    async fn save_active_layout_id(&self, user: UserId, layout_id: &str) -> Result<(), ApiError>;
}

pub struct HttpLayoutApi {
    client: ApiClient,
}

impl HttpLayoutApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn config_path(user: UserId) -> String {
        format!("/users/{user}/config")
    }
}

#[async_trait]
impl RemoteLayoutApi for HttpLayoutApi {
    async fn fetch_layouts(&self, user: UserId) -> Result<Option<UserConfigPayload>, ApiError> {
        let never = tokio_util::sync::CancellationToken::new();
        match self
            .client
            .get_json::<UserConfigPayload>(&Self::config_path(user), &[], &never)
            .await
        {
            Ok(payload) => Ok(Some(payload)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save_layouts(
        &self,
        user: UserId,
        payload: &UserConfigPayload,
    ) -> Result<Option<UserConfigPayload>, ApiError> {
        let path = Self::config_path(user);
        match self.client.send_json(Method::PUT, &path, payload).await {
            Ok(echo) => Ok(Some(echo)),
            Err(ApiError::NotFound(_)) => {
                tracing::info!(user, "no stored config; creating one");
                self.client
                    .send_json(Method::POST, &path, payload)
                    .await
                    .map(Some)
            }
            Err(ApiError::Decode(e)) => {
                tracing::debug!(user, "save response not decodable: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn save_active_layout_id(&self, user: UserId, layout_id: &str) -> Result<(), ApiError> {
        let body = ActiveLayoutBody {
            active_layout_id: layout_id,
        };
        self.client
            .send(Method::PUT, &Self::config_path(user), &body)
            .await
    }
}
