use std::{fs, thread::sleep, time::Duration};

use serial_test::serial;
use tempfile::tempdir;

// The global subscriber can only be installed once per process, so the file
// case has to be the first initialisation.
#[test]
#[serial]
fn writes_log_file_and_ignores_reinit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs").join("dashboard.log");

    results_dashboard::logging::init(true, Some(path.clone()));
    tracing::info!("layout store ready");

    sleep(Duration::from_millis(100));

    assert!(path.exists(), "log file was not created");
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("layout store ready"));

    let other = dir.path().join("other.log");
    results_dashboard::logging::init(false, Some(other.clone()));
    tracing::info!("second init");
    sleep(Duration::from_millis(100));
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("second init"));
}
