//! Tests for `src/logging.rs`.

use ferry::logging::{LoggingGuard, DEFAULT_FILTER};
use tracing_subscriber::EnvFilter;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn default_filter_parses() {
    assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // Only test in this binary that installs a global subscriber.
    let _guard = ferry::logging::init_production(&logs_dir).expect("init");
    assert!(logs_dir.exists(), "logs directory should be created");
}
