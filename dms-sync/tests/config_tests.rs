use dms_sync::{SyncConfig, SyncError};

// --- Config ---

#[test]
fn default_interval_is_five_minutes() {
    assert_eq!(SyncConfig::default().sync_interval_secs, 300);
}

#[test]
fn default_retry_budget() {
    let config = SyncConfig::default();
    assert_eq!(config.max_retry_attempts, 3);
    assert_eq!(config.item_timeout_secs, 30);
}

#[test]
fn partial_json_keeps_defaults() {
    let config: SyncConfig =
        serde_json::from_str(r#"{ "api_base_url": "http://localhost:3002" }"#).unwrap();
    assert_eq!(config.api_base_url, "http://localhost:3002");
    assert_eq!(config.sync_interval_secs, 300);
    assert_eq!(config.purge_synced_after_days, 90);
}

#[test]
fn serialization_roundtrip() {
    let config = SyncConfig {
        retry_backoff_secs: 5,
        ..Default::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: SyncConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

// --- Errors ---

#[test]
fn timeout_display() {
    assert_eq!(SyncError::Timeout(30).to_string(), "delivery timed out after 30s");
}

#[test]
fn rejected_display() {
    let err = SyncError::Rejected {
        status: 422,
        body: "bad voucher".into(),
    };
    assert_eq!(err.to_string(), "rejected by server (422): bad voucher");
    assert!(!err.is_transient());
}

#[test]
fn exhausted_budget_is_permanent() {
    let err = SyncError::RetryBudgetExhausted { attempts: 3 };
    assert_eq!(err.to_string(), "retry budget exhausted after 3 attempts");
    assert!(!err.is_transient());
}

#[test]
fn transient_kinds() {
    assert!(SyncError::Transient("503".into()).is_transient());
    assert!(SyncError::Timeout(1).is_transient());
    assert!(SyncError::AuthFailed("401".into()).is_transient());
    assert!(!SyncError::AuthRequired.is_transient());
}
