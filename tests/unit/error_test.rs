//! Tests for error types

use qrm_broker::core::QrmError;

#[test]
fn test_invalid_request_error() {
    let err = QrmError::InvalidRequest("no resource of type `gpu` in the pool".to_string());
    assert_eq!(
        format!("{err}"),
        "invalid request: no resource of type `gpu` in the pool"
    );
}

#[test]
fn test_token_not_found_error() {
    let err = QrmError::TokenNotFound("abc".to_string());
    assert_eq!(format!("{err}"), "token not found: abc");
}

#[test]
fn test_store_unavailable_is_retryable() {
    assert!(QrmError::StoreUnavailable("timeout".into()).is_retryable());
    assert!(!QrmError::InvalidRequest("bad".into()).is_retryable());
    assert!(!QrmError::ConflictDuringMatch("bug".into()).is_retryable());
    assert!(!QrmError::ResourceBusy("res1".into()).is_retryable());
}

#[test]
fn test_codec_error_maps_to_internal() {
    let codec = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: QrmError = codec.into();
    assert!(matches!(err, QrmError::Internal(_)));
}

#[test]
fn test_error_converts_to_anyhow() {
    fn fails() -> qrm_broker::core::AppResult<()> {
        Err(QrmError::ResourceNotFound("res9".into()))?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert_eq!(err.to_string(), "resource not found: res9");
    assert!(err.downcast_ref::<QrmError>().is_some());
}
