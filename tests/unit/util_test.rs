//! Tests for utility functions

use qrm_broker::core::TokenGenerator;
use qrm_broker::util::now_ms;

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(a > 0);
    assert!(b >= a);
}

#[test]
fn test_generated_tokens_are_unique() {
    let tokens = TokenGenerator::new();
    let a = tokens.generate();
    let b = tokens.generate();
    assert_ne!(a, b);
    assert_eq!(a.len(), 32);
}

#[test]
fn test_derived_token() {
    assert_eq!(TokenGenerator::new().derive("token1234"), "token1234_new");
}

#[test]
fn test_init_tracing_is_idempotent() {
    qrm_broker::util::init_tracing();
    qrm_broker::util::init_tracing();
}
