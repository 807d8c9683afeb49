//! Request token generation.

use uuid::Uuid;

/// Suffix appended by [`TokenGenerator::derive`].
pub const RENEWED_TOKEN_SUFFIX: &str = "_new";

/// Produces request tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGenerator;

impl TokenGenerator {
    /// Create a generator.
    pub const fn new() -> Self {
        Self
    }

    /// A fresh random token (UUID v4, hyphen-free).
    pub fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Deterministic renewed token for a known seed.
    pub fn derive(&self, seed: &str) -> String {
        format!("{seed}{RENEWED_TOKEN_SUFFIX}")
    }
}
