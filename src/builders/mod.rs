//! Builders to construct broker components from configuration.

pub mod engine_builder;

pub use engine_builder::{build_manager, open_store};
