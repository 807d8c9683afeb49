//! # QRM Broker
//!
//! A queue resource manager that arbitrates a pool of shared, named, typed
//! resources (lab servers, devices, licenses) among competing clients.
//!
//! Clients submit requests for specific resources by name or for a number of
//! resources of a type. Each request is assigned a token and is granted all at
//! once or queued until enough matching resources are free. When resources are
//! released, waiting requests are re-matched in submission order.
//!
//! ## Layout
//!
//! - [`core`]: records, the store contract, the ledger and the [`core::QueueManager`] engine
//! - [`infra`]: store backends (in-memory and an append-only JSON-lines file)
//! - [`config`] and [`builders`]: configuration and construction of the engine
//! - [`runtime`]: the client and management HTTP surfaces and background maintenance
//!
//! ```rust,ignore
//! use qrm_broker::core::{EngineLimits, QrmIfc, QueueManager, Resource, ResourceSpec, ResourcesRequest};
//! use qrm_broker::infra::InMemoryStore;
//!
//! let manager = QueueManager::new(InMemoryStore::new(), EngineLimits::default());
//! manager.add_resources(vec![Resource::new("res1", "server")])?;
//!
//! let response = manager
//!     .new_request(ResourcesRequest::new("me", vec![ResourceSpec::by_type("server", 1)]))
//!     .await?;
//! assert_eq!(response.assigned_resources, vec!["res1"]);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core broker abstractions: records, ledger, store contract and engine.
pub mod core;
/// Configuration models for the broker and its store backend.
pub mod config;
/// Builders to construct the engine from configuration.
pub mod builders;
/// Infrastructure adapters for storage backends.
pub mod infra;
/// Runtime adapters: HTTP surfaces, spawner and maintenance loop.
pub mod runtime;
/// Shared utilities.
pub mod util;
