//! Runtime adapters: HTTP surfaces, spawner and background maintenance.

pub mod api;
pub mod http;
pub mod maintenance;
pub mod management_http;
pub mod tokio_spawner;

pub use maintenance::{run_maintenance_pass, spawn_maintenance, MaintenanceHandle, MaintenanceReport};
pub use tokio_spawner::{Spawn, TokioSpawner};
