//! Core broker abstractions: records, tokens, ledger, store contract and the engine.

pub mod audit;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod management;
pub mod resource;
pub mod store;
pub mod token;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use engine::{EngineLimits, QrmIfc, QueueManager};
pub use error::{AppResult, QrmError};
pub use ledger::LedgerEntry;
pub use management::{BrokerSnapshot, RecoveryReport};
pub use resource::{
    RequestStatus, Resource, ResourceSpec, ResourceStatus, ResourcesRequest,
    ResourcesRequestResponse, ServerStatus,
};
pub use store::{KvStore, RecordStore, WriteBatch};
pub use token::TokenGenerator;
