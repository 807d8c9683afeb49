//! Resource, request and response records shared by the engine and both HTTP surfaces.
//!
//! Field names are part of the wire format and must not be renamed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Allocation status of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Available for matching.
    #[default]
    Free,
    /// Held by exactly one active request.
    Allocated,
    /// Taken out of rotation by an operator; never matched.
    Disabled,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Allocated => write!(f, "allocated"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Broker-wide status flag stored as the `broker_status` scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Requests are matched as resources become free.
    #[default]
    Active,
    /// Requests are accepted and queued but nothing is matched.
    Disabled,
}

impl ServerStatus {
    /// Scalar representation written to the store.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Parse the stored scalar; anything unrecognised counts as disabled.
    pub fn from_scalar(raw: &str) -> Self {
        if raw == "active" {
            Self::Active
        } else {
            Self::Disabled
        }
    }
}

/// A named, typed unit of shared capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique name (primary key).
    pub name: String,
    /// Category used for matching.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Allocation status.
    #[serde(default)]
    pub status: ResourceStatus,
    /// Job attached by the management plane while allocated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_job: Option<String>,
    /// Token of the request holding this resource while allocated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Resource {
    /// A free resource of the given type.
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            status: ResourceStatus::Free,
            assigned_job: None,
            token: None,
        }
    }

    /// Whether the matcher may hand this resource out.
    pub fn is_free(&self) -> bool {
        self.status == ResourceStatus::Free
    }

    /// Whether `token` currently holds this resource.
    pub fn is_held_by(&self, token: &str) -> bool {
        self.status == ResourceStatus::Allocated && self.token.as_deref() == Some(token)
    }

    /// Mark allocated to `token` with no job yet.
    pub fn allocate(&mut self, token: &str) {
        self.status = ResourceStatus::Allocated;
        self.token = Some(token.to_string());
        self.assigned_job = None;
    }

    /// Return to the pool as free.
    pub fn release(&mut self) {
        self.status = ResourceStatus::Free;
        self.token = None;
        self.assigned_job = None;
    }
}

fn default_count() -> usize {
    1
}

/// One element of a request: an exact resource name, or a type and a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceSpec {
    /// A specific resource by name.
    ByName {
        /// Resource name.
        name: String,
    },
    /// Any `count` free resources of a type.
    ByType {
        /// Resource type.
        #[serde(rename = "type")]
        resource_type: String,
        /// Number of resources wanted.
        #[serde(default = "default_count")]
        count: usize,
    },
}

impl ResourceSpec {
    /// Spec for a named resource.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self::ByName { name: name.into() }
    }

    /// Spec for `count` resources of a type.
    pub fn by_type(resource_type: impl Into<String>, count: usize) -> Self {
        Self::ByType {
            resource_type: resource_type.into(),
            count,
        }
    }
}

/// A client's submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourcesRequest {
    /// Assigned by the engine; client-supplied values are overwritten.
    #[serde(default)]
    pub token: String,
    /// What the client needs, in order.
    #[serde(default)]
    pub requested_resources: Vec<ResourceSpec>,
    /// Client identifier for diagnostics.
    #[serde(default)]
    pub requestor: String,
}

impl ResourcesRequest {
    /// Build a request for the given specs.
    pub fn new(requestor: impl Into<String>, requested_resources: Vec<ResourceSpec>) -> Self {
        Self {
            token: String::new(),
            requested_resources,
            requestor: requestor.into(),
        }
    }
}

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for resources.
    #[default]
    Pending,
    /// Resources granted.
    Active,
    /// Resources granted and every one carries a job.
    Filled,
    /// Cancelled by the client.
    Cancelled,
    /// Terminated because a held resource was force-released.
    Error,
}

impl RequestStatus {
    /// `cancelled` and `error` never change again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Error)
    }

    /// Whether the request currently holds resources.
    pub const fn holds_resources(self) -> bool {
        matches!(self, Self::Active | Self::Filled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The externally visible projection of a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourcesRequestResponse {
    /// Token of the originating request.
    pub token: String,
    /// Current status.
    #[serde(default)]
    pub status: RequestStatus,
    /// Names of the granted resources, only while active or filled.
    #[serde(default)]
    pub assigned_resources: Vec<String>,
}

impl ResourcesRequestResponse {
    /// A fresh pending response.
    pub fn pending(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            status: RequestStatus::Pending,
            assigned_resources: Vec::new(),
        }
    }
}
