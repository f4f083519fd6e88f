//! Compute resources the bundled task types act on.
//!
//! Only the fields the task handlers read or write are modelled; everything
//! else about a resource lives behind [`ComputeRepository`](super::ComputeRepository).

use crate::models::SubjectRef;
use serde::{Deserialize, Serialize};

pub const DISK_INIT: &str = "init";
pub const DISK_READY: &str = "ready";
pub const DISK_DEALLOC: &str = "deallocating";
pub const DISK_DEALLOC_FAILED: &str = "dealloc_failed";

pub const GUEST_DELETING: &str = "deleting";
pub const GUEST_DELETE_FAILED: &str = "delete_failed";

pub const EIP_STATUS_READY: &str = "ready";

pub const LB_STATUS_DELETING: &str = "deleting";
pub const LB_STATUS_DELETE_FAILED: &str = "delete_failed";

/// Ops-log action names written by compute tasks
pub mod actions {
    pub const ACT_DELOCATE: &str = "delocate";
    pub const ACT_DELOCATING: &str = "delocating";
    pub const ACT_DELOCATE_FAIL: &str = "delocate_fail";
    pub const ACT_PENDING_DELETE: &str = "pending_delete";
    pub const ACT_DETACH_DISK: &str = "detach_disk";
    pub const ACT_DELETE: &str = "delete";
    pub const ACT_CHANGE_BANDWIDTH: &str = "change_bandwidth";
}

pub const KIND_DISK: &str = "disk";
pub const KIND_GUEST: &str = "guest";
pub const KIND_ELASTICIP: &str = "elasticip";
pub const KIND_LB_CERTIFICATE: &str = "cachedloadbalancercertificate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Host driver key, e.g. `kvm`, `esxi`
    pub host_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub status: String,
    pub size_mb: i64,
    /// Master host of the disk's storage
    pub host_id: Option<String>,
    /// Guests the disk is attached to
    pub guest_ids: Vec<String>,
    pub pending_deleted: bool,
}

impl Disk {
    pub fn guest_count(&self) -> usize {
        self.guest_ids.len()
    }

    pub fn short_desc(&self) -> String {
        format!("{} ({} MB, {})", self.name, self.size_mb, self.status)
    }

    pub fn subject(&self) -> SubjectRef {
        SubjectRef::new(KIND_DISK, &self.id).with_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: String,
    pub name: String,
    pub status: String,
    pub host_id: Option<String>,
    pub disk_ids: Vec<String>,
}

impl Guest {
    pub fn subject(&self) -> SubjectRef {
        SubjectRef::new(KIND_GUEST, &self.id).with_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elasticip {
    pub id: String,
    pub name: String,
    pub status: String,
    pub bandwidth: i64,
    /// Region driver key; `None` for on-premise EIPs with no cloud counterpart
    pub provider: Option<String>,
}

impl Elasticip {
    pub fn is_managed(&self) -> bool {
        self.provider.is_some()
    }

    pub fn subject(&self) -> SubjectRef {
        SubjectRef::new(KIND_ELASTICIP, &self.id).with_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadbalancerCertificate {
    pub id: String,
    pub name: String,
    pub status: String,
    pub region_id: Option<String>,
    /// Region driver key
    pub provider: String,
}

impl LoadbalancerCertificate {
    pub fn short_desc(&self) -> String {
        format!("{} ({})", self.name, self.provider)
    }

    pub fn subject(&self) -> SubjectRef {
        SubjectRef::new(KIND_LB_CERTIFICATE, &self.id).with_name(&self.name)
    }
}
