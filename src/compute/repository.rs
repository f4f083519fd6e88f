//! Persistence seam for compute resources.

use super::models::{Disk, Elasticip, Guest, Host, LoadbalancerCertificate};
use crate::orchestration::DriverError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid state for {kind} {id}: {reason}")]
    InvalidState {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("Compute backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ComputeError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;

/// Resource reads and writes the compute task types need
#[async_trait]
pub trait ComputeRepository: Send + Sync {
    async fn get_host(&self, id: &str) -> ComputeResult<Host>;

    async fn get_disk(&self, id: &str) -> ComputeResult<Disk>;
    async fn set_disk_status(&self, id: &str, status: &str, reason: &str) -> ComputeResult<()>;
    /// Move the disk to the recycle bin instead of deleting it
    async fn pending_delete_disk(&self, id: &str) -> ComputeResult<()>;
    async fn real_delete_disk(&self, id: &str) -> ComputeResult<()>;

    async fn get_guest(&self, id: &str) -> ComputeResult<Guest>;
    async fn set_guest_status(&self, id: &str, status: &str, reason: &str) -> ComputeResult<()>;
    async fn detach_disk(&self, guest_id: &str, disk_id: &str) -> ComputeResult<()>;
    async fn real_delete_guest(&self, id: &str) -> ComputeResult<()>;

    async fn get_elasticip(&self, id: &str) -> ComputeResult<Elasticip>;
    async fn set_elasticip_status(&self, id: &str, status: &str, reason: &str)
        -> ComputeResult<()>;
    /// Record the new bandwidth locally
    async fn set_elasticip_bandwidth(&self, id: &str, bandwidth: i64) -> ComputeResult<()>;

    async fn get_certificate(&self, id: &str) -> ComputeResult<LoadbalancerCertificate>;
    async fn set_certificate_status(
        &self,
        id: &str,
        status: &str,
        reason: &str,
    ) -> ComputeResult<()>;
    async fn real_delete_certificate(&self, id: &str) -> ComputeResult<()>;
}
