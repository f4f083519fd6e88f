//! In-memory [`ComputeRepository`] for exercising the compute task types.

use crate::compute::models::{
    Disk, Elasticip, Guest, Host, LoadbalancerCertificate, KIND_DISK, KIND_ELASTICIP, KIND_GUEST,
    KIND_LB_CERTIFICATE,
};
use crate::compute::{ComputeError, ComputeRepository, ComputeResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct ComputeState {
    hosts: HashMap<String, Host>,
    disks: HashMap<String, Disk>,
    guests: HashMap<String, Guest>,
    eips: HashMap<String, Elasticip>,
    certificates: HashMap<String, LoadbalancerCertificate>,
    /// `(kind, id)` in deletion order
    deleted: Vec<(&'static str, String)>,
    /// `(id, status)` in the order statuses were set
    status_history: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct InMemoryCompute {
    state: Mutex<ComputeState>,
}

impl InMemoryCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_host(&self, host: Host) {
        self.state.lock().hosts.insert(host.id.clone(), host);
    }

    pub fn insert_disk(&self, disk: Disk) {
        self.state.lock().disks.insert(disk.id.clone(), disk);
    }

    pub fn insert_guest(&self, guest: Guest) {
        self.state.lock().guests.insert(guest.id.clone(), guest);
    }

    pub fn insert_eip(&self, eip: Elasticip) {
        self.state.lock().eips.insert(eip.id.clone(), eip);
    }

    pub fn insert_certificate(&self, certificate: LoadbalancerCertificate) {
        self.state
            .lock()
            .certificates
            .insert(certificate.id.clone(), certificate);
    }

    pub fn disk(&self, id: &str) -> Option<Disk> {
        self.state.lock().disks.get(id).cloned()
    }

    pub fn guest(&self, id: &str) -> Option<Guest> {
        self.state.lock().guests.get(id).cloned()
    }

    pub fn eip(&self, id: &str) -> Option<Elasticip> {
        self.state.lock().eips.get(id).cloned()
    }

    pub fn certificate(&self, id: &str) -> Option<LoadbalancerCertificate> {
        self.state.lock().certificates.get(id).cloned()
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.state.lock().deleted.iter().any(|(_, d)| d == id)
    }

    pub fn deleted(&self) -> Vec<(&'static str, String)> {
        self.state.lock().deleted.clone()
    }

    /// Statuses set on resource `id`, oldest first
    pub fn status_history(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .status_history
            .iter()
            .filter(|(rid, _)| rid == id)
            .map(|(_, status)| status.clone())
            .collect()
    }
}

fn missing(kind: &'static str, id: &str) -> ComputeError {
    ComputeError::not_found(kind, id)
}

#[async_trait]
impl ComputeRepository for InMemoryCompute {
    async fn get_host(&self, id: &str) -> ComputeResult<Host> {
        self.state
            .lock()
            .hosts
            .get(id)
            .cloned()
            .ok_or_else(|| missing("host", id))
    }

    async fn get_disk(&self, id: &str) -> ComputeResult<Disk> {
        self.disk(id).ok_or_else(|| missing(KIND_DISK, id))
    }

    async fn set_disk_status(&self, id: &str, status: &str, _reason: &str) -> ComputeResult<()> {
        let mut state = self.state.lock();
        let disk = state.disks.get_mut(id).ok_or_else(|| missing(KIND_DISK, id))?;
        disk.status = status.to_string();
        state.status_history.push((id.to_string(), status.to_string()));
        Ok(())
    }

    async fn pending_delete_disk(&self, id: &str) -> ComputeResult<()> {
        let mut state = self.state.lock();
        let disk = state.disks.get_mut(id).ok_or_else(|| missing(KIND_DISK, id))?;
        disk.pending_deleted = true;
        Ok(())
    }

    async fn real_delete_disk(&self, id: &str) -> ComputeResult<()> {
        let mut state = self.state.lock();
        state
            .disks
            .remove(id)
            .ok_or_else(|| missing(KIND_DISK, id))?;
        state.deleted.push((KIND_DISK, id.to_string()));
        Ok(())
    }

    async fn get_guest(&self, id: &str) -> ComputeResult<Guest> {
        self.guest(id).ok_or_else(|| missing(KIND_GUEST, id))
    }

    async fn set_guest_status(&self, id: &str, status: &str, _reason: &str) -> ComputeResult<()> {
        let mut state = self.state.lock();
        let guest = state
            .guests
            .get_mut(id)
            .ok_or_else(|| missing(KIND_GUEST, id))?;
        guest.status = status.to_string();
        state.status_history.push((id.to_string(), status.to_string()));
        Ok(())
    }

    async fn detach_disk(&self, guest_id: &str, disk_id: &str) -> ComputeResult<()> {
        let mut state = self.state.lock();
        let disk = state
            .disks
            .get_mut(disk_id)
            .ok_or_else(|| missing(KIND_DISK, disk_id))?;
        disk.guest_ids.retain(|g| g != guest_id);
        Ok(())
    }

    async fn real_delete_guest(&self, id: &str) -> ComputeResult<()> {
        let mut state = self.state.lock();
        state
            .guests
            .remove(id)
            .ok_or_else(|| missing(KIND_GUEST, id))?;
        state.deleted.push((KIND_GUEST, id.to_string()));
        Ok(())
    }

    async fn get_elasticip(&self, id: &str) -> ComputeResult<Elasticip> {
        self.eip(id).ok_or_else(|| missing(KIND_ELASTICIP, id))
    }

    async fn set_elasticip_status(
        &self,
        id: &str,
        status: &str,
        _reason: &str,
    ) -> ComputeResult<()> {
        let mut state = self.state.lock();
        let eip = state
            .eips
            .get_mut(id)
            .ok_or_else(|| missing(KIND_ELASTICIP, id))?;
        eip.status = status.to_string();
        state.status_history.push((id.to_string(), status.to_string()));
        Ok(())
    }

    async fn set_elasticip_bandwidth(&self, id: &str, bandwidth: i64) -> ComputeResult<()> {
        let mut state = self.state.lock();
        let eip = state
            .eips
            .get_mut(id)
            .ok_or_else(|| missing(KIND_ELASTICIP, id))?;
        eip.bandwidth = bandwidth;
        Ok(())
    }

    async fn get_certificate(&self, id: &str) -> ComputeResult<LoadbalancerCertificate> {
        self.certificate(id)
            .ok_or_else(|| missing(KIND_LB_CERTIFICATE, id))
    }

    async fn set_certificate_status(
        &self,
        id: &str,
        status: &str,
        _reason: &str,
    ) -> ComputeResult<()> {
        let mut state = self.state.lock();
        let certificate = state
            .certificates
            .get_mut(id)
            .ok_or_else(|| missing(KIND_LB_CERTIFICATE, id))?;
        certificate.status = status.to_string();
        state.status_history.push((id.to_string(), status.to_string()));
        Ok(())
    }

    async fn real_delete_certificate(&self, id: &str) -> ComputeResult<()> {
        let mut state = self.state.lock();
        state
            .certificates
            .remove(id)
            .ok_or_else(|| missing(KIND_LB_CERTIFICATE, id))?;
        state.deleted.push((KIND_LB_CERTIFICATE, id.to_string()));
        Ok(())
    }
}
