#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use ntnctl_kernel_contracts::kpi::{ChannelValueRecord, KpiChannel, KpiSample};
use ntnctl_kernel_contracts::lease::{ClientIdentity, ControllerLease};
use ntnctl_kernel_contracts::ntn::NtnStatus;
use ntnctl_kernel_contracts::{ContractViolation, UnixTimeNs, Validate};

use crate::repo::{ControllerLeaseRepo, KpiHistoryRepo, NtnStatusRepo, NtnUpdateRepo};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("no row in {table}")]
    NotFound { table: &'static str },
    #[error("{table} does not accept writes for this channel")]
    ChannelNotWritable { table: &'static str },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[derive(Debug)]
struct NtnStoreState {
    controller_lease: ControllerLease,
    ntn_status: NtnStatus,
    /// Ordered by `ts`.
    history: Vec<KpiSample>,
    channel_values: BTreeMap<KpiChannel, Vec<ChannelValueRecord>>,
    next_channel_row_id: u64,
}

/// In-process store. Every operation runs under one guard, so the lease claim and the
/// status+history commit are atomic with respect to each other.
#[derive(Debug)]
pub struct NtnStore {
    state: Mutex<NtnStoreState>,
}

impl NtnStore {
    /// Seeds both singleton rows: unowned lease, nominal NTN status.
    pub fn new_in_memory() -> Self {
        Self {
            state: Mutex::new(NtnStoreState {
                controller_lease: ControllerLease::unowned(),
                ntn_status: NtnStatus::initial(),
                history: Vec::new(),
                channel_values: BTreeMap::new(),
                next_channel_row_id: 1,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, NtnStoreState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("ntn store lock poisoned".to_string()))
    }
}

impl Default for NtnStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl ControllerLeaseRepo for NtnStore {
    fn controller_lease_row(&self) -> Result<ControllerLease, StorageError> {
        Ok(self.lock()?.controller_lease.clone())
    }

    fn claim_controller_lease_row(
        &self,
        identity: &ClientIdentity,
        now: UnixTimeNs,
        ttl_ns: u64,
    ) -> Result<ControllerLease, StorageError> {
        identity.validate()?;
        let mut state = self.lock()?;
        if state
            .controller_lease
            .is_claimable_by(identity, now, ttl_ns)
        {
            state.controller_lease = ControllerLease::v1(Some(identity.clone()), now)?;
        }
        Ok(state.controller_lease.clone())
    }

    fn clear_controller_lease_owner_row(
        &self,
        identity: &ClientIdentity,
    ) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        if !state.controller_lease.is_owned_by(identity) {
            return Ok(false);
        }
        state.controller_lease.owner_id = None;
        Ok(true)
    }
}

impl NtnStatusRepo for NtnStore {
    fn ntn_status_row(&self) -> Result<NtnStatus, StorageError> {
        Ok(self.lock()?.ntn_status)
    }
}

impl KpiHistoryRepo for NtnStore {
    fn append_channel_value_row(
        &self,
        channel: KpiChannel,
        value: f32,
        recorded_at: UnixTimeNs,
    ) -> Result<u64, StorageError> {
        if !channel.is_submittable() {
            return Err(StorageError::ChannelNotWritable {
                table: channel.as_str(),
            });
        }
        if !value.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "channel_value.value",
            }
            .into());
        }
        let mut state = self.lock()?;
        let row_id = state.next_channel_row_id;
        state.next_channel_row_id += 1;
        state
            .channel_values
            .entry(channel)
            .or_default()
            .push(ChannelValueRecord {
                row_id,
                channel,
                value,
                recorded_at,
            });
        Ok(row_id)
    }

    fn channel_value_rows(
        &self,
        channel: KpiChannel,
    ) -> Result<Vec<ChannelValueRecord>, StorageError> {
        Ok(self
            .lock()?
            .channel_values
            .get(&channel)
            .cloned()
            .unwrap_or_default())
    }

    fn recent_history_rows(&self, limit: usize) -> Result<Vec<KpiSample>, StorageError> {
        let state = self.lock()?;
        let start = state.history.len().saturating_sub(limit);
        Ok(state.history[start..].to_vec())
    }

    fn history_row_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.history.len())
    }
}

impl NtnUpdateRepo for NtnStore {
    fn commit_ntn_update_rows(
        &self,
        status: NtnStatus,
        sample: KpiSample,
    ) -> Result<(), StorageError> {
        sample.validate()?;
        let mut state = self.lock()?;
        state.ntn_status = status;
        // Kept ordered by ts; equal timestamps keep insertion order.
        let at = state.history.partition_point(|r| r.ts <= sample.ts);
        state.history.insert(at, sample);
        Ok(())
    }
}
