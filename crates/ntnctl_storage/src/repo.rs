#![forbid(unsafe_code)]

use ntnctl_kernel_contracts::kpi::{ChannelValueRecord, KpiChannel, KpiSample};
use ntnctl_kernel_contracts::lease::{ClientIdentity, ControllerLease};
use ntnctl_kernel_contracts::ntn::NtnStatus;
use ntnctl_kernel_contracts::UnixTimeNs;

use crate::store::StorageError;

/// Singleton controller lease row.
pub trait ControllerLeaseRepo {
    /// Current row; an absent row reads as unowned.
    fn controller_lease_row(&self) -> Result<ControllerLease, StorageError>;

    /// Assigns `owner_id = identity, acquired_at = now` in one conditional write keyed on
    /// [`ControllerLease::is_claimable_by`]. Returns the row as it stands after the write,
    /// whether or not the condition held.
    fn claim_controller_lease_row(
        &self,
        identity: &ClientIdentity,
        now: UnixTimeNs,
        ttl_ns: u64,
    ) -> Result<ControllerLease, StorageError>;

    /// Nulls the owner only if `identity` holds it. Returns whether a row changed.
    fn clear_controller_lease_owner_row(
        &self,
        identity: &ClientIdentity,
    ) -> Result<bool, StorageError>;
}

pub trait NtnStatusRepo {
    fn ntn_status_row(&self) -> Result<NtnStatus, StorageError>;
}

pub trait KpiHistoryRepo {
    fn append_channel_value_row(
        &self,
        channel: KpiChannel,
        value: f32,
        recorded_at: UnixTimeNs,
    ) -> Result<u64, StorageError>;

    fn channel_value_rows(&self, channel: KpiChannel)
        -> Result<Vec<ChannelValueRecord>, StorageError>;

    /// Newest `limit` history rows, returned oldest first.
    fn recent_history_rows(&self, limit: usize) -> Result<Vec<KpiSample>, StorageError>;

    fn history_row_count(&self) -> Result<usize, StorageError>;
}

pub trait NtnUpdateRepo {
    /// Writes the new NTN status and appends its history row as one durability unit.
    fn commit_ntn_update_rows(
        &self,
        status: NtnStatus,
        sample: KpiSample,
    ) -> Result<(), StorageError>;
}

/// Everything the control loop needs from persistence.
pub trait NtnRepo:
    ControllerLeaseRepo + NtnStatusRepo + KpiHistoryRepo + NtnUpdateRepo + Send + Sync
{
}

impl<T> NtnRepo for T where
    T: ControllerLeaseRepo + NtnStatusRepo + KpiHistoryRepo + NtnUpdateRepo + Send + Sync
{
}
