#![forbid(unsafe_code)]

use std::sync::Arc;

use ntnctl_engines::lease::{reason_codes, LeasePolicyRuntime};
use ntnctl_kernel_contracts::lease::{
    ClientIdentity, ControllerLease, ControllerRole, LeaseOperation,
};
use ntnctl_kernel_contracts::{UnixTimeNs, ReasonCodeId};
use ntnctl_storage::{NtnRepo, StorageError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LeaseError {
    #[error("no client identity presented")]
    Unauthorized,
    #[error("controller lease is held by another client")]
    Forbidden,
    #[error(transparent)]
    Persistence(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseDecision {
    pub role: ControllerRole,
    pub reason_code: ReasonCodeId,
    pub lease: ControllerLease,
}

/// Proof that the caller held the controller lease when the check ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAuthorization {
    pub identity: ClientIdentity,
    pub reason_code: ReasonCodeId,
    pub acquired_at: UnixTimeNs,
}

pub struct ControllerLeaseManager<R: ?Sized> {
    repo: Arc<R>,
    policy: LeasePolicyRuntime,
}

impl<R> ControllerLeaseManager<R>
where
    R: NtnRepo + ?Sized,
{
    pub fn new(repo: Arc<R>, policy: LeasePolicyRuntime) -> Self {
        Self { repo, policy }
    }

    pub fn ttl_ns(&self) -> u64 {
        self.policy.ttl_ns()
    }

    /// Page-load path. An anonymous caller is an observer and nothing is written.
    /// Otherwise the lease row is claimed through one conditional write and the role
    /// is read off the row as it stands afterwards.
    pub fn acquire_or_validate(
        &self,
        identity: Option<&ClientIdentity>,
        now: UnixTimeNs,
    ) -> Result<LeaseDecision, LeaseError> {
        let snapshot = self.repo.controller_lease_row()?;
        let eval = self.policy.evaluate(identity, &snapshot, now);
        let Some(identity) = identity else {
            return Ok(LeaseDecision {
                role: ControllerRole::Observer,
                reason_code: eval.reason_code,
                lease: snapshot,
            });
        };

        let lease = self
            .repo
            .claim_controller_lease_row(identity, now, self.policy.ttl_ns())?;
        let role = self.policy.role_after_claim(identity, &lease);
        // The pre-read can be stale: a holder that released in between leaves the
        // caller controlling a lease the snapshot still showed as foreign.
        let reason_code = match role {
            ControllerRole::Observer => reason_codes::LEASE_HELD_BY_OTHER,
            ControllerRole::Controller if eval.grant_eligible => eval.reason_code,
            ControllerRole::Controller => reason_codes::LEASE_OK_UNOWNED,
        };
        if role == ControllerRole::Controller
            && eval.reason_code == reason_codes::LEASE_OK_EXPIRED_TAKEOVER
        {
            tracing::info!(client_id = %identity, "expired controller lease taken over");
        }
        tracing::debug!(
            op = LeaseOperation::AcquireOrValidate.as_str(),
            client_id = %identity,
            role = role.as_str(),
            "controller lease evaluated"
        );
        Ok(LeaseDecision {
            role,
            reason_code,
            lease,
        })
    }

    /// Read-only role check; never claims.
    pub fn current_role(
        &self,
        identity: Option<&ClientIdentity>,
        now: UnixTimeNs,
    ) -> Result<ControllerRole, LeaseError> {
        let snapshot = self.repo.controller_lease_row()?;
        let eval = self.policy.evaluate(identity, &snapshot, now);
        Ok(if eval.held_by_caller() {
            ControllerRole::Controller
        } else {
            ControllerRole::Observer
        })
    }

    /// Gate for every mutating operation. A caller that already holds a live lease
    /// passes without a write; an unowned or expired lease is claimed on the way.
    pub fn assert_writer(
        &self,
        identity: Option<&ClientIdentity>,
        now: UnixTimeNs,
    ) -> Result<WriteAuthorization, LeaseError> {
        let Some(identity) = identity else {
            tracing::warn!(
                op = LeaseOperation::AssertWriter.as_str(),
                "write rejected: no client identity"
            );
            return Err(LeaseError::Unauthorized);
        };

        let snapshot = self.repo.controller_lease_row()?;
        let eval = self.policy.evaluate(Some(identity), &snapshot, now);
        if eval.held_by_caller() {
            return Ok(WriteAuthorization {
                identity: identity.clone(),
                reason_code: eval.reason_code,
                acquired_at: snapshot.acquired_at,
            });
        }
        if !eval.grant_eligible {
            tracing::warn!(client_id = %identity, "write rejected: lease held by another client");
            return Err(LeaseError::Forbidden);
        }

        let lease = self
            .repo
            .claim_controller_lease_row(identity, now, self.policy.ttl_ns())?;
        if self.policy.role_after_claim(identity, &lease) != ControllerRole::Controller {
            tracing::warn!(client_id = %identity, "write rejected: lease claimed concurrently");
            return Err(LeaseError::Forbidden);
        }
        tracing::info!(client_id = %identity, "controller lease claimed by writer");
        Ok(WriteAuthorization {
            identity: identity.clone(),
            reason_code: eval.reason_code,
            acquired_at: lease.acquired_at,
        })
    }

    /// Nulls the lease owner when `identity` holds it. Returns whether the lease was freed.
    pub fn release(&self, identity: &ClientIdentity) -> Result<bool, LeaseError> {
        let released = self.repo.clear_controller_lease_owner_row(identity)?;
        if released {
            tracing::info!(
                op = LeaseOperation::Release.as_str(),
                client_id = %identity,
                "controller lease released"
            );
        }
        Ok(released)
    }
}
