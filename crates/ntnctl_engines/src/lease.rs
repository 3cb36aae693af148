#![forbid(unsafe_code)]

use ntnctl_kernel_contracts::lease::{
    validate_lease_ttl_ns, ClientIdentity, ControllerLease, ControllerRole, DEFAULT_LEASE_TTL_NS,
};
use ntnctl_kernel_contracts::{ContractViolation, UnixTimeNs, ReasonCodeId};

pub mod reason_codes {
    use ntnctl_kernel_contracts::ReasonCodeId;

    pub const LEASE_OK_HELD_BY_CALLER: ReasonCodeId = ReasonCodeId(0x4C53_0001);
    pub const LEASE_OK_UNOWNED: ReasonCodeId = ReasonCodeId(0x4C53_0002);
    pub const LEASE_OK_EXPIRED_TAKEOVER: ReasonCodeId = ReasonCodeId(0x4C53_0003);

    pub const LEASE_HELD_BY_OTHER: ReasonCodeId = ReasonCodeId(0x4C53_0010);
    pub const LEASE_IDENTITY_MISSING: ReasonCodeId = ReasonCodeId(0x4C53_0011);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    pub ttl_ns: u64,
}

impl LeaseConfig {
    pub fn mvp_v1() -> Self {
        Self {
            ttl_ns: DEFAULT_LEASE_TTL_NS,
        }
    }

    pub fn from_ttl_ms(ttl_ms: u64) -> Result<Self, ContractViolation> {
        let ttl_ns = ttl_ms.saturating_mul(1_000_000);
        validate_lease_ttl_ns(ttl_ns)?;
        Ok(Self { ttl_ns })
    }
}

/// Classification of a lease snapshot from one caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicyEvaluation {
    pub reason_code: ReasonCodeId,
    pub lease_exists: bool,
    pub lease_expired: bool,
    pub owner_match: bool,
    pub grant_eligible: bool,
}

impl LeasePolicyEvaluation {
    /// Caller already holds a valid lease; no write is needed to authorize it.
    pub fn held_by_caller(&self) -> bool {
        self.owner_match && !self.lease_expired
    }
}

#[derive(Debug, Clone)]
pub struct LeasePolicyRuntime {
    config: LeaseConfig,
}

impl LeasePolicyRuntime {
    pub fn new(config: LeaseConfig) -> Result<Self, ContractViolation> {
        validate_lease_ttl_ns(config.ttl_ns)?;
        Ok(Self { config })
    }

    pub fn ttl_ns(&self) -> u64 {
        self.config.ttl_ns
    }

    pub fn evaluate(
        &self,
        identity: Option<&ClientIdentity>,
        snapshot: &ControllerLease,
        now: UnixTimeNs,
    ) -> LeasePolicyEvaluation {
        let lease_exists = snapshot.owner_id.is_some();
        let lease_expired = lease_exists && snapshot.is_expired_at(now, self.config.ttl_ns);
        let owner_match = identity.is_some_and(|id| snapshot.is_owned_by(id));

        let Some(identity) = identity else {
            return LeasePolicyEvaluation {
                reason_code: reason_codes::LEASE_IDENTITY_MISSING,
                lease_exists,
                lease_expired,
                owner_match: false,
                grant_eligible: false,
            };
        };

        let grant_eligible = snapshot.is_claimable_by(identity, now, self.config.ttl_ns);
        let reason_code = if !grant_eligible {
            reason_codes::LEASE_HELD_BY_OTHER
        } else if !lease_exists {
            reason_codes::LEASE_OK_UNOWNED
        } else if owner_match {
            reason_codes::LEASE_OK_HELD_BY_CALLER
        } else {
            reason_codes::LEASE_OK_EXPIRED_TAKEOVER
        };

        LeasePolicyEvaluation {
            reason_code,
            lease_exists,
            lease_expired,
            owner_match,
            grant_eligible,
        }
    }

    /// Role implied by the lease row as it stands after the conditional write.
    pub fn role_after_claim(
        &self,
        identity: &ClientIdentity,
        lease_after: &ControllerLease,
    ) -> ControllerRole {
        if lease_after.is_owned_by(identity) {
            ControllerRole::Controller
        } else {
            ControllerRole::Observer
        }
    }
}

impl Default for LeasePolicyRuntime {
    fn default() -> Self {
        Self {
            config: LeaseConfig::mvp_v1(),
        }
    }
}
