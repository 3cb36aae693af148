#![forbid(unsafe_code)]

use crate::common::validate_token_ascii;
use crate::{ContractViolation, UnixTimeNs, SchemaVersion, Validate};

pub const CONTROLLER_LEASE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// One hour.
pub const DEFAULT_LEASE_TTL_NS: u64 = 3_600_000_000_000;
pub const MAX_LEASE_TTL_NS: u64 = 86_400_000_000_000;

/// Opaque, client-held token. Self-asserting; only useful while it matches the lease owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let identity = Self(value.into());
        identity.validate()?;
        Ok(identity)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ClientIdentity {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token_ascii("client_identity", &self.0, 128)
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseOperation {
    AcquireOrValidate,
    AssertWriter,
    Release,
}

impl LeaseOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseOperation::AcquireOrValidate => "ACQUIRE_OR_VALIDATE",
            LeaseOperation::AssertWriter => "ASSERT_WRITER",
            LeaseOperation::Release => "RELEASE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerRole {
    Controller,
    Observer,
}

impl ControllerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerRole::Controller => "controller",
            ControllerRole::Observer => "observer",
        }
    }
}

/// Singleton controller lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerLease {
    pub schema_version: SchemaVersion,
    pub owner_id: Option<ClientIdentity>,
    pub acquired_at: UnixTimeNs,
}

impl ControllerLease {
    pub fn unowned() -> Self {
        Self {
            schema_version: CONTROLLER_LEASE_CONTRACT_VERSION,
            owner_id: None,
            acquired_at: UnixTimeNs(0),
        }
    }

    pub fn v1(
        owner_id: Option<ClientIdentity>,
        acquired_at: UnixTimeNs,
    ) -> Result<Self, ContractViolation> {
        let lease = Self {
            schema_version: CONTROLLER_LEASE_CONTRACT_VERSION,
            owner_id,
            acquired_at,
        };
        lease.validate()?;
        Ok(lease)
    }

    pub fn is_expired_at(&self, now: UnixTimeNs, ttl_ns: u64) -> bool {
        now.elapsed_since(self.acquired_at) >= ttl_ns
    }

    /// Owned and not yet expired.
    pub fn is_valid_at(&self, now: UnixTimeNs, ttl_ns: u64) -> bool {
        self.owner_id.is_some() && !self.is_expired_at(now, ttl_ns)
    }

    pub fn is_owned_by(&self, identity: &ClientIdentity) -> bool {
        self.owner_id.as_ref() == Some(identity)
    }

    /// The predicate the conditional lease write is keyed on.
    pub fn is_claimable_by(
        &self,
        identity: &ClientIdentity,
        now: UnixTimeNs,
        ttl_ns: u64,
    ) -> bool {
        self.owner_id.is_none() || self.is_owned_by(identity) || self.is_expired_at(now, ttl_ns)
    }
}

impl Validate for ControllerLease {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != CONTROLLER_LEASE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "controller_lease.schema_version",
                reason: "must match CONTROLLER_LEASE_CONTRACT_VERSION",
            });
        }
        if let Some(owner) = &self.owner_id {
            owner.validate()?;
        }
        Ok(())
    }
}

pub fn validate_lease_ttl_ns(ttl_ns: u64) -> Result<(), ContractViolation> {
    if ttl_ns == 0 || ttl_ns > MAX_LEASE_TTL_NS {
        return Err(ContractViolation::InvalidValue {
            field: "lease_ttl_ns",
            reason: "must be within 1..=MAX_LEASE_TTL_NS",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: u64 = 1_000;

    fn id(v: &str) -> ClientIdentity {
        ClientIdentity::new(v).unwrap()
    }

    #[test]
    fn at_lease_contract_01_identity_must_be_token_safe() {
        assert!(ClientIdentity::new("6f1c2d4e-8a0b-4c3d-9e7f-1a2b3c4d5e6f").is_ok());
        assert!(ClientIdentity::new("").is_err());
        assert!(ClientIdentity::new("a b").is_err());
        assert!(ClientIdentity::new("x".repeat(129)).is_err());
    }

    #[test]
    fn at_lease_contract_02_claimable_when_unowned_own_or_expired() {
        let unowned = ControllerLease::unowned();
        assert!(unowned.is_claimable_by(&id("b"), UnixTimeNs(10), TTL));
        assert!(!unowned.is_valid_at(UnixTimeNs(10), TTL));

        let held = ControllerLease::v1(Some(id("a")), UnixTimeNs(100)).unwrap();
        assert!(held.is_claimable_by(&id("a"), UnixTimeNs(500), TTL));
        assert!(!held.is_claimable_by(&id("b"), UnixTimeNs(500), TTL));
        assert!(held.is_valid_at(UnixTimeNs(1_099), TTL));
        assert!(!held.is_valid_at(UnixTimeNs(1_100), TTL));
        assert!(held.is_claimable_by(&id("b"), UnixTimeNs(1_100), TTL));
    }

    #[test]
    fn at_lease_contract_03_ttl_bounds() {
        assert!(validate_lease_ttl_ns(DEFAULT_LEASE_TTL_NS).is_ok());
        assert!(validate_lease_ttl_ns(0).is_err());
        assert!(validate_lease_ttl_ns(MAX_LEASE_TTL_NS + 1).is_err());
    }
}
