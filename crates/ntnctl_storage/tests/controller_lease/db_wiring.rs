#![forbid(unsafe_code)]

use std::sync::Barrier;
use std::thread;

use ntnctl_kernel_contracts::lease::{ClientIdentity, DEFAULT_LEASE_TTL_NS};
use ntnctl_kernel_contracts::UnixTimeNs;
use ntnctl_storage::repo::ControllerLeaseRepo;
use ntnctl_storage::sqlite::SqliteStore;
use ntnctl_storage::{NtnRepo, NtnStore};

const TTL: u64 = DEFAULT_LEASE_TTL_NS;

fn id(v: &str) -> ClientIdentity {
    ClientIdentity::new(v).unwrap()
}

fn backends() -> Vec<(&'static str, Box<dyn NtnRepo>)> {
    let memory: Box<dyn NtnRepo> = Box::new(NtnStore::new_in_memory());
    let sqlite: Box<dyn NtnRepo> = Box::new(SqliteStore::open_in_memory().unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

#[test]
fn at_lease_db_01_unowned_row_is_claimed() {
    for (name, s) in backends() {
        let row = s
            .claim_controller_lease_row(&id("client_a"), UnixTimeNs(100), TTL)
            .unwrap();
        assert_eq!(row.owner_id, Some(id("client_a")), "{name}");
        assert_eq!(row.acquired_at, UnixTimeNs(100), "{name}");
        assert_eq!(s.controller_lease_row().unwrap(), row, "{name}");
    }
}

#[test]
fn at_lease_db_02_valid_foreign_lease_is_not_overwritten() {
    for (name, s) in backends() {
        s.claim_controller_lease_row(&id("client_a"), UnixTimeNs(100), TTL)
            .unwrap();
        let row = s
            .claim_controller_lease_row(&id("client_b"), UnixTimeNs(100 + TTL - 1), TTL)
            .unwrap();
        assert_eq!(row.owner_id, Some(id("client_a")), "{name}");
        assert_eq!(row.acquired_at, UnixTimeNs(100), "{name}");
    }
}

#[test]
fn at_lease_db_03_owner_renewal_refreshes_acquired_at() {
    for (name, s) in backends() {
        s.claim_controller_lease_row(&id("client_a"), UnixTimeNs(100), TTL)
            .unwrap();
        let row = s
            .claim_controller_lease_row(&id("client_a"), UnixTimeNs(5_000), TTL)
            .unwrap();
        assert_eq!(row.owner_id, Some(id("client_a")), "{name}");
        assert_eq!(row.acquired_at, UnixTimeNs(5_000), "{name}");
    }
}

#[test]
fn at_lease_db_04_expired_lease_is_taken_over_at_exact_ttl() {
    for (name, s) in backends() {
        s.claim_controller_lease_row(&id("client_a"), UnixTimeNs(100), TTL)
            .unwrap();
        let row = s
            .claim_controller_lease_row(&id("client_b"), UnixTimeNs(100 + TTL), TTL)
            .unwrap();
        assert_eq!(row.owner_id, Some(id("client_b")), "{name}");
        assert_eq!(row.acquired_at, UnixTimeNs(100 + TTL), "{name}");
    }
}

#[test]
fn at_lease_db_05_release_only_clears_own_lease() {
    for (name, s) in backends() {
        s.claim_controller_lease_row(&id("client_a"), UnixTimeNs(100), TTL)
            .unwrap();
        assert!(!s.clear_controller_lease_owner_row(&id("client_b")).unwrap(), "{name}");
        assert_eq!(
            s.controller_lease_row().unwrap().owner_id,
            Some(id("client_a")),
            "{name}"
        );

        assert!(s.clear_controller_lease_owner_row(&id("client_a")).unwrap(), "{name}");
        assert_eq!(s.controller_lease_row().unwrap().owner_id, None, "{name}");

        let row = s
            .claim_controller_lease_row(&id("client_b"), UnixTimeNs(200), TTL)
            .unwrap();
        assert_eq!(row.owner_id, Some(id("client_b")), "{name}");
    }
}

#[test]
fn at_lease_db_06_concurrent_claims_have_one_winner() {
    const CLAIMANTS: usize = 8;
    for (name, s) in backends() {
        for round in 0..20u64 {
            if round > 0 {
                let owner = s.controller_lease_row().unwrap().owner_id.unwrap();
                assert!(s.clear_controller_lease_owner_row(&owner).unwrap(), "{name}");
            }
            let barrier = Barrier::new(CLAIMANTS);
            let store: &dyn NtnRepo = &*s;
            let winners = thread::scope(|scope| {
                let handles: Vec<_> = (0..CLAIMANTS)
                    .map(|i| {
                        let barrier = &barrier;
                        scope.spawn(move || {
                            let me = id(&format!("client_{round}_{i}"));
                            barrier.wait();
                            let row = store
                                .claim_controller_lease_row(&me, UnixTimeNs(100 + round), TTL)
                                .unwrap();
                            row.owner_id == Some(me)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|won| *won)
                    .count()
            });
            assert_eq!(winners, 1, "{name} round {round}");
        }
    }
}
