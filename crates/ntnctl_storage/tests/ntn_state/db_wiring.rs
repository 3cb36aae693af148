#![forbid(unsafe_code)]

use ntnctl_kernel_contracts::kpi::{KpiSample, KpiVector};
use ntnctl_kernel_contracts::ntn::{NtnState, NtnStatus};
use ntnctl_kernel_contracts::UnixTimeNs;
use ntnctl_storage::repo::{KpiHistoryRepo, NtnStatusRepo, NtnUpdateRepo};
use ntnctl_storage::sqlite::SqliteStore;
use ntnctl_storage::{NtnRepo, NtnStore};

fn backends() -> Vec<(&'static str, Box<dyn NtnRepo>)> {
    let memory: Box<dyn NtnRepo> = Box::new(NtnStore::new_in_memory());
    let sqlite: Box<dyn NtnRepo> = Box::new(SqliteStore::open_in_memory().unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

#[test]
fn at_ntn_db_01_status_and_history_commit_together() {
    for (name, s) in backends() {
        let status = NtnStatus {
            state: NtnState::Fallback,
            critical_count: 3,
            recovery_count: 0,
        };
        let row = KpiSample::v1(UnixTimeNs(9), KpiVector::zero(), 0.95, NtnState::Fallback)
            .unwrap();
        s.commit_ntn_update_rows(status, row).unwrap();

        assert_eq!(s.ntn_status_row().unwrap(), status, "{name}");
        let history = s.recent_history_rows(60).unwrap();
        assert_eq!(history.len(), 1, "{name}");
        assert_eq!(history[0].ntn_state, NtnState::Fallback, "{name}");
    }
}

#[test]
fn at_ntn_db_02_invalid_row_commits_nothing() {
    for (name, s) in backends() {
        let status = NtnStatus {
            state: NtnState::Elevated,
            critical_count: 1,
            recovery_count: 0,
        };
        let bad = KpiSample {
            ts: UnixTimeNs(1),
            kpis: KpiVector::zero(),
            crisis_score: f32::NAN,
            ntn_state: NtnState::Elevated,
        };
        assert!(s.commit_ntn_update_rows(status, bad).is_err(), "{name}");
        assert_eq!(s.ntn_status_row().unwrap(), NtnStatus::initial(), "{name}");
        assert_eq!(s.history_row_count().unwrap(), 0, "{name}");
    }
}

#[test]
fn at_ntn_db_03_stale_recovery_count_is_preserved() {
    for (name, s) in backends() {
        let status = NtnStatus {
            state: NtnState::Degraded,
            critical_count: 0,
            recovery_count: 2,
        };
        let row = KpiSample::v1(UnixTimeNs(5), KpiVector::zero(), 0.65, NtnState::Degraded)
            .unwrap();
        s.commit_ntn_update_rows(status, row).unwrap();
        assert_eq!(s.ntn_status_row().unwrap(), status, "{name}");
    }
}
