#![forbid(unsafe_code)]

use ntnctl_kernel_contracts::kpi::{KpiChannel, KpiSample, KpiVector};
use ntnctl_kernel_contracts::ntn::{NtnState, NtnStatus};
use ntnctl_kernel_contracts::UnixTimeNs;
use ntnctl_storage::repo::{KpiHistoryRepo, NtnUpdateRepo};
use ntnctl_storage::sqlite::SqliteStore;
use ntnctl_storage::{NtnRepo, NtnStore, StorageError};

fn backends() -> Vec<(&'static str, Box<dyn NtnRepo>)> {
    let memory: Box<dyn NtnRepo> = Box::new(NtnStore::new_in_memory());
    let sqlite: Box<dyn NtnRepo> = Box::new(SqliteStore::open_in_memory().unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

fn sample(t: u64, congestion: f32, score: f32) -> KpiSample {
    let mut kpis = KpiVector::zero();
    kpis.congestion = congestion;
    KpiSample::v1(UnixTimeNs(t), kpis, score, NtnState::Nominal).unwrap()
}

#[test]
fn at_history_db_01_recent_rows_are_newest_tail_oldest_first() {
    for (name, s) in backends() {
        for t in 1..=70u64 {
            s.commit_ntn_update_rows(NtnStatus::initial(), sample(t, t as f32, 0.1))
                .unwrap();
        }
        assert_eq!(s.history_row_count().unwrap(), 70, "{name}");
        let rows = s.recent_history_rows(60).unwrap();
        assert_eq!(rows.len(), 60, "{name}");
        assert_eq!(rows[0].ts, UnixTimeNs(11), "{name}");
        assert_eq!(rows[59].ts, UnixTimeNs(70), "{name}");
        assert!(rows.windows(2).all(|w| w[0].ts <= w[1].ts), "{name}");
    }
}

#[test]
fn at_history_db_02_out_of_order_timestamps_sort_by_ts() {
    for (name, s) in backends() {
        s.commit_ntn_update_rows(NtnStatus::initial(), sample(30, 3.0, 0.0))
            .unwrap();
        s.commit_ntn_update_rows(NtnStatus::initial(), sample(10, 1.0, 0.0))
            .unwrap();
        s.commit_ntn_update_rows(NtnStatus::initial(), sample(20, 2.0, 0.0))
            .unwrap();
        let rows = s.recent_history_rows(2).unwrap();
        let congestion: Vec<f32> = rows.iter().map(|r| r.kpis.congestion).collect();
        assert_eq!(congestion, vec![2.0, 3.0], "{name}");
    }
}

#[test]
fn at_history_db_03_row_values_survive_persistence() {
    for (name, s) in backends() {
        let kpis = KpiVector::from_inputs([0.5, 0.25, 0.125, 1.0, 2.0, 0.75, 0.0625]);
        let row = KpiSample::v1(UnixTimeNs(42), kpis, 0.875, NtnState::Elevated).unwrap();
        s.commit_ntn_update_rows(NtnStatus::initial(), row).unwrap();
        assert_eq!(s.recent_history_rows(60).unwrap(), vec![row], "{name}");
    }
}

#[test]
fn at_history_db_04_channel_values_append_per_channel() {
    for (name, s) in backends() {
        s.append_channel_value_row(KpiChannel::PrbUtil, 0.4, UnixTimeNs(1))
            .unwrap();
        s.append_channel_value_row(KpiChannel::PrbUtil, 0.5, UnixTimeNs(2))
            .unwrap();
        s.append_channel_value_row(KpiChannel::Congestion, 0.9, UnixTimeNs(3))
            .unwrap();

        let prb = s.channel_value_rows(KpiChannel::PrbUtil).unwrap();
        assert_eq!(prb.len(), 2, "{name}");
        assert_eq!(prb[1].value, 0.5, "{name}");
        assert_eq!(prb[1].recorded_at, UnixTimeNs(2), "{name}");
        assert_eq!(s.channel_value_rows(KpiChannel::Congestion).unwrap().len(), 1, "{name}");
        assert!(s.channel_value_rows(KpiChannel::MobilityRate).unwrap().is_empty(), "{name}");
        assert_eq!(s.history_row_count().unwrap(), 0, "{name}");
    }
}

#[test]
fn at_history_db_05_non_finite_and_derived_channel_values_are_refused() {
    for (name, s) in backends() {
        assert!(matches!(
            s.append_channel_value_row(KpiChannel::CrisisScore, 0.2, UnixTimeNs(1)),
            Err(StorageError::ChannelNotWritable { .. })
        ), "{name}");
        assert!(matches!(
            s.append_channel_value_row(KpiChannel::TrafficLoad, f32::INFINITY, UnixTimeNs(1)),
            Err(StorageError::ContractViolation(_))
        ), "{name}");
        assert!(s.channel_value_rows(KpiChannel::TrafficLoad).unwrap().is_empty(), "{name}");
    }
}
