#![forbid(unsafe_code)]

use crate::common::validate_finite;
use crate::ntn::NtnState;
use crate::{ContractViolation, UnixTimeNs, Validate};

/// Width of one feature row: seven measured channels plus the crisis score.
pub const KPI_FEATURE_DIM: usize = 8;

/// Number of channels a caller submits; `CrisisScore` is derived, never submitted.
pub const KPI_INPUT_CHANNELS: usize = 7;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum KpiChannel {
    Congestion,
    PrbUtil,
    TrafficLoad,
    RanEnergy,
    CarbonIntensity,
    IsacQuality,
    MobilityRate,
    CrisisScore,
}

impl KpiChannel {
    /// Column order of a feature row. The inference service expects exactly this order.
    pub const ALL: [KpiChannel; KPI_FEATURE_DIM] = [
        KpiChannel::Congestion,
        KpiChannel::PrbUtil,
        KpiChannel::TrafficLoad,
        KpiChannel::RanEnergy,
        KpiChannel::CarbonIntensity,
        KpiChannel::IsacQuality,
        KpiChannel::MobilityRate,
        KpiChannel::CrisisScore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KpiChannel::Congestion => "congestion",
            KpiChannel::PrbUtil => "prb_util",
            KpiChannel::TrafficLoad => "traffic_load",
            KpiChannel::RanEnergy => "ran_energy",
            KpiChannel::CarbonIntensity => "carbon_intensity",
            KpiChannel::IsacQuality => "isac_quality",
            KpiChannel::MobilityRate => "mobility_rate",
            KpiChannel::CrisisScore => "crisis_score",
        }
    }

    /// Case-insensitive lookup by channel name.
    pub fn parse(name: &str) -> Result<Self, ContractViolation> {
        let lowered = name.trim().to_ascii_lowercase();
        KpiChannel::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or(ContractViolation::InvalidValue {
                field: "kpi_channel",
                reason: "unknown KPI channel",
            })
    }

    pub fn column_index(self) -> usize {
        match self {
            KpiChannel::Congestion => 0,
            KpiChannel::PrbUtil => 1,
            KpiChannel::TrafficLoad => 2,
            KpiChannel::RanEnergy => 3,
            KpiChannel::CarbonIntensity => 4,
            KpiChannel::IsacQuality => 5,
            KpiChannel::MobilityRate => 6,
            KpiChannel::CrisisScore => 7,
        }
    }

    pub fn is_submittable(self) -> bool {
        self != KpiChannel::CrisisScore
    }
}

/// The seven operator-submitted channels of one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct KpiVector {
    pub congestion: f32,
    pub prb_util: f32,
    pub traffic_load: f32,
    pub ran_energy: f32,
    pub carbon_intensity: f32,
    pub isac_quality: f32,
    pub mobility_rate: f32,
}

impl KpiVector {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_inputs(values: [f32; KPI_INPUT_CHANNELS]) -> Self {
        Self {
            congestion: values[0],
            prb_util: values[1],
            traffic_load: values[2],
            ran_energy: values[3],
            carbon_intensity: values[4],
            isac_quality: values[5],
            mobility_rate: values[6],
        }
    }

    /// Value of a submitted channel; `None` for `CrisisScore`.
    pub fn get(&self, channel: KpiChannel) -> Option<f32> {
        match channel {
            KpiChannel::Congestion => Some(self.congestion),
            KpiChannel::PrbUtil => Some(self.prb_util),
            KpiChannel::TrafficLoad => Some(self.traffic_load),
            KpiChannel::RanEnergy => Some(self.ran_energy),
            KpiChannel::CarbonIntensity => Some(self.carbon_intensity),
            KpiChannel::IsacQuality => Some(self.isac_quality),
            KpiChannel::MobilityRate => Some(self.mobility_rate),
            KpiChannel::CrisisScore => None,
        }
    }

    pub fn feature_row(&self, crisis_score: f32) -> [f32; KPI_FEATURE_DIM] {
        [
            self.congestion,
            self.prb_util,
            self.traffic_load,
            self.ran_energy,
            self.carbon_intensity,
            self.isac_quality,
            self.mobility_rate,
            crisis_score,
        ]
    }
}

impl Validate for KpiVector {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_finite("kpi_vector.congestion", self.congestion)?;
        validate_finite("kpi_vector.prb_util", self.prb_util)?;
        validate_finite("kpi_vector.traffic_load", self.traffic_load)?;
        validate_finite("kpi_vector.ran_energy", self.ran_energy)?;
        validate_finite("kpi_vector.carbon_intensity", self.carbon_intensity)?;
        validate_finite("kpi_vector.isac_quality", self.isac_quality)?;
        validate_finite("kpi_vector.mobility_rate", self.mobility_rate)?;
        Ok(())
    }
}

/// One immutable history row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KpiSample {
    pub ts: UnixTimeNs,
    pub kpis: KpiVector,
    pub crisis_score: f32,
    pub ntn_state: NtnState,
}

impl KpiSample {
    pub fn v1(
        ts: UnixTimeNs,
        kpis: KpiVector,
        crisis_score: f32,
        ntn_state: NtnState,
    ) -> Result<Self, ContractViolation> {
        let sample = Self {
            ts,
            kpis,
            crisis_score,
            ntn_state,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Zero row used to left-pad a short history.
    pub fn padding(ts: UnixTimeNs) -> Self {
        Self {
            ts,
            kpis: KpiVector::zero(),
            crisis_score: 0.0,
            ntn_state: NtnState::Nominal,
        }
    }

    pub fn feature_row(&self) -> [f32; KPI_FEATURE_DIM] {
        self.kpis.feature_row(self.crisis_score)
    }
}

impl Validate for KpiSample {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.kpis.validate()?;
        validate_finite("kpi_sample.crisis_score", self.crisis_score)?;
        Ok(())
    }
}

/// One value appended to a per-channel store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValueRecord {
    pub row_id: u64,
    pub channel: KpiChannel,
    pub value: f32,
    pub recorded_at: UnixTimeNs,
}
