//! Acquisition configuration consumed by the planner.
//!
//! Loading from a file or the environment belongs to the host; the engine
//! only consumes a deserialized [`AcquisitionConfig`] and refuses to start
//! on an invalid one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Isolation width must be positive, got {0}")]
    InvalidIsolationWidth(f64),
    #[error("MS2-per-cycle budget must be at least 1")]
    ZeroScanBudget,
    #[error("Exclusion window must be positive, got {0} s")]
    InvalidExclusionWindow(f64),
    #[error("Exclusion m/z tolerance must be positive, got {0}")]
    InvalidExclusionTolerance(f64),
    #[error("The {0:?} exclusion policy requires an override multiple greater than 1")]
    MissingOverrideMultiple(ExclusionKind),
    #[error("BoxCar partition {0} has no m/z ranges configured")]
    EmptyBoxRanges(usize),
    #[error("Watchdog window must be positive, got {0} s")]
    InvalidWatchdogWindow(f64),
}

/// Which planner state machine to run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodKind {
    #[default]
    DataDependent,
    BoxCar,
}

/// Which dynamic exclusion policy to construct.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionKind {
    /// Keyed by m/z alone
    #[default]
    Mz,
    /// Keyed by m/z and charge
    MzCharge,
    /// Keyed by m/z with an intensity override multiple
    MzIntensityOverride,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExclusionConfig {
    pub kind: ExclusionKind,
    /// How long a targeted precursor stays excluded, in seconds
    pub window_seconds: f64,
    /// Absolute m/z tolerance for matching retained records
    pub tolerance_da: f64,
    /// Required for [`ExclusionKind::MzIntensityOverride`]
    pub override_multiple: Option<f64>,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            kind: ExclusionKind::Mz,
            window_seconds: 30.0,
            tolerance_da: 0.01,
            override_multiple: None,
        }
    }
}

/// Driver-facing parameter preset for survey (MS1) scans. Values are opaque
/// strings handed to the instrument verbatim.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SurveyPreset {
    pub first_mass: String,
    pub last_mass: String,
    pub polarity: String,
    pub resolution: String,
    pub agc_target: String,
    pub max_injection_time: String,
    pub microscans: String,
}

impl Default for SurveyPreset {
    fn default() -> Self {
        Self {
            first_mass: "350".into(),
            last_mass: "1400".into(),
            polarity: "0".into(),
            resolution: "70000".into(),
            agc_target: "3000000".into(),
            max_injection_time: "50".into(),
            microscans: "1".into(),
        }
    }
}

/// Driver-facing parameter preset for fragmentation (MS2) scans.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FragmentationPreset {
    pub first_mass: String,
    pub last_mass: String,
    pub polarity: String,
    pub nce: String,
    pub resolution: String,
    pub agc_target: String,
    pub max_injection_time: String,
    pub microscans: String,
}

impl Default for FragmentationPreset {
    fn default() -> Self {
        Self {
            first_mass: "100".into(),
            last_mass: "2000".into(),
            polarity: "0".into(),
            nce: "27".into(),
            resolution: "15000".into(),
            agc_target: "100000".into(),
            max_injection_time: "50".into(),
            microscans: "1".into(),
        }
    }
}

/// Multiplexed injection presets for the three BoxCar partition scans.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BoxCarPreset {
    /// One multiplexed m/z range list per partition scan
    pub ranges: Vec<String>,
    pub inject_targets: String,
    pub max_injection_times: String,
    pub inject_nces: String,
}

impl Default for BoxCarPreset {
    fn default() -> Self {
        Self {
            ranges: vec![
                "(400,426),(452,478),(504,530),(556,582),(608,634),(660,686),(712,738),(764,790),(816,842),(868,894),(920,946),(972,998)".into(),
                "(426,452),(478,504),(530,556),(582,608),(634,660),(686,712),(738,764),(790,816),(842,868),(894,920),(946,972),(998,1024)".into(),
                "(413,439),(465,491),(517,543),(569,595),(621,647),(673,699),(725,751),(777,803),(829,855),(881,907),(933,959),(985,1011)".into(),
            ],
            inject_targets: "1000000".into(),
            max_injection_times: "10".into(),
            inject_nces: "0".into(),
        }
    }
}

/// The full configuration surface consumed by [`crate::planner::build_planner`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub method: MethodKind,
    pub scans: ScanConfig,
    pub exclusion: ExclusionConfig,
    pub thresholds: ThresholdConfig,
    pub ms1: SurveyPreset,
    pub ms2: FragmentationPreset,
    pub boxcar: BoxCarPreset,
    /// Override of the method's watchdog window, in seconds
    pub watchdog_seconds: Option<f64>,
    /// Bound on the driver-readiness wait; unbounded when unset
    pub ready_timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Width of the MS2 isolation window, in Daltons
    pub isolation_width_da: f64,
    /// Upper bound on MS2 scans generated per survey cycle
    pub ms2_per_cycle: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            isolation_width_da: 2.0,
            ms2_per_cycle: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Precursors below this intensity are never targeted
    pub precursor_intensity: f64,
    /// Precursors below this intensity get a fixed injection time instead
    /// of automatic gain control
    pub precursor_agc: f64,
}

impl AcquisitionConfig {
    /// Check every field class that would make the run misbehave. Fatal at
    /// startup: the planner refuses to construct on any error here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scans.isolation_width_da > 0.0) {
            return Err(ConfigError::InvalidIsolationWidth(
                self.scans.isolation_width_da,
            ));
        }
        if self.scans.ms2_per_cycle == 0 {
            return Err(ConfigError::ZeroScanBudget);
        }
        if !(self.exclusion.window_seconds > 0.0) {
            return Err(ConfigError::InvalidExclusionWindow(
                self.exclusion.window_seconds,
            ));
        }
        if !(self.exclusion.tolerance_da > 0.0) {
            return Err(ConfigError::InvalidExclusionTolerance(
                self.exclusion.tolerance_da,
            ));
        }
        if self.exclusion.kind == ExclusionKind::MzIntensityOverride
            && !self.exclusion.override_multiple.is_some_and(|m| m > 1.0)
        {
            return Err(ConfigError::MissingOverrideMultiple(self.exclusion.kind));
        }
        if let Some(watchdog) = self.watchdog_seconds {
            if !(watchdog > 0.0) {
                return Err(ConfigError::InvalidWatchdogWindow(watchdog));
            }
        }
        if self.method == MethodKind::BoxCar {
            if self.boxcar.ranges.len() != 3 {
                return Err(ConfigError::EmptyBoxRanges(self.boxcar.ranges.len()));
            }
            for (i, ranges) in self.boxcar.ranges.iter().enumerate() {
                if ranges.is_empty() {
                    return Err(ConfigError::EmptyBoxRanges(i + 1));
                }
            }
        }
        Ok(())
    }
}
