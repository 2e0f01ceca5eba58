//! Scan request and result descriptors exchanged with the instrument.

use std::collections::HashMap;
use std::fmt;

use crate::peaks::Peak;

/// Named parameter keys understood by the instrument driver. The engine
/// writes these values but does not validate them.
pub mod keys {
    pub const FIRST_MASS: &str = "FirstMass";
    pub const LAST_MASS: &str = "LastMass";
    pub const POLARITY: &str = "Polarity";
    pub const NCE: &str = "NCE";
    pub const NCE_NORM_CHARGE: &str = "NCE_NormCharge";
    pub const RESOLUTION: &str = "Resolution";
    pub const AGC_TARGET: &str = "AGC_Target";
    pub const AGC_MODE: &str = "AGC_Mode";
    pub const MAX_INJECTION_TIME: &str = "MaxIT";
    pub const MICROSCANS: &str = "Microscans";
    pub const ISOLATION_RANGE_LOW: &str = "IsolationRangeLow";
    pub const ISOLATION_RANGE_HIGH: &str = "IsolationRangeHigh";
    pub const MSX_INJECT_RANGES: &str = "MsxInjectRanges";
    pub const MSX_INJECT_TARGET: &str = "MsxInjectTarget";
    pub const MSX_INJECT_MAX_ITS: &str = "MsxInjectMaxITs";
    pub const MSX_INJECT_NCES: &str = "MsxInjectNCEs";
    pub const SINGLE_PROCESSING_DELAY: &str = "SingleProcessingDelay";
}

/// The physical scan classes the planner schedules. BoxCar partition scans
/// carry their 1-based partition index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanKind {
    Ms1,
    Ms2,
    BoxMs1(u8),
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanKind::Ms1 => write!(f, "MS1"),
            ScanKind::Ms2 => write!(f, "MS2"),
            ScanKind::BoxMs1(i) => write!(f, "BoxMS1_{i}"),
        }
    }
}

impl ScanKind {
    /// Whether this scan contributes survey data for precursor selection
    pub fn is_survey(&self) -> bool {
        matches!(self, ScanKind::Ms1 | ScanKind::BoxMs1(_))
    }
}

/// A descriptor for one physical scan to perform.
///
/// Created by the planner, enqueued, and dequeued exactly once by the
/// submission protocol. Ids are unique and monotonically increasing per
/// planner instance and are the sole request/result correlation key.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub id: u64,
    pub kind: ScanKind,
    pub values: HashMap<String, String>,
}

impl ScanRequest {
    pub fn new(id: u64, kind: ScanKind) -> Self {
        Self {
            id,
            kind,
            values: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// A completed physical scan delivered by the instrument, including
/// unsolicited ("auto") scans the planner never requested.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub id: u64,
    /// Centroids ordered ascending by m/z
    pub centroids: Vec<Peak>,
    pub values: HashMap<String, String>,
}

impl ScanResult {
    pub fn new(id: u64, centroids: Vec<Peak>) -> Self {
        Self {
            id,
            centroids,
            values: HashMap::new(),
        }
    }
}
