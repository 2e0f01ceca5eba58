//! Dynamic exclusion of recently targeted precursors.
//!
//! Each policy retains records of precursors selected for fragmentation
//! along with an expiry stamp measured against elapsed run time. Eviction
//! is lazy: [`ExclusionList::unexclude`] must run before each query cycle,
//! records are never removed inside [`ExclusionList::is_excluded`].

use std::time::Duration;

use mzpeaks::Tolerance;
use tracing::debug;

use crate::peaks::Peak;

/// The dynamic exclusion capability shared by all policy variants.
///
/// The variant is chosen once at planner construction and never switched
/// mid-run.
pub trait ExclusionList: Send {
    /// Evict every record whose expiry has passed by `now`
    fn unexclude(&mut self, now: Duration);

    /// Record `precursor` as excluded until `now` plus the exclusion window
    fn exclude(&mut self, now: Duration, precursor: &Peak);

    /// Whether a retained record suppresses `precursor`
    fn is_excluded(&self, now: Duration, precursor: &Peak) -> bool;

    /// Number of live records, counting any not yet lazily evicted
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn log_eviction(evicted: usize, before: usize) {
    if evicted > 0 {
        debug!("unexcluding {evicted} of {before}");
    }
}

/// Excludes on m/z alone: any retained m/z within tolerance suppresses a
/// candidate regardless of charge or intensity.
#[derive(Debug)]
pub struct MzExclusionList {
    tolerance: f64,
    window: Duration,
    records: Vec<(f64, Duration)>,
}

impl MzExclusionList {
    pub fn new(window: Duration, tolerance: f64) -> Self {
        Self {
            tolerance,
            window,
            records: Vec::new(),
        }
    }
}

impl ExclusionList for MzExclusionList {
    fn unexclude(&mut self, now: Duration) {
        let before = self.records.len();
        self.records.retain(|(_, expiry)| *expiry > now);
        log_eviction(before - self.records.len(), before);
    }

    fn exclude(&mut self, now: Duration, precursor: &Peak) {
        let expiry = now + self.window;
        match self.records.iter_mut().find(|(mz, _)| *mz == precursor.mz) {
            Some(record) => record.1 = expiry,
            None => self.records.push((precursor.mz, expiry)),
        }
    }

    fn is_excluded(&self, _now: Duration, precursor: &Peak) -> bool {
        let tol = Tolerance::Da(self.tolerance);
        self.records.iter().any(|(mz, _)| tol.test(precursor.mz, *mz))
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Excludes on m/z and charge: a retained record suppresses a candidate at
/// the same m/z when its charge is unknown or equal to the candidate's.
#[derive(Debug)]
pub struct ChargeExclusionList {
    tolerance: f64,
    window: Duration,
    records: Vec<(Peak, Duration)>,
}

impl ChargeExclusionList {
    pub fn new(window: Duration, tolerance: f64) -> Self {
        Self {
            tolerance,
            window,
            records: Vec::new(),
        }
    }
}

impl ExclusionList for ChargeExclusionList {
    fn unexclude(&mut self, now: Duration) {
        let before = self.records.len();
        self.records.retain(|(_, expiry)| *expiry > now);
        log_eviction(before - self.records.len(), before);
    }

    fn exclude(&mut self, now: Duration, precursor: &Peak) {
        let expiry = now + self.window;
        match self.records.iter_mut().find(|(peak, _)| peak == precursor) {
            Some(record) => record.1 = expiry,
            None => self.records.push((*precursor, expiry)),
        }
    }

    fn is_excluded(&self, _now: Duration, precursor: &Peak) -> bool {
        let tol = Tolerance::Da(self.tolerance);
        self.records.iter().any(|(peak, _)| {
            tol.test(precursor.mz, peak.mz)
                && (peak.charge.is_none() || peak.charge == precursor.charge)
        })
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Excludes on m/z unless the rediscovery is far more intense: a candidate
/// whose intensity divided by the override multiple still falls at or below
/// the retained intensity stays excluded; a sufficiently brighter
/// rediscovery bypasses the record.
#[derive(Debug)]
pub struct IntensityExclusionList {
    tolerance: f64,
    window: Duration,
    override_multiple: f64,
    records: Vec<(Peak, Duration)>,
}

impl IntensityExclusionList {
    pub fn new(window: Duration, tolerance: f64, override_multiple: f64) -> Self {
        Self {
            tolerance,
            window,
            override_multiple,
            records: Vec::new(),
        }
    }
}

impl ExclusionList for IntensityExclusionList {
    fn unexclude(&mut self, now: Duration) {
        let before = self.records.len();
        self.records.retain(|(_, expiry)| *expiry > now);
        log_eviction(before - self.records.len(), before);
    }

    fn exclude(&mut self, now: Duration, precursor: &Peak) {
        let expiry = now + self.window;
        match self.records.iter_mut().find(|(peak, _)| peak == precursor) {
            Some(record) => record.1 = expiry,
            None => self.records.push((*precursor, expiry)),
        }
    }

    fn is_excluded(&self, _now: Duration, precursor: &Peak) -> bool {
        let tol = Tolerance::Da(self.tolerance);
        let overpower = precursor.intensity as f64 / self.override_multiple;
        self.records.iter().any(|(peak, _)| {
            tol.test(precursor.mz, peak.mz) && overpower < peak.intensity as f64
        })
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn test_mz_exclusion_window() {
        let mut list = MzExclusionList::new(Duration::from_secs(10), 0.01);
        let precursor = Peak::new(500.0, 1e6, Some(2));
        list.exclude(Duration::ZERO, &precursor);

        let nearby = Peak::new(500.005, 3e5, Some(3));
        assert!(list.is_excluded(SEC, &nearby));

        // Before the window elapses nothing is evicted.
        list.unexclude(Duration::from_secs(9));
        assert!(list.is_excluded(Duration::from_secs(9), &nearby));

        list.unexclude(Duration::from_secs(10));
        assert!(!list.is_excluded(Duration::from_secs(10), &nearby));
        assert!(list.is_empty());
    }

    #[test]
    fn test_mz_exclusion_ignores_charge() {
        let mut list = MzExclusionList::new(Duration::from_secs(10), 0.01);
        list.exclude(Duration::ZERO, &Peak::new(500.0, 1e6, Some(2)));
        assert!(list.is_excluded(SEC, &Peak::new(500.0, 1e6, Some(4))));
    }

    #[test]
    fn test_charge_exclusion_distinguishes_charges() {
        let mut list = ChargeExclusionList::new(Duration::from_secs(10), 0.01);
        list.exclude(Duration::ZERO, &Peak::new(500.0, 1e6, Some(2)));
        assert!(list.is_excluded(SEC, &Peak::new(500.0, 1e6, Some(2))));
        assert!(!list.is_excluded(SEC, &Peak::new(500.0, 1e6, Some(3))));
    }

    #[test]
    fn test_charge_exclusion_unknown_charge_excludes_all() {
        let mut list = ChargeExclusionList::new(Duration::from_secs(10), 0.01);
        list.exclude(Duration::ZERO, &Peak::new(500.0, 1e6, None));
        assert!(list.is_excluded(SEC, &Peak::new(500.0, 1e6, Some(2))));
        assert!(list.is_excluded(SEC, &Peak::new(500.0, 1e6, Some(5))));
    }

    #[test]
    fn test_intensity_override() {
        let mut list = IntensityExclusionList::new(Duration::from_secs(10), 0.01, 10.0);
        list.exclude(Duration::ZERO, &Peak::new(500.0, 1e5, Some(2)));

        // Same brightness: still excluded.
        assert!(list.is_excluded(SEC, &Peak::new(500.0, 1e5, Some(2))));
        // A hundredfold brighter rediscovery overrides the record.
        assert!(!list.is_excluded(SEC, &Peak::new(500.0, 1e7, Some(2))));
    }

    #[test]
    fn test_re_exclusion_extends_expiry() {
        let mut list = MzExclusionList::new(Duration::from_secs(10), 0.01);
        let precursor = Peak::new(500.0, 1e6, Some(2));
        list.exclude(Duration::ZERO, &precursor);
        list.exclude(Duration::from_secs(8), &precursor);
        assert_eq!(list.len(), 1);

        list.unexclude(Duration::from_secs(12));
        assert!(list.is_excluded(Duration::from_secs(12), &precursor));
    }
}
