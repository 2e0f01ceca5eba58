//! The MS1 → rank → exclude → MS2 decision loop.
//!
//! [`Planner`] is one state machine parameterized by an
//! [`AcquisitionMethod`]; the host drives it through the object-safe
//! [`ScanPlanner`] capability, pulling requests with
//! [`ScanPlanner::assign_scan`] and pushing completed scans with
//! [`ScanPlanner::receive_scan`]. At most one survey (or survey box set)
//! is outstanding at any time; a watchdog forces resubmission when the
//! instrument loses one, trading a possible orphaned late result, ignored
//! on arrival, for forward progress.

mod methods;

pub use methods::{AcquisitionMethod, BoxCar, DataDependent};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use itertools::Itertools;
use tracing::{debug, info, trace, warn};

use crate::config::{AcquisitionConfig, ConfigError, ExclusionKind, FragmentationPreset, MethodKind};
use crate::deisotope::Deisotoper;
use crate::driver::RequestQueue;
use crate::exclusion::{
    ChargeExclusionList, ExclusionList, IntensityExclusionList, MzExclusionList,
};
use crate::peaks::Peak;
use crate::scan::{keys, ScanKind, ScanRequest, ScanResult};

/// Request ids start here; small running numbers carry special meaning for
/// the instrument.
const SCAN_ID_FLOOR: u64 = 10_000;

/// The host-facing planner contract.
///
/// Both entry points are invoked under one external lock (see
/// [`crate::driver::PlannerHandle`]); the planner itself is free of
/// interior synchronization.
pub trait ScanPlanner: Send {
    /// Restart the run clock and forget any per-run state
    fn initialize(&mut self);

    /// Pop the next request to submit, synthesizing a survey cycle when
    /// the queue runs dry. `None` means not ready: poll again.
    fn assign_scan(&mut self) -> Option<ScanRequest>;

    /// Deliver one completed physical scan, solicited or not
    fn receive_scan(&mut self, result: ScanResult);

    /// Report end-of-run statistics
    fn cleanup(&mut self);
}

/// Monotonically increasing request id allocator, adjusted upward whenever
/// the instrument reports an id at or past the counter.
#[derive(Debug)]
pub struct IdSource {
    next: u64,
}

impl Default for IdSource {
    fn default() -> Self {
        Self {
            next: SCAN_ID_FLOOR,
        }
    }
}

impl IdSource {
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Returns `true` when the observed id forced the counter forward
    pub fn observe(&mut self, id: u64) -> bool {
        if id >= self.next {
            self.next = id + 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunStats {
    surveys_processed: u64,
    ms2_generated: u64,
    results_ignored: u64,
    watchdog_recoveries: u64,
}

/// Scoring key for ranking precursors: descending intensity, with singly
/// charged ions heavily discounted.
fn rank_score(peak: &Peak) -> f64 {
    let intensity = peak.intensity as f64;
    if peak.charge == Some(1) {
        intensity / 1e6
    } else {
        intensity
    }
}

fn rank_precursors(candidates: Vec<Peak>) -> Vec<Peak> {
    candidates
        .into_iter()
        .sorted_unstable_by(|a, b| rank_score(b).total_cmp(&rank_score(a)))
        .collect()
}

fn build_exclusion_list(config: &AcquisitionConfig) -> Box<dyn ExclusionList> {
    let window = Duration::from_secs_f64(config.exclusion.window_seconds);
    let tolerance = config.exclusion.tolerance_da;
    match config.exclusion.kind {
        ExclusionKind::Mz => Box::new(MzExclusionList::new(window, tolerance)),
        ExclusionKind::MzCharge => Box::new(ChargeExclusionList::new(window, tolerance)),
        ExclusionKind::MzIntensityOverride => Box::new(IntensityExclusionList::new(
            window,
            tolerance,
            // Presence is guaranteed by configuration validation.
            config.exclusion.override_multiple.unwrap_or(f64::INFINITY),
        )),
    }
}

/// The planner state machine shared by every acquisition method.
pub struct Planner<M: AcquisitionMethod> {
    method: M,
    deisotoper: Deisotoper,
    queue: RequestQueue,
    routes: HashMap<u64, ScanKind>,
    ids: IdSource,
    exclusion: Box<dyn ExclusionList>,
    isolation_width: f64,
    ms2_budget: usize,
    ms2_preset: FragmentationPreset,
    watchdog: Duration,
    run_timer: Instant,
    survey_outstanding: bool,
    survey_sent_at: Option<Instant>,
    outstanding_survey_ids: Vec<u64>,
    stats: RunStats,
}

pub type DataDependentPlanner = Planner<DataDependent>;
pub type BoxCarPlanner = Planner<BoxCar>;

/// Construct the planner variant named by the configuration, refusing to
/// start on an invalid configuration.
pub fn build_planner(config: &AcquisitionConfig) -> Result<Box<dyn ScanPlanner>, ConfigError> {
    match config.method {
        MethodKind::DataDependent => Ok(Box::new(Planner::from_config(
            config,
            DataDependent::from_config(config),
        )?)),
        MethodKind::BoxCar => Ok(Box::new(Planner::from_config(
            config,
            BoxCar::from_config(config),
        )?)),
    }
}

impl<M: AcquisitionMethod> Planner<M> {
    pub fn from_config(config: &AcquisitionConfig, method: M) -> Result<Self, ConfigError> {
        config.validate()?;
        let watchdog = config
            .watchdog_seconds
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| method.watchdog_window());
        info!(
            method = method.name(),
            watchdog = ?watchdog,
            budget = config.scans.ms2_per_cycle,
            "planner constructed"
        );
        Ok(Self {
            method,
            deisotoper: Deisotoper::default(),
            queue: RequestQueue::new(),
            routes: HashMap::new(),
            ids: IdSource::default(),
            exclusion: build_exclusion_list(config),
            isolation_width: config.scans.isolation_width_da,
            ms2_budget: config.scans.ms2_per_cycle,
            ms2_preset: config.ms2.clone(),
            watchdog,
            run_timer: Instant::now(),
            survey_outstanding: false,
            survey_sent_at: None,
            outstanding_survey_ids: Vec::new(),
            stats: RunStats::default(),
        })
    }

    /// A clone of the queue's handles for concurrent inspection
    pub fn queue(&self) -> RequestQueue {
        self.queue.clone()
    }

    fn elapsed(&self) -> Duration {
        self.run_timer.elapsed()
    }

    fn watchdog_expired(&self) -> bool {
        self.survey_sent_at
            .is_some_and(|sent| sent.elapsed() > self.watchdog)
    }

    fn enqueue_survey(&mut self, reason: &str) {
        let requests = self.method.survey_requests(&mut self.ids);
        self.outstanding_survey_ids = requests.iter().map(|r| r.id).collect();
        for request in requests {
            self.routes.insert(request.id, request.kind);
            self.queue.push(request);
        }
        self.survey_outstanding = true;
        self.survey_sent_at = Some(Instant::now());
        info!(
            elapsed = ?self.elapsed(),
            ids = ?self.outstanding_survey_ids,
            "survey enqueued ({reason})"
        );
    }

    /// Recoverable lost-scan event: stop waiting for the stale survey and
    /// retire its routing entries so a late arrival falls into the
    /// ignored-unrouted path.
    fn invalidate_outstanding_survey(&mut self) {
        for id in self.outstanding_survey_ids.drain(..) {
            self.routes.remove(&id);
        }
        self.method.discard_partial_survey();
        self.survey_outstanding = false;
        self.survey_sent_at = None;
        self.stats.watchdog_recoveries += 1;
    }

    fn process_survey(&mut self, centroids: Vec<Peak>) {
        let molecular_peaks = self.deisotoper.deisotope(&centroids);
        let candidates: Vec<Peak> = molecular_peaks
            .into_iter()
            .filter(|p| self.method.is_candidate(p))
            .collect();
        info!(
            elapsed = ?self.elapsed(),
            centroids = centroids.len(),
            precursors = candidates.len(),
            "survey deisotoped"
        );
        let ranked = rank_precursors(candidates);
        self.generate_ms2s(ranked);
        self.stats.surveys_processed += 1;
    }

    fn generate_ms2s(&mut self, ranked: Vec<Peak>) {
        let now = self.elapsed();
        self.exclusion.unexclude(now);

        let total = ranked.len();
        let midcycle_after = self.method.midcycle_survey_after(self.ms2_budget);
        let mut generated = 0usize;
        let mut survey_resubmitted = false;

        for precursor in ranked {
            if generated >= self.ms2_budget {
                break;
            }
            if precursor.mz == 0.0 {
                continue;
            }
            if self.method.below_intensity_threshold(&precursor) {
                continue;
            }
            if self.exclusion.is_excluded(now, &precursor) {
                continue;
            }
            let Some(charge) = self.method.resolve_charge(precursor.charge) else {
                continue;
            };

            self.exclusion.exclude(now, &precursor);
            let request = self.fragmentation_request(&precursor, charge);
            debug!(
                id = request.id,
                mz = precursor.mz,
                charge,
                intensity = precursor.intensity,
                "fragmentation scan queued"
            );
            self.routes.insert(request.id, ScanKind::Ms2);
            self.queue.push(request);
            generated += 1;

            if !survey_resubmitted && midcycle_after.is_some_and(|n| generated >= n) {
                self.enqueue_survey("midcycle");
                survey_resubmitted = true;
            }
        }

        if self.method.survey_at_cycle_end() && !survey_resubmitted {
            self.enqueue_survey("postcycle");
        }
        info!(
            submitted = generated,
            of = total,
            queued = self.queue.len(),
            "fragmentation cycle complete"
        );
        self.stats.ms2_generated += generated as u64;
    }

    fn fragmentation_request(&mut self, precursor: &Peak, charge: i32) -> ScanRequest {
        let mut request = ScanRequest::new(self.ids.next_id(), ScanKind::Ms2);
        let preset = &self.ms2_preset;
        request.set(keys::SINGLE_PROCESSING_DELAY, "10");
        request.set(
            keys::ISOLATION_RANGE_LOW,
            precursor.mz - self.isolation_width / 2.0,
        );
        request.set(
            keys::ISOLATION_RANGE_HIGH,
            precursor.mz + self.isolation_width / 2.0,
        );
        request.set(keys::FIRST_MASS, &preset.first_mass);
        request.set(keys::LAST_MASS, &preset.last_mass);
        request.set(keys::POLARITY, &preset.polarity);
        request.set(keys::NCE, &preset.nce);
        request.set(keys::NCE_NORM_CHARGE, charge);
        request.set(keys::RESOLUTION, &preset.resolution);
        request.set(keys::MICROSCANS, &preset.microscans);
        match self.method.injection_override(precursor.intensity) {
            Some(max_it) => {
                request.set(keys::AGC_MODE, "0");
                request.set(keys::MAX_INJECTION_TIME, max_it);
            }
            None => {
                request.set(keys::AGC_TARGET, &preset.agc_target);
                request.set(keys::MAX_INJECTION_TIME, &preset.max_injection_time);
            }
        }
        request
    }
}

impl<M: AcquisitionMethod> ScanPlanner for Planner<M> {
    fn initialize(&mut self) {
        self.queue.clear();
        self.routes.clear();
        self.outstanding_survey_ids.clear();
        self.method.discard_partial_survey();
        self.survey_outstanding = false;
        self.survey_sent_at = None;
        self.stats = RunStats::default();
        self.run_timer = Instant::now();
        info!(method = self.method.name(), "planner initialized");
    }

    fn assign_scan(&mut self) -> Option<ScanRequest> {
        if self.queue.is_empty() && self.survey_outstanding && self.watchdog_expired() {
            warn!(
                elapsed = ?self.elapsed(),
                stale = ?self.outstanding_survey_ids,
                "survey overdue, forcing resubmission"
            );
            self.invalidate_outstanding_survey();
        }

        let popped = self.queue.try_pop().or_else(|| {
            if self.survey_outstanding {
                None
            } else {
                self.enqueue_survey("queue empty");
                self.queue.try_pop()
            }
        });

        match popped {
            Some(request) => {
                debug!(id = request.id, kind = %request.kind, "assigning scan");
                Some(request)
            }
            None => {
                trace!("no scan ready for assignment");
                None
            }
        }
    }

    fn receive_scan(&mut self, result: ScanResult) {
        if self.ids.observe(result.id) {
            info!(id = result.id, "id counter adjusted past received result");
        }

        let Some(kind) = self.routes.remove(&result.id) else {
            // Auto-scans and already-recovered ids land here; not an error.
            debug!(id = result.id, "ignoring unrouted scan result");
            self.stats.results_ignored += 1;
            return;
        };
        debug!(id = result.id, kind = %kind, "received scan result");

        match kind {
            ScanKind::Ms2 => {}
            kind => {
                self.outstanding_survey_ids.retain(|id| *id != result.id);
                if let Some(survey) = self.method.absorb_survey(kind, result.centroids) {
                    self.survey_outstanding = false;
                    self.process_survey(survey);
                }
            }
        }
    }

    fn cleanup(&mut self) {
        info!(
            elapsed = ?self.elapsed(),
            surveys = self.stats.surveys_processed,
            ms2s = self.stats.ms2_generated,
            ignored = self.stats.results_ignored,
            recoveries = self.stats.watchdog_recoveries,
            "run finished"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_id_source_monotonic() {
        let mut ids = IdSource::default();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a, SCAN_ID_FLOOR);
        assert!(b > a);
    }

    #[test]
    fn test_id_source_adjusts_forward_only() {
        let mut ids = IdSource::default();
        assert!(ids.observe(50_000));
        assert_eq!(ids.next_id(), 50_001);
        assert!(!ids.observe(20_000));
        assert_eq!(ids.next_id(), 50_002);
    }

    #[test]
    fn test_rank_discounts_singly_charged() {
        let ranked = rank_precursors(vec![
            Peak::new(300.0, 5e7, Some(1)),
            Peak::new(400.0, 1e6, Some(2)),
            Peak::new(500.0, 2e6, Some(3)),
        ]);
        assert_eq!(ranked[0].mz, 500.0);
        assert_eq!(ranked[1].mz, 400.0);
        assert_eq!(ranked[2].mz, 300.0);
    }
}
