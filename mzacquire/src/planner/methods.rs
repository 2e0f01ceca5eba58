//! Acquisition method variants plugged into the shared planner state
//! machine.
//!
//! The two methods differ in the shape of their survey cycle, their
//! precursor eligibility rules, and how eagerly they refresh the survey;
//! everything else lives in [`super::Planner`].

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{AcquisitionConfig, BoxCarPreset, SurveyPreset};
use crate::peaks::Peak;
use crate::scan::{keys, ScanKind, ScanRequest};

use super::IdSource;

/// Value for the single-processing-delay knob on every custom scan,
/// carried over from the observed instrument behavior.
const SINGLE_PROCESSING_DELAY: &str = "10";

/// Charge states above this fail on the instrument; higher-charge ions can
/// still be fragmented by reporting this charge instead.
const MAX_NORM_CHARGE: i32 = 5;

/// Charge assumed for precursors whose envelope never resolved one.
const DEFAULT_CHARGE: i32 = 2;

/// Variant hooks parameterizing the planner state machine: survey shape,
/// precursor eligibility, and survey refresh policy.
pub trait AcquisitionMethod: Send {
    fn name(&self) -> &'static str;

    /// How long an outstanding survey may remain unanswered before the
    /// watchdog forces resubmission
    fn watchdog_window(&self) -> Duration;

    /// Build one survey cycle's worth of requests: a single MS1, or a
    /// co-registered box set
    fn survey_requests(&self, ids: &mut IdSource) -> Vec<ScanRequest>;

    /// Absorb one routed survey-class result, returning the combined
    /// centroid list once a full survey is available
    fn absorb_survey(&mut self, kind: ScanKind, centroids: Vec<Peak>) -> Option<Vec<Peak>>;

    /// Drop any partially accumulated survey state after watchdog recovery
    fn discard_partial_survey(&mut self) {}

    /// Whether a deisotoped peak is worth ranking at all
    fn is_candidate(&self, precursor: &Peak) -> bool;

    /// The charge to fragment with, or `None` to skip the precursor
    fn resolve_charge(&self, charge: Option<i32>) -> Option<i32>;

    /// Whether the precursor falls below the configured intensity floor
    fn below_intensity_threshold(&self, _precursor: &Peak) -> bool {
        false
    }

    /// A fixed injection time (ms) replacing automatic gain control for
    /// dim precursors
    fn injection_override(&self, _intensity: f32) -> Option<f64> {
        None
    }

    /// After how many MS2s to interleave a fresh survey mid-cycle
    fn midcycle_survey_after(&self, _budget: usize) -> Option<usize> {
        None
    }

    /// Whether every cycle must end with a survey enqueued
    fn survey_at_cycle_end(&self) -> bool;
}

fn base_survey_request(ids: &mut IdSource, preset: &SurveyPreset) -> ScanRequest {
    let mut request = ScanRequest::new(ids.next_id(), ScanKind::Ms1);
    request.set(keys::SINGLE_PROCESSING_DELAY, SINGLE_PROCESSING_DELAY);
    request.set(keys::FIRST_MASS, &preset.first_mass);
    request.set(keys::LAST_MASS, &preset.last_mass);
    request.set(keys::POLARITY, &preset.polarity);
    // A zero collision energy is what marks the scan as a survey on the
    // instrument side.
    request.set(keys::NCE, "0");
    request.set(keys::RESOLUTION, &preset.resolution);
    request.set(keys::AGC_TARGET, &preset.agc_target);
    request.set(keys::MAX_INJECTION_TIME, &preset.max_injection_time);
    request.set(keys::MICROSCANS, &preset.microscans);
    request
}

/// Classic data-dependent acquisition: one full-range MS1 per cycle,
/// intensity- and AGC-thresholded precursors, charge clamped rather than
/// skipped, a mid-cycle MS1 to bound survey staleness, and a guaranteed
/// cycle-end MS1.
#[derive(Debug)]
pub struct DataDependent {
    survey_preset: SurveyPreset,
    intensity_threshold: f64,
    agc_threshold: f64,
}

impl DataDependent {
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            survey_preset: config.ms1.clone(),
            intensity_threshold: config.thresholds.precursor_intensity,
            agc_threshold: config.thresholds.precursor_agc,
        }
    }
}

impl AcquisitionMethod for DataDependent {
    fn name(&self) -> &'static str {
        "data-dependent"
    }

    fn watchdog_window(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn survey_requests(&self, ids: &mut IdSource) -> Vec<ScanRequest> {
        vec![base_survey_request(ids, &self.survey_preset)]
    }

    fn absorb_survey(&mut self, kind: ScanKind, centroids: Vec<Peak>) -> Option<Vec<Peak>> {
        match kind {
            ScanKind::Ms1 => Some(centroids),
            other => unreachable!("{other} result routed to the data-dependent planner"),
        }
    }

    fn is_candidate(&self, precursor: &Peak) -> bool {
        precursor.charge.is_some_and(|z| z > 1)
    }

    fn resolve_charge(&self, charge: Option<i32>) -> Option<i32> {
        Some(charge.unwrap_or(DEFAULT_CHARGE).min(MAX_NORM_CHARGE))
    }

    fn below_intensity_threshold(&self, precursor: &Peak) -> bool {
        (precursor.intensity as f64) < self.intensity_threshold
    }

    fn injection_override(&self, intensity: f32) -> Option<f64> {
        if (intensity as f64) < self.agc_threshold {
            Some(50.0)
        } else {
            None
        }
    }

    fn midcycle_survey_after(&self, budget: usize) -> Option<usize> {
        (budget > 4).then(|| budget - 4)
    }

    fn survey_at_cycle_end(&self) -> bool {
        true
    }
}

/// BoxCar acquisition: each survey cycle is one plain MS1 plus three
/// multiplexed partition scans sharing the cycle. Precursor selection uses
/// only the three partitions, concatenated and m/z-sorted once all three
/// arrive. Overlapping partition ranges are not de-duplicated; a precursor
/// straddling an overlap can appear twice in the combined list.
#[derive(Debug)]
pub struct BoxCar {
    survey_preset: SurveyPreset,
    boxes: BoxCarPreset,
    pending: HashMap<u8, Vec<Peak>>,
}

impl BoxCar {
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            survey_preset: config.ms1.clone(),
            boxes: config.boxcar.clone(),
            pending: HashMap::new(),
        }
    }

    fn combine_boxes(&mut self) -> Vec<Peak> {
        let mut combined: Vec<Peak> = self.pending.drain().flat_map(|(_, peaks)| peaks).collect();
        combined.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        combined
    }
}

impl AcquisitionMethod for BoxCar {
    fn name(&self) -> &'static str {
        "boxcar"
    }

    fn watchdog_window(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn survey_requests(&self, ids: &mut IdSource) -> Vec<ScanRequest> {
        let mut requests = vec![base_survey_request(ids, &self.survey_preset)];
        for (i, ranges) in self.boxes.ranges.iter().enumerate() {
            let mut request = base_survey_request(ids, &self.survey_preset);
            request.kind = ScanKind::BoxMs1(i as u8 + 1);
            request.set(keys::MSX_INJECT_RANGES, ranges);
            request.set(keys::MSX_INJECT_TARGET, &self.boxes.inject_targets);
            request.set(keys::MSX_INJECT_MAX_ITS, &self.boxes.max_injection_times);
            request.set(keys::MSX_INJECT_NCES, &self.boxes.inject_nces);
            requests.push(request);
        }
        requests
    }

    fn absorb_survey(&mut self, kind: ScanKind, centroids: Vec<Peak>) -> Option<Vec<Peak>> {
        match kind {
            // The full-range scan is written to the raw file by the
            // instrument but takes no part in precursor selection.
            ScanKind::Ms1 => {
                debug!("plain survey scan recorded, not used for selection");
                None
            }
            ScanKind::BoxMs1(partition) => {
                if self.pending.insert(partition, centroids).is_some() {
                    warn!(partition, "duplicate box partition replaced");
                }
                debug!(partition, collected = self.pending.len(), "box partition received");
                if self.pending.len() >= self.boxes.ranges.len() {
                    Some(self.combine_boxes())
                } else {
                    None
                }
            }
            other => unreachable!("{other} result routed as a survey"),
        }
    }

    fn discard_partial_survey(&mut self) {
        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "dropping partial box aggregation");
            self.pending.clear();
        }
    }

    fn is_candidate(&self, precursor: &Peak) -> bool {
        precursor.mz > 1.0
    }

    fn resolve_charge(&self, charge: Option<i32>) -> Option<i32> {
        let charge = charge.unwrap_or(DEFAULT_CHARGE);
        (charge <= MAX_NORM_CHARGE).then_some(charge)
    }

    fn survey_at_cycle_end(&self) -> bool {
        false
    }
}
