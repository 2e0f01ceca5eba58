//! A fake mass spectrometer: accepts scan requests and synthesizes
//! plausible centroid lists for them.

use std::time::Duration;

use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use mzacquire::driver::ScanSink;
use mzacquire::peaks::Peak;
use mzacquire::scan::{keys, ScanKind, ScanRequest, ScanResult};

/// Roughly how long one scan takes on the simulated hardware.
pub const SCAN_TIME: Duration = Duration::from_millis(30);

fn field_or(request: &ScanRequest, key: &str, fallback: f64) -> f64 {
    request
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Simulated instrument state. Submissions are answered immediately
/// through the result channel; pacing is the caller's concern.
pub struct SimulatedInstrument {
    rng: StdRng,
    results: Sender<ScanResult>,
    /// Probability that a submission is transiently refused
    rejection_rate: f64,
    scans_acquired: u64,
}

impl SimulatedInstrument {
    pub fn new(seed: u64, results: Sender<ScanResult>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            results,
            rejection_rate: 0.02,
            scans_acquired: 0,
        }
    }

    pub fn scans_acquired(&self) -> u64 {
        self.scans_acquired
    }

    /// One isotope series with step ratios inside the bands a peptide of
    /// ordinary composition would produce.
    fn synthesize_envelope(&mut self, centroids: &mut Vec<Peak>, low: f64, high: f64) {
        let root_mz = self.rng.gen_range(low..high);
        let charge = self.rng.gen_range(1..=4);
        let spacing = 1.008664 / charge as f64;
        let mut intensity = 10f32.powf(self.rng.gen_range(4.0f32..7.0));
        let n_peaks = self.rng.gen_range(3..=6);
        for i in 0..n_peaks {
            centroids.push(Peak::new(root_mz + spacing * i as f64, intensity, None));
            intensity /= self.rng.gen_range(1.2f32..3.0);
        }
    }

    fn survey_spectrum(&mut self, request: &ScanRequest) -> Vec<Peak> {
        let low = field_or(request, keys::FIRST_MASS, 350.0);
        let high = field_or(request, keys::LAST_MASS, 1400.0);
        let n_envelopes = self.rng.gen_range(20..60);
        let mut centroids = Vec::new();
        for _ in 0..n_envelopes {
            self.synthesize_envelope(&mut centroids, low, high);
        }
        centroids.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        centroids
    }

    /// Fragment spectra are noise below the isolation window; the planner
    /// never inspects them, they only exercise the result path.
    fn fragment_spectrum(&mut self, request: &ScanRequest) -> Vec<Peak> {
        let ceiling = field_or(request, keys::ISOLATION_RANGE_HIGH, 1400.0);
        let mut centroids: Vec<Peak> = (0..self.rng.gen_range(10..40))
            .map(|_| {
                Peak::new(
                    self.rng.gen_range(100.0..ceiling),
                    10f32.powf(self.rng.gen_range(2.0f32..5.0)),
                    None,
                )
            })
            .collect();
        centroids.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        centroids
    }
}

impl ScanSink for SimulatedInstrument {
    fn submit(&mut self, request: &ScanRequest) -> bool {
        if self.rng.gen_bool(self.rejection_rate) {
            trace!(id = request.id, "instrument busy, refusing submission");
            return false;
        }

        let centroids = match request.kind {
            ScanKind::Ms2 => self.fragment_spectrum(request),
            _ => self.survey_spectrum(request),
        };
        debug!(
            id = request.id,
            kind = %request.kind,
            centroids = centroids.len(),
            "scan acquired"
        );
        self.scans_acquired += 1;
        self.results.send(ScanResult::new(request.id, centroids)).is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_survey_centroids_sorted_and_in_range() {
        let (tx, rx) = unbounded();
        let mut instrument = SimulatedInstrument::new(42, tx);
        instrument.rejection_rate = 0.0;

        let mut request = ScanRequest::new(10_000, ScanKind::Ms1);
        request.set(keys::FIRST_MASS, "350");
        request.set(keys::LAST_MASS, "1400");
        assert!(instrument.submit(&request));

        let result = rx.recv().unwrap();
        assert_eq!(result.id, 10_000);
        assert!(result
            .centroids
            .windows(2)
            .all(|w| w[0].mz <= w[1].mz));
        assert!(result.centroids.iter().all(|p| p.mz >= 350.0));
    }

    #[test]
    fn test_seed_determinism() {
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        let mut a = SimulatedInstrument::new(7, tx_a);
        let mut b = SimulatedInstrument::new(7, tx_b);
        a.rejection_rate = 0.0;
        b.rejection_rate = 0.0;

        let request = ScanRequest::new(10_000, ScanKind::Ms1);
        a.submit(&request);
        b.submit(&request);
        assert_eq!(rx_a.recv().unwrap().centroids, rx_b.recv().unwrap().centroids);
    }
}
