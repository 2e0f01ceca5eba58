//! Streaming deisotoping of centroided spectra.
//!
//! A single forward pass over an m/z-sorted centroid list grows a set of
//! candidate isotope [`Envelope`]s. Each centroid is offered to every still
//! active envelope; envelopes whose expected next position falls behind the
//! cursor are retired, and envelopes retired with too few members release
//! their trailing peaks to seed fresh candidates. Kept envelopes report
//! their root (monoisotopic) peak tagged with the inferred charge.

use mzpeaks::Tolerance;

use crate::peaks::Peak;

/// The mass of a neutron in Daltons, the spacing of an isotope series at
/// charge 1.
pub const NEUTRON_MASS: f64 = 1.008664;

/// The highest charge state considered when assigning an envelope's charge.
pub const MAX_CHARGE: i32 = 8;

/// Acceptable (previous peak / candidate peak) intensity ratio bands by
/// isotopic peak index, calculated over extreme peptide compositions at
/// lengths below ~20 residues. Index 0 is the charge-independent band used
/// before an envelope has a charge assigned.
const ISOTOPIC_RATIOS: [(f64, f64); 10] = [
    (0.5, 16.2),
    (1.0, 9.7),
    (1.0, 20.7),
    (1.0, 21.2),
    (1.0, 30.0),
    (1.5, 25.2),
    (1.5, 24.0),
    (2.0, 22.2),
    (3.0, 20.0),
    (3.4, 17.0),
];

#[inline]
fn charge_spacing(charge: i32) -> f64 {
    NEUTRON_MASS / charge as f64
}

/// A run of centroids believed to belong to one ion's isotope series.
///
/// Peaks are held in ascending index order with index 0 the monoisotopic
/// root. The charge, once assigned, never changes.
#[derive(Debug, Clone)]
pub struct Envelope {
    peaks: Vec<Peak>,
    charge: Option<i32>,
    next_mz: f64,
    scope: f64,
    active: bool,
}

impl Envelope {
    fn new(root: Peak, tolerance: f64) -> Self {
        // Before a charge is known the widest spacing, charge 1, bounds
        // where the second peak could still appear.
        let scope = root.mz + charge_spacing(1) + tolerance;
        Self {
            peaks: vec![root],
            charge: None,
            next_mz: 0.0,
            scope,
            active: true,
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn charge(&self) -> Option<i32> {
        self.charge
    }

    fn ratio_accepts(&self, candidate: &Peak, band_index: usize) -> bool {
        let Some((lo, hi)) = ISOTOPIC_RATIOS.get(band_index).copied() else {
            // Longer series than the band table covers; stop extending.
            return false;
        };
        let last = self.peaks.last().expect("envelope always has a root");
        let ratio = last.intensity as f64 / candidate.intensity as f64;
        ratio > lo && ratio < hi
    }

    /// Offer `candidate` to this envelope. Returns `true` when accepted.
    /// A candidate beyond the envelope's m/z scope deactivates it, which is
    /// sound because the input stream is sorted by m/z.
    fn try_add(&mut self, candidate: &Peak, tolerance: f64) -> bool {
        if candidate.mz > self.scope {
            self.active = false;
            return false;
        }

        match self.charge {
            None => {
                let tol = Tolerance::Da(tolerance);
                for charge in 1..=MAX_CHARGE {
                    let expected = self.peaks[0].mz + charge_spacing(charge);
                    if tol.test(candidate.mz, expected) && self.ratio_accepts(candidate, 0) {
                        self.charge = Some(charge);
                        self.peaks.push(*candidate);
                        self.next_mz = candidate.mz + charge_spacing(charge);
                        self.scope = self.next_mz + tolerance;
                        return true;
                    }
                }
                false
            }
            Some(charge) => {
                let band = self.peaks.len() - 1;
                if Tolerance::Da(tolerance).test(candidate.mz, self.next_mz)
                    && self.ratio_accepts(candidate, band)
                {
                    self.peaks.push(*candidate);
                    self.next_mz = candidate.mz + charge_spacing(charge);
                    self.scope = self.next_mz + tolerance;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// The monoisotopic peak annotated with the envelope's charge
    fn monoisotopic(&self) -> Peak {
        self.peaks[0].with_charge(self.charge)
    }
}

/// Streaming deisotoper parameters.
#[derive(Debug, Clone, Copy)]
pub struct Deisotoper {
    /// Absolute m/z tolerance for matching an expected isotope position
    pub mz_tolerance: f64,
    /// Envelopes with fewer member peaks than this never reach the output
    pub minimum_required_peaks: usize,
}

impl Default for Deisotoper {
    fn default() -> Self {
        Self {
            mz_tolerance: 0.01,
            minimum_required_peaks: 3,
        }
    }
}

impl Deisotoper {
    pub fn new(mz_tolerance: f64, minimum_required_peaks: usize) -> Self {
        Self {
            mz_tolerance,
            minimum_required_peaks,
        }
    }

    /// Group an m/z-sorted centroid list into isotope envelopes and report
    /// one monoisotopic [`Peak`] per kept envelope, tagged with the
    /// inferred charge.
    pub fn deisotope(&self, scan: &[Peak]) -> Vec<Peak> {
        let mut active: Vec<Envelope> = Vec::new();
        let mut finished: Vec<Envelope> = Vec::new();

        for candidate in scan {
            let mut assigned = false;
            for envelope in active.iter_mut() {
                if !envelope.active {
                    continue;
                }
                if envelope.try_add(candidate, self.mz_tolerance) {
                    assigned = true;
                    break;
                }
            }

            if assigned {
                continue;
            }

            // Sweep out the envelopes the cursor has passed. Ones that grew
            // large enough are kept; the rest are demoted, discarding the
            // root and re-seeding single-peak envelopes from the remainder,
            // the first of which may capture the triggering centroid.
            let mut recovered = false;
            let (still_active, retired): (Vec<_>, Vec<_>) =
                active.drain(..).partition(|e| e.active);
            active = still_active;
            for envelope in retired {
                if envelope.len() >= self.minimum_required_peaks {
                    finished.push(envelope);
                } else {
                    for peak in envelope.peaks.into_iter().skip(1) {
                        let mut reseeded = Envelope::new(peak, self.mz_tolerance);
                        if !recovered {
                            recovered = reseeded.try_add(candidate, self.mz_tolerance);
                        }
                        active.push(reseeded);
                    }
                }
            }
            if !recovered {
                active.push(Envelope::new(*candidate, self.mz_tolerance));
            }
        }

        finished.extend(
            active
                .into_iter()
                .filter(|e| e.len() >= self.minimum_required_peaks),
        );

        finished.iter().map(Envelope::monoisotopic).collect()
    }
}

/// Deisotope with the default tolerance and minimum envelope size.
pub fn deisotope_scan(scan: &[Peak]) -> Vec<Peak> {
    Deisotoper::default().deisotope(scan)
}
