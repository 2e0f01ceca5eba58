//! The centroid peak value type shared across the engine.

use mzpeaks::{CoordinateLike, IntensityMeasurement, MZ};

/// A single detected centroid, optionally annotated with a charge state
/// once one has been inferred or reported by the instrument.
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f32,
    pub charge: Option<i32>,
}

impl Peak {
    pub fn new(mz: f64, intensity: f32, charge: Option<i32>) -> Self {
        Self {
            mz,
            intensity,
            charge,
        }
    }

    /// Replace the charge annotation, consuming the peak
    pub fn with_charge(mut self, charge: Option<i32>) -> Self {
        self.charge = charge;
        self
    }
}

impl CoordinateLike<MZ> for Peak {
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for Peak {
    fn intensity(&self) -> f32 {
        self.intensity
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_orders_by_mz_first() {
        let dim = Peak::new(400.0, 1.0, None);
        let bright = Peak::new(400.0, 9e9, Some(4));
        assert!(dim < bright);
        assert!(bright < Peak::new(500.0, 1.0, None));
    }

    #[test]
    fn test_coordinate_is_mz() {
        let peak = Peak::new(400.0, 250.0, None);
        assert_eq!(CoordinateLike::<MZ>::coordinate(&peak), 400.0);
        assert_eq!(IntensityMeasurement::intensity(&peak), 250.0);
    }
}
