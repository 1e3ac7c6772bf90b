use rand::{Rng, SeedableRng, rngs::StdRng};

/// Stand-in for a real temperature probe. Every reading is drawn uniformly
/// from the inclusive range `[min, max]`.
#[derive(Debug)]
pub struct Sensor<R = StdRng> {
    rng: R,
    min: f64,
    max: f64,
}

impl Sensor<StdRng> {
    pub fn new(min: f64, max: f64, seed: Option<u64>) -> Result<Self, anyhow::Error> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(rng, min, max)
    }
}

impl<R: Rng> Sensor<R> {
    pub fn with_rng(rng: R, min: f64, max: f64) -> Result<Self, anyhow::Error> {
        anyhow::ensure!(
            min.is_finite() && max.is_finite(),
            "Temperature bounds must be finite, got {min} and {max}"
        );
        anyhow::ensure!(
            min <= max,
            "Minimum temperature {min} is greater than maximum {max}"
        );
        anyhow::ensure!(
            (max - min).is_finite(),
            "Temperature range [{min}, {max}] is too wide"
        );

        Ok(Self { rng, min, max })
    }

    pub fn measure(&mut self) -> f64 {
        self.rng.gen_range(self.min..=self.max)
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(min: f64, max: f64, seed: u64) -> Result<Sensor, anyhow::Error> {
        Sensor::new(min, max, Some(seed))
    }

    #[test]
    fn test_readings_stay_in_range() {
        let mut sensor = seeded(20.0, 30.0, 42).unwrap();
        for _ in 0..1000 {
            let t = sensor.measure();
            assert!((20.0..=30.0).contains(&t), "{t} out of range");
        }
    }

    #[test]
    fn test_same_seed_same_readings() {
        let mut a = seeded(20.0, 30.0, 7).unwrap();
        let mut b = seeded(20.0, 30.0, 7).unwrap();
        for _ in 0..10 {
            assert_eq!(a.measure(), b.measure());
        }
    }

    #[test]
    fn test_degenerate_range() {
        let mut sensor = seeded(25.0, 25.0, 1).unwrap();
        assert_eq!(sensor.measure(), 25.0);
    }

    #[test]
    fn test_rejects_inverted_range() {
        assert!(Sensor::new(30.0, 20.0, None).is_err());
        assert!(Sensor::new(f64::NAN, 20.0, None).is_err());
        assert!(Sensor::new(-1e308, 1e308, None).is_err());
    }
}
