use crate::error::ConfigError;

/// A hyperparameter that may change as episodes complete
pub trait Decay {
    /// Value after `t` completed episodes
    fn evaluate(&self, t: f64) -> f64;
}

impl<D: Decay + ?Sized> Decay for Box<D> {
    fn evaluate(&self, t: f64) -> f64 {
        (**self).evaluate(t)
    }
}

/// A constant value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constant {
    value: f64,
}

impl Constant {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Decay for Constant {
    fn evaluate(&self, _t: f64) -> f64 {
        self.value
    }
}

/// v(t) = v<sub>f</sub> + (v<sub>i</sub> - v<sub>f</sub>) * e<sup>-rt</sup>
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exponential {
    rate: f64,
    vi: f64,
    vf: f64,
}

impl Exponential {
    /// Build a schedule decaying from `vi` towards `vf`
    ///
    /// `rate` must be non-negative and `vi` must not be below `vf`.
    pub fn new(rate: f64, vi: f64, vf: f64) -> Result<Self, ConfigError> {
        if !(rate >= 0.0 && rate.is_finite()) {
            return Err(ConfigError::invalid(
                "exploration.rate",
                format!("{rate} is not a finite non-negative rate"),
            ));
        }
        if vi < vf {
            return Err(ConfigError::invalid(
                "exploration.start",
                format!("start ({vi}) must not be below end ({vf})"),
            ));
        }
        Ok(Self { rate, vi, vf })
    }
}

impl Decay for Exponential {
    fn evaluate(&self, t: f64) -> f64 {
        let &Self { rate, vi, vf } = self;
        vf + (vi - vf) * (-rate * t).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_decay() {
        let x = Constant::new(0.2);
        assert_eq!(x.evaluate(0.0), 0.2);
        assert_eq!(x.evaluate(500.0), 0.2);
    }

    #[test]
    fn exponential_decay() {
        let x = Exponential::new(2.0, 1.0, 0.1).unwrap();
        assert_eq!(x.evaluate(0.0), 1.0);
        assert_eq!(x.evaluate(1.0), 0.1 + 0.9 * f64::exp(-2.0));
        assert!((x.evaluate(1e6) - 0.1).abs() < 1e-12, "settles at end value");
    }

    #[test]
    fn exponential_rejects_bad_parameters() {
        assert!(Exponential::new(-1.0, 1.0, 0.0).is_err());
        assert!(Exponential::new(1.0, 0.0, 1.0).is_err());
        assert!(Exponential::new(f64::NAN, 1.0, 0.0).is_err());
    }

    #[test]
    fn boxed_decay_delegates() {
        let x: Box<dyn Decay> = Box::new(Constant::new(0.5));
        assert_eq!(x.evaluate(3.0), 0.5);
    }
}
