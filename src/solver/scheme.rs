//! Implicit-explicit multistep schemes
//!
//! A scheme advances `M dt(X) + L X = F(X)` with
//! ```text
//! sum_j a_j M X^{n+1-j} + sum_j b_j L X^{n+1-j} = sum_{j>=1} c_j F^{n+1-j}
//! ```
//! for variable step sizes. Two step schemes start with their one step
//! partner while only one explicit evaluation is available.
use serde::Deserialize;

/// Coefficients of one step, index `j` refers to level `n+1-j`
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    /// Mass matrix coefficients
    pub a: Vec<f64>,
    /// Linear operator coefficients
    pub b: Vec<f64>,
    /// Explicit term coefficients, `c[0]` is unused
    pub c: Vec<f64>,
}

impl Coefficients {
    fn zeros(steps: usize) -> Self {
        Self {
            a: vec![0.; steps + 1],
            b: vec![0.; steps + 1],
            c: vec![0.; steps + 1],
        }
    }
}

/// Multistep IMEX scheme
#[enum_dispatch]
pub trait MultistepImex {
    /// Number of previous levels the scheme needs
    fn steps(&self) -> usize;

    /// Coefficients for step sizes `timesteps` (most recent first) at
    /// `iteration` steps since the history was cleared.
    fn coefficients(&self, timesteps: &[f64], iteration: usize) -> Coefficients;
}

/// First order backward differentiation / forward Euler
#[derive(Debug, Clone, Copy, Default)]
pub struct Sbdf1;

/// Crank-Nicolson / forward Euler
#[derive(Debug, Clone, Copy, Default)]
pub struct Cnab1;

/// Crank-Nicolson / second order Adams-Bashforth
#[derive(Debug, Clone, Copy, Default)]
pub struct Cnab2;

/// Modified Crank-Nicolson / second order Adams-Bashforth
#[derive(Debug, Clone, Copy, Default)]
pub struct Mcnab2;

/// Second order backward differentiation / extrapolation
#[derive(Debug, Clone, Copy, Default)]
pub struct Sbdf2;

impl MultistepImex for Sbdf1 {
    fn steps(&self) -> usize {
        1
    }

    fn coefficients(&self, timesteps: &[f64], _iteration: usize) -> Coefficients {
        let k0 = timesteps[0];
        let mut coeff = Coefficients::zeros(self.steps());
        coeff.a[0] = 1. / k0;
        coeff.a[1] = -1. / k0;
        coeff.b[0] = 1.;
        coeff.c[1] = 1.;
        coeff
    }
}

impl MultistepImex for Cnab1 {
    fn steps(&self) -> usize {
        1
    }

    fn coefficients(&self, timesteps: &[f64], _iteration: usize) -> Coefficients {
        let k0 = timesteps[0];
        let mut coeff = Coefficients::zeros(self.steps());
        coeff.a[0] = 1. / k0;
        coeff.a[1] = -1. / k0;
        coeff.b[0] = 0.5;
        coeff.b[1] = 0.5;
        coeff.c[1] = 1.;
        coeff
    }
}

/// Pad lower order coefficients to `steps` levels
fn padded(mut coeff: Coefficients, steps: usize) -> Coefficients {
    coeff.a.resize(steps + 1, 0.);
    coeff.b.resize(steps + 1, 0.);
    coeff.c.resize(steps + 1, 0.);
    coeff
}

impl MultistepImex for Cnab2 {
    fn steps(&self) -> usize {
        2
    }

    fn coefficients(&self, timesteps: &[f64], iteration: usize) -> Coefficients {
        if iteration == 0 {
            return padded(Cnab1.coefficients(timesteps, iteration), self.steps());
        }
        let (k1, k0) = (timesteps[0], timesteps[1]);
        let w1 = k1 / k0;
        let mut coeff = Coefficients::zeros(self.steps());
        coeff.a[0] = 1. / k1;
        coeff.a[1] = -1. / k1;
        coeff.b[0] = 0.5;
        coeff.b[1] = 0.5;
        coeff.c[1] = 1. + w1 / 2.;
        coeff.c[2] = -w1 / 2.;
        coeff
    }
}

impl MultistepImex for Mcnab2 {
    fn steps(&self) -> usize {
        2
    }

    fn coefficients(&self, timesteps: &[f64], iteration: usize) -> Coefficients {
        if iteration == 0 {
            return padded(Cnab1.coefficients(timesteps, iteration), self.steps());
        }
        let (k1, k0) = (timesteps[0], timesteps[1]);
        let w1 = k1 / k0;
        let mut coeff = Coefficients::zeros(self.steps());
        coeff.a[0] = 1. / k1;
        coeff.a[1] = -1. / k1;
        coeff.b[0] = (8. + 1. / w1) / 16.;
        coeff.b[1] = (7. - 1. / w1) / 16.;
        coeff.b[2] = 1. / 16.;
        coeff.c[1] = 1. + w1 / 2.;
        coeff.c[2] = -w1 / 2.;
        coeff
    }
}

impl MultistepImex for Sbdf2 {
    fn steps(&self) -> usize {
        2
    }

    fn coefficients(&self, timesteps: &[f64], iteration: usize) -> Coefficients {
        if iteration == 0 {
            return padded(Sbdf1.coefficients(timesteps, iteration), self.steps());
        }
        let (k1, k0) = (timesteps[0], timesteps[1]);
        let w1 = k1 / k0;
        let mut coeff = Coefficients::zeros(self.steps());
        coeff.a[0] = (1. + 2. * w1) / (1. + w1) / k1;
        coeff.a[1] = -(1. + w1) / k1;
        coeff.a[2] = w1 * w1 / (1. + w1) / k1;
        coeff.b[0] = 1.;
        coeff.c[1] = 1. + w1;
        coeff.c[2] = -w1;
        coeff
    }
}

/// Available schemes
#[enum_dispatch(MultistepImex)]
#[derive(Debug, Clone, Copy)]
pub enum Scheme {
    /// SBDF1
    Sbdf1,
    /// CNAB1
    Cnab1,
    /// CNAB2
    Cnab2,
    /// MCNAB2
    Mcnab2,
    /// SBDF2
    Sbdf2,
}

/// Scheme names as they appear in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SchemeKind {
    /// SBDF1
    #[serde(rename = "SBDF1")]
    Sbdf1,
    /// CNAB1
    #[serde(rename = "CNAB1")]
    Cnab1,
    /// CNAB2
    #[serde(rename = "CNAB2")]
    Cnab2,
    /// MCNAB2
    #[serde(rename = "MCNAB2")]
    Mcnab2,
    /// SBDF2
    #[serde(rename = "SBDF2")]
    Sbdf2,
}

impl From<SchemeKind> for Scheme {
    fn from(kind: SchemeKind) -> Self {
        match kind {
            SchemeKind::Sbdf1 => Sbdf1.into(),
            SchemeKind::Cnab1 => Cnab1.into(),
            SchemeKind::Cnab2 => Cnab2.into(),
            SchemeKind::Mcnab2 => Mcnab2.into(),
            SchemeKind::Sbdf2 => Sbdf2.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_startup_uses_one_step_scheme() {
        let scheme = Scheme::from(SchemeKind::Mcnab2);
        let coeff = scheme.coefficients(&[0.1, 0.1], 0);
        approx_eq(&coeff.a, &[10., -10., 0.]);
        approx_eq(&coeff.b, &[0.5, 0.5, 0.]);
        approx_eq(&coeff.c, &[0., 1., 0.]);
    }

    #[test]
    fn test_mcnab2_constant_step() {
        let coeff = Mcnab2.coefficients(&[0.5, 0.5], 3);
        approx_eq(&coeff.a, &[2., -2., 0.]);
        approx_eq(&coeff.b, &[9. / 16., 6. / 16., 1. / 16.]);
        approx_eq(&coeff.c, &[0., 1.5, -0.5]);
    }

    #[test]
    fn test_consistency() {
        // sum a = 0, sum b = 1, sum c = 1 for every scheme and step ratio
        for kind in [
            SchemeKind::Sbdf1,
            SchemeKind::Cnab1,
            SchemeKind::Cnab2,
            SchemeKind::Mcnab2,
            SchemeKind::Sbdf2,
        ] {
            let scheme = Scheme::from(kind);
            for iteration in [0, 5] {
                let coeff = scheme.coefficients(&[0.1, 0.07], iteration);
                assert_eq!(coeff.a.len(), scheme.steps() + 1);
                assert!(coeff.a.iter().sum::<f64>().abs() < 1e-12);
                assert!((coeff.b.iter().sum::<f64>() - 1.).abs() < 1e-12);
                assert!((coeff.c.iter().sum::<f64>() - 1.).abs() < 1e-12);
            }
        }
    }
}
