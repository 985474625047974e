//! # Fields
//! A `Field` is one state variable of the equation system. It stores the
//! local block of its physical (`v`) and spectral (`vhat`) representation,
//! the layout of both blocks is defined by the [`SpectralEngine`].
use crate::domain::{Layout, SpectralEngine};
use ndarray::{s, Array2};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use num_complex::Complex;

/// Named state variable
#[derive(Debug, Clone)]
pub struct Field {
    /// Variable name
    pub name: String,
    /// Local block in physical space
    pub v: Array2<f64>,
    /// Local block in spectral space
    pub vhat: Array2<Complex<f64>>,
}

impl Field {
    /// Zero field with the local shapes of `engine`
    pub fn new<E: SpectralEngine + ?Sized>(name: &str, engine: &E) -> Self {
        Self {
            name: name.to_owned(),
            v: Array2::zeros(engine.local_shape(Layout::Grid)),
            vhat: Array2::zeros(engine.local_shape(Layout::Coeff)),
        }
    }

    /// Forward transformation
    pub fn forward<E: SpectralEngine + ?Sized>(&mut self, engine: &E) {
        engine.forward(&self.v, &mut self.vhat);
    }

    /// Backward transformation
    pub fn backward<E: SpectralEngine + ?Sized>(&mut self, engine: &E) {
        engine.backward(&self.vhat, &mut self.v);
    }

    /// True if every physical and spectral value is finite
    pub fn is_finite(&self) -> bool {
        self.v.iter().all(|x| x.is_finite()) && self.vhat.iter().all(|x| x.is_finite())
    }

    /// Domain integral of the physical field, summed over all processes
    pub fn integrate<E: SpectralEngine + ?Sized>(&self, engine: &E) -> f64 {
        integrate_grid(engine, &self.v)
    }
}

/// Domain integral of a local physical block over [0, 2π)², summed over
/// all processes
#[allow(clippy::cast_precision_loss)]
pub fn integrate_grid<E: SpectralEngine + ?Sized>(engine: &E, v: &Array2<f64>) -> f64 {
    let [nx, ny] = engine.global_shape();
    let two_pi = 2. * std::f64::consts::PI;
    let weight = two_pi / nx as f64 * two_pi / ny as f64;
    engine.sum_all(v.sum() * weight)
}

/// Add uniform random disturbances in [-amp, amp] to a field.
///
/// Every process draws the same global array from `seed` and keeps its
/// own block, so the result does not depend on the decomposition.
pub fn apply_random_disturbance<E: SpectralEngine + ?Sized>(
    engine: &E,
    field: &mut Field,
    amp: f64,
    seed: u64,
) {
    if amp <= 0. {
        return;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let global: Array2<f64> = Array2::random_using(
        engine.global_shape(),
        Uniform::new_inclusive(-amp, amp),
        &mut rng,
    );
    let st = engine.local_start(Layout::Grid);
    let sz = engine.local_shape(Layout::Grid);
    field.v += &global.slice(s![st[0]..st[0] + sz[0], st[1]..st[1] + sz[1]]);
    // Project onto the resolved modes
    field.forward(engine);
    field.backward(engine);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn test_integrate_constant() {
        let domain = Domain::build(8, 6, None).unwrap();
        let mut field = domain.new_field("c");
        field.v.fill(2.);
        let expected = 2. * (2. * std::f64::consts::PI).powi(2);
        assert!((field.integrate(&domain.engine) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_integrate_mode_vanishes() {
        let domain = Domain::build(16, 16, None).unwrap();
        let mut field = domain.new_field("s");
        let x = domain.engine.coords(0);
        for ((i, _), v) in field.v.indexed_iter_mut() {
            *v = (3. * x[i]).sin();
        }
        assert!(field.integrate(&domain.engine).abs() < 1e-12);
    }

    #[test]
    fn test_random_disturbance_reproducible() {
        let domain = Domain::build(8, 8, None).unwrap();
        let mut a = domain.new_field("a");
        let mut b = domain.new_field("b");
        apply_random_disturbance(&domain.engine, &mut a, 1e-2, 7);
        apply_random_disturbance(&domain.engine, &mut b, 1e-2, 7);
        assert!(a.is_finite());
        assert_eq!(a.v, b.v);
        assert!(a.v.iter().any(|x| x.abs() > 0.));
    }

    #[test]
    fn test_non_finite() {
        let domain = Domain::build(4, 4, None).unwrap();
        let mut field = domain.new_field("f");
        assert!(field.is_finite());
        field.v[[1, 2]] = f64::NAN;
        assert!(!field.is_finite());
    }
}
