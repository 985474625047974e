//! Serial Fourier-Fourier engine on top of `funspace`
use super::{Layout, SpectralEngine};
use crate::bases::{fourier_c2c, fourier_r2c, BaseC2c, BaseR2c, BaseSpace, Space2};
use ndarray::{Array1, Array2};
use num_complex::Complex;
use std::cell::RefCell;

/// Space of the periodic domain: c2c along x, r2c along y
pub type Space2Fourier = Space2<BaseC2c<f64>, BaseR2c<f64>>;

/// Single process spectral engine
///
/// The `funspace` space keeps internal fft plans and scratch buffers,
/// it is therefore kept behind a `RefCell`.
pub struct FourierSpace<S = Space2Fourier> {
    space: RefCell<S>,
    shape_physical: [usize; 2],
    shape_spectral: [usize; 2],
}

impl FourierSpace<Space2Fourier> {
    /// Periodic space with `nx` x `ny` grid points
    pub fn new(nx: usize, ny: usize) -> Self {
        Self::from_space(Space2::new(&fourier_c2c::<f64>(nx), &fourier_r2c::<f64>(ny)))
    }
}

impl<S> FourierSpace<S>
where
    S: BaseSpace<f64, 2, Physical = f64, Spectral = Complex<f64>>,
{
    /// Wrap an existing `funspace` space
    pub fn from_space(space: S) -> Self {
        let shape_physical = space.shape_physical();
        let shape_spectral = space.shape_spectral();
        Self {
            space: RefCell::new(space),
            shape_physical,
            shape_spectral,
        }
    }
}

impl<S> SpectralEngine for FourierSpace<S>
where
    S: BaseSpace<f64, 2, Physical = f64, Spectral = Complex<f64>>,
{
    fn global_shape(&self) -> [usize; 2] {
        self.shape_physical
    }

    fn global_shape_spectral(&self) -> [usize; 2] {
        self.shape_spectral
    }

    fn local_shape(&self, layout: Layout) -> [usize; 2] {
        match layout {
            Layout::Grid => self.shape_physical,
            Layout::Coeff => self.shape_spectral,
        }
    }

    fn local_start(&self, _layout: Layout) -> [usize; 2] {
        [0, 0]
    }

    fn forward(&self, v: &Array2<f64>, vhat: &mut Array2<Complex<f64>>) {
        self.space.borrow_mut().forward_inplace_par(v, vhat);
    }

    fn backward(&self, vhat: &Array2<Complex<f64>>, v: &mut Array2<f64>) {
        self.space.borrow_mut().backward_inplace_par(vhat, v);
    }

    fn gradient(&self, vhat: &Array2<Complex<f64>>, deriv: [usize; 2]) -> Array2<Complex<f64>> {
        self.space.borrow().gradient_par(vhat, deriv, None)
    }

    fn coords(&self, axis: usize) -> Array1<f64> {
        self.space.borrow().coords()[axis].clone()
    }

    fn rank(&self) -> usize {
        0
    }

    fn nprocs(&self) -> usize {
        1
    }

    fn sum_all(&self, value: f64) -> f64 {
        value
    }

    fn max_all(&self, value: f64) -> f64 {
        value
    }

    fn barrier(&self) {}
}
