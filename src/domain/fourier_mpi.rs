//! Distributed Fourier-Fourier engine on top of `funspace::mpi`
//!
//! Physical data lives in y-pencils, spectral data in x-pencils.
//! Every transform is a collective call.
use super::{Layout, SpectralEngine};
use crate::bases::{fourier_c2c, fourier_r2c, BaseC2c, BaseR2c, BaseSpace};
use funspace::mpi::space_traits::BaseSpaceMpi;
pub use funspace::mpi::{all_gather_sum, initialize, CommunicatorCollectives, Space2, Universe};
use ndarray::{s, Array1, Array2};
use num_complex::Complex;
use std::cell::RefCell;

/// Distributed space of the periodic domain
pub type Space2FourierMpi<'a> = Space2<'a, BaseC2c<f64>, BaseR2c<f64>>;

/// Multi process spectral engine
pub struct FourierSpaceMpi<'a> {
    space: RefCell<Space2FourierMpi<'a>>,
    universe: &'a Universe,
    shape_physical: [usize; 2],
    shape_spectral: [usize; 2],
    start: [[usize; 2]; 2],
    size: [[usize; 2]; 2],
}

impl<'a> FourierSpaceMpi<'a> {
    /// Periodic space with `nx` x `ny` grid points distributed on `universe`
    pub fn new(universe: &'a Universe, nx: usize, ny: usize) -> Self {
        let space = Space2::new(&fourier_c2c::<f64>(nx), &fourier_r2c::<f64>(ny), universe);
        let shape_physical = space.shape_physical();
        let shape_spectral = space.shape_spectral();
        let grid = &space.get_decomp_from_global_shape(&shape_physical).y_pencil;
        let coeff = &space.get_decomp_from_global_shape(&shape_spectral).x_pencil;
        let start = [[grid.st[0], grid.st[1]], [coeff.st[0], coeff.st[1]]];
        let size = [[grid.sz[0], grid.sz[1]], [coeff.sz[0], coeff.sz[1]]];
        Self {
            space: RefCell::new(space),
            universe,
            shape_physical,
            shape_spectral,
            start,
            size,
        }
    }

    fn index(layout: Layout) -> usize {
        match layout {
            Layout::Grid => 0,
            Layout::Coeff => 1,
        }
    }
}

impl SpectralEngine for FourierSpaceMpi<'_> {
    fn global_shape(&self) -> [usize; 2] {
        self.shape_physical
    }

    fn global_shape_spectral(&self) -> [usize; 2] {
        self.shape_spectral
    }

    fn local_shape(&self, layout: Layout) -> [usize; 2] {
        self.size[Self::index(layout)]
    }

    fn local_start(&self, layout: Layout) -> [usize; 2] {
        self.start[Self::index(layout)]
    }

    fn forward(&self, v: &Array2<f64>, vhat: &mut Array2<Complex<f64>>) {
        self.space.borrow_mut().forward_inplace_mpi(v, vhat);
    }

    fn backward(&self, vhat: &Array2<Complex<f64>>, v: &mut Array2<f64>) {
        self.space.borrow_mut().backward_inplace_mpi(vhat, v);
    }

    fn gradient(&self, vhat: &Array2<Complex<f64>>, deriv: [usize; 2]) -> Array2<Complex<f64>> {
        self.space.borrow().gradient_mpi(vhat, deriv, None)
    }

    fn coords(&self, axis: usize) -> Array1<f64> {
        let x = self.space.borrow().coords()[axis].clone();
        let st = self.start[0][axis];
        let sz = self.size[0][axis];
        x.slice(s![st..st + sz]).to_owned()
    }

    fn rank(&self) -> usize {
        self.space.borrow().get_nrank()
    }

    fn nprocs(&self) -> usize {
        self.space.borrow().get_nprocs()
    }

    fn sum_all(&self, value: f64) -> f64 {
        let mut global = 0.;
        all_gather_sum(self.universe, &value, &mut global);
        global
    }

    fn max_all(&self, value: f64) -> f64 {
        let mut all = vec![0.; self.nprocs()];
        self.universe.world().all_gather_into(&value, &mut all[..]);
        all.into_iter().fold(f64::NEG_INFINITY, f64::max)
    }

    fn barrier(&self) {
        self.universe.world().barrier();
    }
}
