//! # Domain decomposition
//! Periodic domain [0, 2π) x [0, 2π) discretized with Fourier bases along
//! both axes and distributed across a process mesh.
//!
//! Physical data (layout [`Layout::Grid`]) is contiguous along y and split
//! along x. Spectral data (layout [`Layout::Coeff`]) is contiguous along x
//! and split along y. Axis 0 uses a complex-to-complex basis, axis 1 a
//! real-to-complex basis, so the spectral shape is `[nx, ny / 2 + 1]`.
//!
//! The transform engine is `funspace`; the solver only sees the
//! [`SpectralEngine`] trait.
pub mod fourier;
#[cfg(feature = "mpi")]
pub mod fourier_mpi;
pub mod mesh;
use crate::field::Field;
use ndarray::{Array1, Array2};
use num_complex::Complex;

pub use fourier::FourierSpace;
#[cfg(feature = "mpi")]
pub use fourier_mpi::FourierSpaceMpi;
pub use mesh::ProcessMesh;

/// Data layout of a local block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Physical grid values
    Grid,
    /// Spectral coefficients
    Coeff,
}

/// Transform direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Physical -> spectral
    Forward,
    /// Spectral -> physical
    Backward,
}

/// Interface to the distributed spectral transform engine
pub trait SpectralEngine {
    /// Global physical shape `[nx, ny]`
    fn global_shape(&self) -> [usize; 2];

    /// Global spectral shape
    fn global_shape_spectral(&self) -> [usize; 2];

    /// Shape of the local block in the given layout
    fn local_shape(&self, layout: Layout) -> [usize; 2];

    /// Global index of the first local element in the given layout
    fn local_start(&self, layout: Layout) -> [usize; 2];

    /// Physical -> spectral
    fn forward(&self, v: &Array2<f64>, vhat: &mut Array2<Complex<f64>>);

    /// Spectral -> physical
    fn backward(&self, vhat: &Array2<Complex<f64>>, v: &mut Array2<f64>);

    /// Spectral derivative of order `deriv[0]` along x and `deriv[1]` along y
    fn gradient(&self, vhat: &Array2<Complex<f64>>, deriv: [usize; 2]) -> Array2<Complex<f64>>;

    /// Local grid coordinates along `axis`
    fn coords(&self, axis: usize) -> Array1<f64>;

    /// Rank of this process
    fn rank(&self) -> usize;

    /// Number of processes
    fn nprocs(&self) -> usize;

    /// Sum a scalar over all processes
    fn sum_all(&self, value: f64) -> f64;

    /// Maximum of a scalar over all processes
    fn max_all(&self, value: f64) -> f64;

    /// Synchronize all processes
    fn barrier(&self);

    /// Map a local index to its global index, stable for the lifetime of
    /// the engine.
    fn global_index_of(&self, layout: Layout, local: [usize; 2]) -> [usize; 2] {
        let start = self.local_start(layout);
        [start[0] + local[0], start[1] + local[1]]
    }

    /// Signed wavenumbers of the local coefficient block along `axis`
    ///
    /// x follows FFT order `0, 1, .., -1`, y runs `0 ..= ny/2`.
    #[allow(clippy::cast_possible_wrap)]
    fn wavenumbers(&self, axis: usize) -> Vec<i64> {
        let n = self.global_shape()[axis];
        let start = self.local_start(Layout::Coeff)[axis];
        let size = self.local_shape(Layout::Coeff)[axis];
        (start..start + size)
            .map(|i| {
                if axis == 0 && i > (n - 1) / 2 {
                    i as i64 - n as i64
                } else {
                    i as i64
                }
            })
            .collect()
    }

    /// Transform a field in place
    fn transform(&self, field: &mut Field, direction: Direction) {
        match direction {
            Direction::Forward => self.forward(&field.v, &mut field.vhat),
            Direction::Backward => self.backward(&field.vhat, &mut field.v),
        }
    }

    /// Coefficients of the `order`-th derivative of a field along `axis`
    ///
    /// # Panics
    /// `axis` larger than 1
    fn derivative(&self, field: &Field, axis: usize, order: usize) -> Array2<Complex<f64>> {
        let mut deriv = [0, 0];
        deriv[axis] = order;
        self.gradient(&field.vhat, deriv)
    }
}

/// Immutable run-level domain context
///
/// Created once at startup and shared by reference with every
/// component.
pub struct Domain<E> {
    /// Transform engine
    pub engine: E,
    /// Process mesh the engine is distributed on
    pub mesh: ProcessMesh,
}

impl Domain<FourierSpace> {
    /// Build a serial periodic domain
    ///
    /// # Errors
    /// Mesh override inconsistent with a single process.
    pub fn build(
        nx: usize,
        ny: usize,
        mesh: Option<[usize; 2]>,
    ) -> Result<Self, crate::error::ConfigurationError> {
        let mesh = ProcessMesh::resolve(mesh, 1)?;
        Ok(Self {
            engine: FourierSpace::new(nx, ny),
            mesh,
        })
    }
}

#[cfg(feature = "mpi")]
impl<'a> Domain<FourierSpaceMpi<'a>> {
    /// Build a periodic domain distributed over all processes of `universe`
    ///
    /// # Errors
    /// Mesh override inconsistent with the process count.
    pub fn build_mpi(
        universe: &'a crate::domain::fourier_mpi::Universe,
        nx: usize,
        ny: usize,
        mesh: Option<[usize; 2]>,
    ) -> Result<Self, crate::error::ConfigurationError> {
        let engine = FourierSpaceMpi::new(universe, nx, ny);
        let mesh = ProcessMesh::resolve(mesh, engine.nprocs())?;
        Ok(Self { engine, mesh })
    }
}

impl<E: SpectralEngine> Domain<E> {
    /// Allocate a zero field bound to this domain
    pub fn new_field(&self, name: &str) -> Field {
        Field::new(name, &self.engine)
    }

    /// Global physical shape
    pub fn shape(&self) -> [usize; 2] {
        self.engine.global_shape()
    }

    /// Grid spacing `[dx, dy]`
    #[allow(clippy::cast_precision_loss)]
    pub fn spacing(&self) -> [f64; 2] {
        let [nx, ny] = self.shape();
        let two_pi = 2. * std::f64::consts::PI;
        [two_pi / nx as f64, two_pi / ny as f64]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_wavenumbers() {
        let domain = Domain::build(8, 8, None).unwrap();
        assert_eq!(
            domain.engine.wavenumbers(0),
            vec![0, 1, 2, 3, -4, -3, -2, -1]
        );
        assert_eq!(domain.engine.wavenumbers(1), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_global_index_serial() {
        let domain = Domain::build(8, 6, None).unwrap();
        assert_eq!(domain.engine.local_shape(Layout::Grid), [8, 6]);
        assert_eq!(domain.engine.local_shape(Layout::Coeff), [8, 4]);
        assert_eq!(domain.engine.global_index_of(Layout::Coeff, [3, 2]), [3, 2]);
    }

    #[test]
    fn test_derivative_of_sine() {
        let domain = Domain::build(16, 12, None).unwrap();
        let mut field = domain.new_field("f");
        let x = domain.engine.coords(0);
        let y = domain.engine.coords(1);
        for ((i, j), v) in field.v.indexed_iter_mut() {
            *v = x[i].sin() * (2. * y[j]).cos();
        }
        domain.engine.transform(&mut field, Direction::Forward);
        let dxhat = domain.engine.derivative(&field, 0, 1);
        let mut dx = Array2::<f64>::zeros(field.v.raw_dim());
        domain.engine.backward(&dxhat, &mut dx);
        for ((i, j), v) in dx.indexed_iter() {
            assert!((v - x[i].cos() * (2. * y[j]).cos()).abs() < 1e-10);
        }
        let dyyhat = domain.engine.derivative(&field, 1, 2);
        let mut dyy = Array2::<f64>::zeros(field.v.raw_dim());
        domain.engine.backward(&dyyhat, &mut dyy);
        for ((i, j), v) in dyy.indexed_iter() {
            assert!((v + 4. * x[i].sin() * (2. * y[j]).cos()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mesh_override_mismatch() {
        assert!(Domain::build(8, 8, Some([2, 1])).is_err());
    }
}
