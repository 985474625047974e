//! # Bases
//! Fourier bases of the periodic domain, provided by `funspace`
//!
//! - `FourierC2c` (complex to complex), see [`fourier_c2c()`]
//! - `FourierR2c` (real to complex), see [`fourier_r2c()`]
pub use funspace::fourier_c2c;
pub use funspace::fourier_r2c;
pub use funspace::{BaseC2c, BaseR2c};
pub use funspace::{BaseSpace, Space2};
