//! # Time integration
//!
//! Implicit-explicit multistep schemes and the solver advancing a
//! compiled [`crate::equation::EquationSystem`].
#![allow(clippy::module_name_repetitions)]
pub mod imex;
mod restart;
pub mod scheme;
pub mod state;
pub use imex::{Solver, SolverState};
pub use scheme::{Cnab1, Cnab2, Coefficients, Mcnab2, MultistepImex, Sbdf1, Sbdf2, Scheme, SchemeKind};
pub use state::{Clock, StopCondition};
