//! # `viscoturb`: Spectral solver for two-dimensional viscoelastic turbulence
//!<img align="right" src="https://rustacean.net/assets/cuddlyferris.png" width="80">
//!
//! # Dependencies
//! - cargo >= v1.65
//! - `hdf5` (sudo apt-get install -y libhdf5-dev)
//! - a lapack backend for `ndarray-linalg` (openblas by default)
//!
//! The `mpi` feature distributes the domain over processes. It requires
//! an mpi installation and libclang.
//!
//! # Important
//!
//! Openblas multithreading conflicts with internal multithreading.
//! Turn it off for better performance:
//! ```text
//! export OPENBLAS_NUM_THREADS=1
//! ```
//!
//! # Details
//!
//! The solver integrates an Oldroyd-B fluid in Kolmogorov flow on the doubly
//! periodic square `[0, 2pi)^2`, see [`viscoelastic`]. Its parts:
//!
//! - [`domain`]: process mesh and Fourier transforms (`funspace`)
//! - [`equation`]: symbolic equations, substitutions and closure checks
//! - [`solver`]: IMEX multistep time integration, mode by mode
//! - [`analysis`]: cadenced output handlers and the merge of their segments
//!
//! ## Example
//! Run from a configuration file (`cargo run --release -- run.yaml`)
//! ```ignore
//! use viscoturb::config::Config;
//! use viscoturb::domain::Domain;
//! use viscoturb::viscoelastic::run;
//!
//! fn main() {
//!     let config = Config::load("run.yaml").unwrap();
//!     let domain = Domain::build(config.params.nx, config.params.ny, None).unwrap();
//!     run(&config, &domain).unwrap();
//! }
//! ```
//! Distributed (`cargo mpirun --np 4 --features mpi --bin viscoturb -- run.yaml`)
//! ```ignore
//! use viscoturb::config::Config;
//! use viscoturb::domain::fourier_mpi::initialize;
//! use viscoturb::domain::Domain;
//! use viscoturb::viscoelastic::run;
//!
//! fn main() {
//!     let universe = initialize().unwrap();
//!     let config = Config::load("run.yaml").unwrap();
//!     let domain = Domain::build_mpi(&universe, config.params.nx, config.params.ny, None).unwrap();
//!     run(&config, &domain).unwrap();
//! }
//! ```
//!
//! ## Postprocess the output
//!
//! Every handler writes one file per process and segment below
//! `run.data_dir`. After the run they are merged into
//! `data/checkpoints/checkpoints.h5`, `data/snapshots/snapshots.h5` and
//! `data/timeseries/timeseries.h5`. An interrupted run can be merged with
//!
//! `viscoturb --merge-only run.yaml`
//!
//! ## Documentation
//!
//! Download and run:
//!
//! `cargo doc --open`
#![warn(missing_docs)]
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#[macro_use]
extern crate enum_dispatch;
pub mod analysis;
pub mod bases;
pub mod config;
pub mod domain;
pub mod equation;
pub mod error;
pub mod field;
pub mod io;
pub mod simulation;
pub mod solver;
pub mod viscoelastic;
pub use error::{Error, Result};
pub use simulation::Simulation;
use solver::Clock;
use std::time::Instant;

/// Integrate trait, step forward in time, and write results
pub trait Integrate {
    /// Update solution
    ///
    /// # Errors
    /// The step failed, e.g. numerical instability.
    fn update(&mut self) -> Result<()>;
    /// Receive current clock
    fn clock(&self) -> Clock;
    /// Get timestep
    fn get_dt(&self) -> f64;
    /// Callback function (can be used for i/o)
    fn callback(&mut self);
    /// Break criteria
    fn exit(&mut self) -> bool;
    /// Why `exit` returned true, if a stop threshold was reached
    fn stop_reason(&self) -> Option<&'static str>;
    /// Rank of this process, only rank 0 logs progress
    fn rank(&self) -> usize;
}

/// Integrate pde, that implements the Integrate trait.
///
/// The callback runs once before the first step and after every step.
/// Progress is logged every `log_cadence` iterations (0 disables it).
///
/// Stop Criteria: see [`Integrate::exit`]
///
/// # Errors
/// First failed update, the loop stops there.
pub fn integrate<T: Integrate>(pde: &mut T, log_cadence: usize) -> Result<()> {
    let timer = Instant::now();
    pde.callback();
    while !pde.exit() {
        let clock = pde.clock();
        if pde.rank() == 0 && log_cadence > 0 && clock.iteration % log_cadence == 1 % log_cadence {
            tracing::info!(
                "Step {}; Time = {:e}; dt = {:e}",
                clock.iteration,
                clock.sim_time,
                pde.get_dt()
            );
        }
        pde.update()?;
        pde.callback();
    }
    if pde.rank() == 0 {
        let clock = pde.clock();
        match pde.stop_reason() {
            Some(reason) => tracing::info!(
                "{}: iteration {}, time {:e}",
                reason,
                clock.iteration,
                clock.sim_time
            ),
            None => tracing::info!("break criteria triggered"),
        }
        tracing::info!("Total run time: {:.2} sec", timer.elapsed().as_secs_f64());
    }
    Ok(())
}
