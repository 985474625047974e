//! Solver and analysis pipeline driven by [`crate::integrate`]
use crate::analysis::AnalysisPipeline;
use crate::domain::SpectralEngine;
use crate::error::Result;
use crate::solver::{Clock, Solver};
use crate::Integrate;

/// Run context owned by the top level routine
pub struct Simulation<'a, E: SpectralEngine> {
    /// Time integrator and state
    pub solver: Solver<'a, E>,
    /// Output handlers
    pub pipeline: AnalysisPipeline,
    /// Timestep
    pub dt: f64,
}

impl<'a, E: SpectralEngine> Simulation<'a, E> {
    /// Bundle solver and pipeline
    pub fn new(solver: Solver<'a, E>, pipeline: AnalysisPipeline, dt: f64) -> Self {
        Self {
            solver,
            pipeline,
            dt,
        }
    }
}

impl<E: SpectralEngine> Integrate for Simulation<'_, E> {
    fn update(&mut self) -> Result<()> {
        self.solver.step(self.dt)
    }

    fn clock(&self) -> Clock {
        *self.solver.clock()
    }

    fn get_dt(&self) -> f64 {
        self.dt
    }

    fn callback(&mut self) {
        self.pipeline.process(&self.solver);
    }

    fn exit(&mut self) -> bool {
        !self.solver.ok()
    }

    fn stop_reason(&self) -> Option<&'static str> {
        self.solver.state.stop.reason(self.solver.clock())
    }

    fn rank(&self) -> usize {
        self.solver.engine().rank()
    }
}
