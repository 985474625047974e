//! Simulation clock and stop thresholds
use crate::config::RunConfig;

/// Progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Clock {
    /// Simulation time
    pub sim_time: f64,
    /// Completed steps
    pub iteration: usize,
    /// Elapsed wall clock seconds, agreed across processes
    pub wall_time: f64,
}

/// Thresholds of the time loop, `None` is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StopCondition {
    /// Wall clock limit in seconds
    pub stop_wall_time: Option<f64>,
    /// Iteration limit
    pub stop_iteration: Option<usize>,
    /// Simulation time limit
    pub stop_sim_time: Option<f64>,
}

impl StopCondition {
    /// Thresholds of a run configuration
    pub fn from_config(run: &RunConfig) -> Self {
        Self {
            stop_wall_time: run.stop_wall_time,
            stop_iteration: run.stop_iteration,
            stop_sim_time: run.stop_sim_time,
        }
    }

    /// True while every threshold is still ahead
    pub fn ok(&self, clock: &Clock) -> bool {
        self.stop_wall_time.map_or(true, |t| clock.wall_time < t)
            && self.stop_iteration.map_or(true, |i| clock.iteration < i)
            && self.stop_sim_time.map_or(true, |t| clock.sim_time < t)
    }

    /// Name of the first reached threshold
    pub fn reason(&self, clock: &Clock) -> Option<&'static str> {
        if self.stop_wall_time.map_or(false, |t| clock.wall_time >= t) {
            Some("wall time limit reached")
        } else if self.stop_iteration.map_or(false, |i| clock.iteration >= i) {
            Some("iteration limit reached")
        } else if self.stop_sim_time.map_or(false, |t| clock.sim_time >= t) {
            Some("sim time limit reached")
        } else {
            None
        }
    }
}
