//! Triggering rules of output handlers
use crate::solver::Clock;

/// Decides whether a handler writes at the current clock
#[enum_dispatch]
pub trait Schedule {
    /// True if a write is due. Updates the last-write mark.
    fn due(&mut self, clock: &Clock) -> bool;
}

/// Relative slack on `t / dt`, absorbs round-off of accumulated time steps
const INDEX_TOLERANCE: f64 = 1e-9;

/// Write whenever `floor(t / dt)` passes the last written index
#[derive(Debug, Clone, Copy, PartialEq)]
struct Interval {
    dt: f64,
    last: Option<i64>,
}

impl Interval {
    fn new(dt: f64) -> Self {
        Self { dt, last: None }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn due(&mut self, t: f64) -> bool {
        let ratio = t / self.dt;
        let index = (ratio + INDEX_TOLERANCE * ratio.abs().max(1.)).floor() as i64;
        if self.last.map_or(true, |last| index > last) {
            self.last = Some(index);
            true
        } else {
            false
        }
    }
}

/// Elapsed wall time cadence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallTime(Interval);

/// Simulation time cadence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTime(Interval);

/// Iteration cadence, writes when `iteration % every == 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    every: usize,
}

impl Schedule for WallTime {
    fn due(&mut self, clock: &Clock) -> bool {
        self.0.due(clock.wall_time)
    }
}

impl Schedule for SimTime {
    fn due(&mut self, clock: &Clock) -> bool {
        self.0.due(clock.sim_time)
    }
}

impl Schedule for Iteration {
    fn due(&mut self, clock: &Clock) -> bool {
        clock.iteration % self.every == 0
    }
}

/// Cadence of a handler
#[enum_dispatch(Schedule)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cadence {
    /// Wall time interval in seconds
    WallTime,
    /// Simulation time interval
    SimTime,
    /// Iteration interval
    Iteration,
}

impl Cadence {
    /// Every `dt` seconds of wall time
    ///
    /// # Panics
    /// `dt` not positive
    pub fn wall_time(dt: f64) -> Self {
        assert!(dt > 0., "wall time cadence must be positive, got {}", dt);
        WallTime(Interval::new(dt)).into()
    }

    /// Every `dt` units of simulation time
    ///
    /// # Panics
    /// `dt` not positive
    pub fn sim_time(dt: f64) -> Self {
        assert!(dt > 0., "sim time cadence must be positive, got {}", dt);
        SimTime(Interval::new(dt)).into()
    }

    /// Every `every` iterations
    ///
    /// # Panics
    /// `every` is zero
    pub fn iteration(every: usize) -> Self {
        assert!(every > 0, "iteration cadence must be positive");
        Iteration { every }.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(iteration: usize, sim_time: f64) -> Clock {
        Clock {
            sim_time,
            iteration,
            wall_time: 0.,
        }
    }

    #[test]
    fn test_iteration_boundaries() {
        let mut cadence = Cadence::iteration(100);
        let written: Vec<usize> = (0..=250)
            .filter(|&i| cadence.due(&at(i, 0.)))
            .collect();
        assert_eq!(written, vec![0, 100, 200]);
    }

    #[test]
    fn test_sim_time_first_check_writes() {
        let mut cadence = Cadence::sim_time(0.1);
        let dt = 0.03;
        let written: Vec<usize> = (0..=10)
            .filter(|&i| cadence.due(&at(i, i as f64 * dt)))
            .collect();
        // t = 0, 0.12, 0.21, 0.30
        assert_eq!(written, vec![0, 4, 7, 10]);
    }

    #[test]
    fn test_sim_time_restart_offset() {
        let mut cadence = Cadence::sim_time(1.);
        assert!(cadence.due(&at(0, 10.5)));
        assert!(!cadence.due(&at(1, 10.9)));
        assert!(cadence.due(&at(2, 11.0)));
    }

    #[test]
    fn test_sim_time_accumulated_round_off() {
        // ten steps of 0.1 sum to 0.9999999999999999
        let mut cadence = Cadence::sim_time(1.);
        let mut t = 0.;
        let mut written = Vec::new();
        for i in 0..=30 {
            if cadence.due(&at(i, t)) {
                written.push(i);
            }
            t += 0.1;
        }
        assert_eq!(written, vec![0, 10, 20, 30]);
    }

    #[test]
    #[should_panic]
    fn test_zero_iteration_cadence() {
        let _ = Cadence::iteration(0);
    }
}
