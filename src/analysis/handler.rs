//! Output handler: cadence, tasks and segment writer
use super::cadence::{Cadence, Schedule};
use super::segment::{RecordMeta, SegmentWriter, TaskOutput};
use super::task::{Task, TaskLayout};
use crate::domain::SpectralEngine;
use crate::equation::Expr;
use crate::error::{OutputError, Result};
use crate::solver::Solver;
use std::path::Path;

/// Periodically evaluates its tasks and appends them to segment files
#[derive(Debug, Clone)]
pub struct FileHandler {
    cadence: Cadence,
    tasks: Vec<Task>,
    writer: SegmentWriter,
    enabled: bool,
}

impl FileHandler {
    pub(crate) fn new(cadence: Cadence, writer: SegmentWriter) -> Self {
        Self {
            cadence,
            tasks: Vec::new(),
            writer,
            enabled: true,
        }
    }

    /// Register a task. Names in `expr` are resolved against the equation
    /// system when the task is evaluated.
    pub fn add_task(&mut self, expr: Expr, name: &str, layout: TaskLayout) -> &mut Self {
        self.tasks.push(Task {
            name: name.to_owned(),
            expr,
            layout,
        });
        self
    }

    /// Registered tasks
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Base path of the output
    pub fn base_path(&self) -> &Path {
        self.writer.base_path()
    }

    /// False once a write failed
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of records written by this process
    pub fn write_number(&self) -> usize {
        self.writer.write_number()
    }

    /// Resolve every task expression
    ///
    /// # Errors
    /// First task with an unresolved symbol.
    pub fn check<E: SpectralEngine>(&self, solver: &Solver<E>) -> Result<()> {
        for task in &self.tasks {
            solver.expand(&task.expr, &format!("task `{}`", task.name))?;
        }
        Ok(())
    }

    /// Write a record if the cadence is due. A failed write is logged and
    /// disables the handler for the rest of the run. Returns true if a
    /// record was written.
    ///
    /// Collective: the outcome is agreed across processes, so a write that
    /// fails on any process disables the handler on all of them.
    pub fn process<E: SpectralEngine>(&mut self, solver: &Solver<E>) -> bool {
        if !self.enabled || !self.cadence.due(solver.clock()) {
            return false;
        }
        let result = self.write(solver);
        let failed_here = if result.is_err() { 1. } else { 0. };
        let failed_anywhere = solver.engine().max_all(failed_here) > 0.;
        match result {
            Ok(write_number) if !failed_anywhere => {
                tracing::debug!(
                    "{:?}: write {} at iteration {}",
                    self.base_path(),
                    write_number,
                    solver.clock().iteration
                );
                true
            }
            Ok(_) => {
                tracing::error!(
                    "{:?}: write failed on another process; handler disabled",
                    self.base_path()
                );
                self.enabled = false;
                false
            }
            Err(e) => {
                tracing::error!("{:?}: {}; handler disabled", self.base_path(), e);
                self.enabled = false;
                false
            }
        }
    }

    /// Task errors are identical on every process, only the final segment
    /// write can fail locally.
    fn write<E: SpectralEngine>(&mut self, solver: &Solver<E>) -> std::result::Result<usize, OutputError> {
        let engine = solver.engine();
        let evaluator = solver.evaluator();
        let mut outputs = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let expanded = solver
                .expand(&task.expr, &format!("task `{}`", task.name))
                .map_err(|e| OutputError::Task {
                    task: task.name.clone(),
                    reason: e.to_string(),
                })?;
            let data = task.evaluate(&evaluator, &expanded, engine)?;
            let (start, global_shape) = task.layout.placement(engine);
            outputs.push(TaskOutput {
                name: task.name.clone(),
                data,
                start,
                global_shape,
            });
        }
        let clock = solver.clock();
        let meta = RecordMeta {
            sim_time: clock.sim_time,
            iteration: clock.iteration,
            wall_time: clock.wall_time,
        };
        self.writer.write(&meta, &outputs)
    }
}
