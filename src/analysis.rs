//! # Analysis pipeline
//! Independently cadenced output handlers reading the solver state.
//!
//! Every process writes its own shard of every segment, so writing needs
//! no communication. After the run, [`AnalysisPipeline::merge`]
//! consolidates the shards and segments of each handler into one time
//! ordered file, see [`merge::merge`].
//!
//! A handler whose write fails on any process logs the error and stays
//! disabled on every process for the rest of the run. The run itself
//! continues.
pub mod cadence;
pub mod handler;
pub mod merge;
pub mod segment;
pub mod task;
use crate::domain::SpectralEngine;
use crate::error::{MergeError, OutputError, Result};
use crate::solver::Solver;
use std::path::{Path, PathBuf};

pub use cadence::{Cadence, Schedule};
pub use handler::FileHandler;
pub use merge::{merge, merged_path, MergeOutcome};
pub use segment::SegmentWriter;
pub use task::{Task, TaskData, TaskLayout};

/// What to do with output of a previous run at the same base path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// Remove old segments and merged file
    Overwrite,
    /// Keep old segments, continue with the next set
    Append,
}

/// Collection of output handlers
#[derive(Debug, Clone, Default)]
pub struct AnalysisPipeline {
    handlers: Vec<FileHandler>,
}

impl AnalysisPipeline {
    /// Pipeline without handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler writing below `base_path`. Collective: every process
    /// must add the same handlers in the same order.
    ///
    /// # Errors
    /// Old output cannot be removed or listed, on this or any other
    /// process.
    pub fn add_handler<E: SpectralEngine + ?Sized, P: AsRef<Path>>(
        &mut self,
        engine: &E,
        base_path: P,
        cadence: Cadence,
        max_writes: Option<usize>,
        mode: HandlerMode,
    ) -> std::result::Result<&mut FileHandler, OutputError> {
        let base_path = base_path.as_ref();
        let mut writer = SegmentWriter::new(base_path, engine.rank(), engine.nprocs(), max_writes);
        let prepared = match mode {
            HandlerMode::Overwrite if engine.rank() == 0 => remove_output(base_path),
            HandlerMode::Overwrite => Ok(()),
            HandlerMode::Append => writer.resume().map_err(create_err(base_path)),
        };
        let failed_here = if prepared.is_err() { 1. } else { 0. };
        let failed_anywhere = engine.max_all(failed_here) > 0.;
        prepared?;
        if failed_anywhere {
            return Err(OutputError::Create {
                path: base_path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "output preparation failed on another process",
                ),
            });
        }
        self.handlers.push(FileHandler::new(cadence, writer));
        let last = self.handlers.len() - 1;
        Ok(&mut self.handlers[last])
    }

    /// Registered handlers
    pub fn handlers(&self) -> &[FileHandler] {
        &self.handlers
    }

    /// Resolve the tasks of every handler
    ///
    /// # Errors
    /// First task with an unresolved symbol.
    pub fn check<E: SpectralEngine>(&self, solver: &Solver<E>) -> Result<()> {
        for handler in &self.handlers {
            handler.check(solver)?;
        }
        Ok(())
    }

    /// Let every handler check its cadence and write
    pub fn process<E: SpectralEngine>(&mut self, solver: &Solver<E>) {
        for handler in &mut self.handlers {
            handler.process(solver);
        }
    }

    /// Merge every handler after all processes stopped writing. Only rank
    /// 0 merges, other ranks return an empty list.
    pub fn merge<E: SpectralEngine + ?Sized>(
        &self,
        engine: &E,
    ) -> Vec<(PathBuf, std::result::Result<MergeOutcome, MergeError>)> {
        engine.barrier();
        if engine.rank() != 0 {
            return Vec::new();
        }
        merge_all(self.handlers.iter().map(FileHandler::base_path))
    }
}

/// Merge the handlers at `base_paths` one after another. A failure is
/// logged and does not stop the remaining merges.
pub fn merge_all<I, P>(base_paths: I) -> Vec<(PathBuf, std::result::Result<MergeOutcome, MergeError>)>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    base_paths
        .into_iter()
        .map(|base_path| {
            let base_path = base_path.as_ref().to_path_buf();
            tracing::info!("merging {:?}", base_path);
            let outcome = merge(&base_path);
            match &outcome {
                Ok(MergeOutcome::AlreadyMerged { records }) => {
                    tracing::info!("{:?}: already merged ({} records)", base_path, records);
                }
                Ok(MergeOutcome::Merged { .. }) => (),
                Err(e) => tracing::error!("{:?}: merge failed: {}", base_path, e),
            }
            (base_path, outcome)
        })
        .collect()
}

fn create_err(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError {
    let path = path.to_path_buf();
    move |source| OutputError::Create { path, source }
}

/// Remove segment sets and merged file of a previous run
fn remove_output(base_path: &Path) -> std::result::Result<(), OutputError> {
    for set in segment::discover_sets(base_path).map_err(create_err(base_path))? {
        let dir = segment::set_dir(base_path, set);
        std::fs::remove_dir_all(&dir).map_err(create_err(&dir))?;
    }
    let merged = merged_path(base_path);
    if merged.exists() {
        std::fs::remove_file(&merged).map_err(create_err(&merged))?;
    }
    Ok(())
}
