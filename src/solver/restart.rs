//! Restart from a merged checkpoint file
use super::imex::Solver;
use crate::domain::{Layout, SpectralEngine};
use crate::error::{OutputError, Result};
use crate::io::{get_size_dimension, read_array, read_slice_complex};
use ndarray::{s, Axis, Ix3};
use std::path::Path;

impl<E: SpectralEngine> Solver<'_, E> {
    /// Load fields, sim time and iteration from the last record of a merged
    /// checkpoint file. Every variable must be stored in coefficient
    /// layout under `tasks/{variable}`.
    ///
    /// # Errors
    /// File unreadable, variable missing or shape mismatch.
    pub fn load_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let hdf5_err = |source: hdf5::Error| OutputError::Hdf5 {
            path: path.to_path_buf(),
            source,
        };
        let file = hdf5::File::open(path).map_err(hdf5_err)?;
        let records = get_size_dimension(&file, "sim_time").map_err(hdf5_err)?;
        let last = records.checked_sub(1).ok_or_else(|| OutputError::Task {
            task: path.display().to_string(),
            reason: "checkpoint holds no records".to_owned(),
        })?;
        let sim_time: f64 = read_scalar_at(&file, "sim_time", last).map_err(hdf5_err)?;
        let iteration: u64 = read_scalar_at(&file, "iteration", last).map_err(hdf5_err)?;

        let engine = self.engine();
        let st = engine.local_start(Layout::Coeff);
        let sz = engine.local_shape(Layout::Coeff);
        for field in self.state.fields.values_mut() {
            let block = read_slice_complex::<f64, Ix3, _>(
                &file,
                &format!("tasks/{}", field.name),
                s![last..last + 1, st[0]..st[0] + sz[0], st[1]..st[1] + sz[1]],
            )
            .map_err(hdf5_err)?;
            let block = block.index_axis(Axis(0), 0);
            if block.shape() != field.vhat.shape() {
                return Err(OutputError::Task {
                    task: field.name.clone(),
                    reason: format!(
                        "checkpoint block {:?} does not match local shape {:?}",
                        block.shape(),
                        field.vhat.shape()
                    ),
                }
                .into());
            }
            field.vhat.assign(&block);
            field.backward(engine);
        }
        #[allow(clippy::cast_possible_truncation)]
        let iteration = iteration as usize;
        self.set_clock(sim_time, iteration);
        tracing::info!(
            "restart from {:?} at iteration {} (sim time {:.6})",
            path,
            iteration,
            sim_time
        );
        Ok(())
    }
}

/// Element `index` of a one dimensional dataset
fn read_scalar_at<T: hdf5::H5Type + Copy>(
    file: &hdf5::File,
    name: &str,
    index: usize,
) -> hdf5::Result<T> {
    let data: ndarray::Array1<T> = read_array(file, name)?;
    data.get(index)
        .copied()
        .ok_or_else(|| hdf5::Error::Internal(format!("{} has no element {}", name, index)))
}
