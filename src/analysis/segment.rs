//! Rotating segment files of one handler on one process
//!
//! Layout of `base/name_s{set}/name_s{set}_p{rank}.h5`:
//! ```text
//! rank, nprocs, set
//! layout/{task}/start, layout/{task}/global_shape, layout/{task}/kind
//! write_{k:06}/sim_time, iteration, wall_time, write_number
//! write_{k:06}/tasks/{task}            (complex: _re, _im)
//! records
//! ```
//! `records` is updated after a record is complete.
use super::task::{TaskData, TaskLayout};
use crate::error::OutputError;
use crate::io::{open_or_create, read_scalar, write_array, write_array_complex, write_scalar};
use ndarray::Array1;
use std::path::{Path, PathBuf};

/// Clock values stored with every record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordMeta {
    /// Simulation time
    pub sim_time: f64,
    /// Iteration
    pub iteration: usize,
    /// Wall time
    pub wall_time: f64,
}

/// One evaluated task with its placement in the global array
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// Dataset name
    pub name: String,
    /// Local data
    pub data: TaskData,
    /// Global index of the local block
    pub start: [usize; 2],
    /// Global shape
    pub global_shape: [usize; 2],
}

/// Name of the handler, the last component of its base path
pub fn handler_name(base_path: &Path) -> String {
    base_path
        .file_name()
        .map_or_else(|| "output".to_owned(), |n| n.to_string_lossy().into_owned())
}

/// Directory of segment set `set`
pub fn set_dir(base_path: &Path, set: usize) -> PathBuf {
    base_path.join(format!("{}_s{}", handler_name(base_path), set))
}

/// Shard file of `rank` in segment set `set`
pub fn shard_path(base_path: &Path, set: usize, rank: usize) -> PathBuf {
    set_dir(base_path, set).join(format!("{}_s{}_p{}.h5", handler_name(base_path), set, rank))
}

/// Group name of record `k` (counted from 1)
pub fn record_name(k: usize) -> String {
    format!("write_{:06}", k)
}

/// Existing segment sets below `base_path`, sorted
///
/// # Errors
/// `base_path` exists but cannot be listed.
pub fn discover_sets(base_path: &Path) -> std::io::Result<Vec<usize>> {
    if !base_path.is_dir() {
        return Ok(Vec::new());
    }
    let prefix = format!("{}_s", handler_name(base_path));
    let mut sets = Vec::new();
    for entry in std::fs::read_dir(base_path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(set) = name.strip_prefix(&prefix).and_then(|s| s.parse::<usize>().ok()) {
            sets.push(set);
        }
    }
    sets.sort_unstable();
    Ok(sets)
}

/// Writer of the segment files of one process
#[derive(Debug, Clone)]
pub struct SegmentWriter {
    base_path: PathBuf,
    rank: usize,
    nprocs: usize,
    max_writes: Option<usize>,
    set: usize,
    open: bool,
    records: usize,
    write_number: usize,
}

impl SegmentWriter {
    /// Writer starting with set 1. `max_writes` of `None` never rotates.
    pub fn new<P: AsRef<Path>>(
        base_path: P,
        rank: usize,
        nprocs: usize,
        max_writes: Option<usize>,
    ) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            rank,
            nprocs,
            max_writes: max_writes.filter(|&m| m > 0),
            set: 0,
            open: false,
            records: 0,
            write_number: 0,
        }
    }

    /// Continue numbering after the sets already on disk: the next write
    /// opens a new set, write numbers continue after the records of this
    /// process.
    ///
    /// # Errors
    /// Base path cannot be listed.
    pub fn resume(&mut self) -> std::io::Result<()> {
        let sets = discover_sets(&self.base_path)?;
        let mut write_number = 0;
        for &set in &sets {
            let path = shard_path(&self.base_path, set, self.rank);
            let records = hdf5::File::open(&path)
                .and_then(|file| read_scalar::<u64>(&file, "records"))
                .unwrap_or(0);
            #[allow(clippy::cast_possible_truncation)]
            let records = records as usize;
            write_number += records;
        }
        self.set = sets.last().copied().unwrap_or(0);
        self.open = false;
        self.records = 0;
        self.write_number = write_number;
        Ok(())
    }

    /// Base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Current set, 0 before the first write
    pub fn set(&self) -> usize {
        self.set
    }

    /// Total number of records written by this process
    pub fn write_number(&self) -> usize {
        self.write_number
    }

    /// Shard file of the current set
    pub fn current_path(&self) -> PathBuf {
        shard_path(&self.base_path, self.set, self.rank)
    }

    fn needs_new_segment(&self) -> bool {
        !self.open || self.max_writes.map_or(false, |m| self.records >= m)
    }

    /// Append one record, rotating to a new segment when the current one
    /// is full. Returns the write number of the record.
    ///
    /// # Errors
    /// Directory or file cannot be created or written.
    pub fn write(&mut self, meta: &RecordMeta, outputs: &[TaskOutput]) -> Result<usize, OutputError> {
        if self.needs_new_segment() {
            self.open_segment(self.set + 1, outputs)?;
        }
        let path = self.current_path();
        let hdf5_err = |source: hdf5::Error| OutputError::Hdf5 {
            path: path.clone(),
            source,
        };
        let k = self.records + 1;
        let write_number = self.write_number + 1;
        let file = open_or_create(&path).map_err(hdf5_err)?;
        let group = record_name(k);
        write_scalar(&file, &format!("{}/sim_time", group), meta.sim_time).map_err(hdf5_err)?;
        write_scalar(&file, &format!("{}/iteration", group), meta.iteration as u64)
            .map_err(hdf5_err)?;
        write_scalar(&file, &format!("{}/wall_time", group), meta.wall_time).map_err(hdf5_err)?;
        write_scalar(&file, &format!("{}/write_number", group), write_number as u64)
            .map_err(hdf5_err)?;
        for output in outputs {
            let name = format!("{}/tasks/{}", group, output.name);
            let written = match &output.data {
                TaskData::Grid(v) => write_array(&file, &name, v),
                TaskData::Coeff(vhat) => write_array_complex(&file, &name, vhat),
                TaskData::Scalar(s) => write_scalar(&file, &name, *s),
            };
            written.map_err(hdf5_err)?;
        }
        write_scalar(&file, "records", k as u64).map_err(hdf5_err)?;
        self.records = k;
        self.write_number = write_number;
        Ok(write_number)
    }

    fn open_segment(&mut self, set: usize, outputs: &[TaskOutput]) -> Result<(), OutputError> {
        let dir = set_dir(&self.base_path, set);
        std::fs::create_dir_all(&dir).map_err(|source| OutputError::Create {
            path: dir.clone(),
            source,
        })?;
        let path = shard_path(&self.base_path, set, self.rank);
        let hdf5_err = |source: hdf5::Error| OutputError::Hdf5 {
            path: path.clone(),
            source,
        };
        let file = hdf5::File::create(&path).map_err(hdf5_err)?;
        write_scalar(&file, "rank", self.rank as u64).map_err(hdf5_err)?;
        write_scalar(&file, "nprocs", self.nprocs as u64).map_err(hdf5_err)?;
        write_scalar(&file, "set", set as u64).map_err(hdf5_err)?;
        write_scalar(&file, "records", 0_u64).map_err(hdf5_err)?;
        for output in outputs {
            let prefix = format!("layout/{}", output.name);
            let start: Array1<u64> = output.start.iter().map(|&x| x as u64).collect();
            let shape: Array1<u64> = output.global_shape.iter().map(|&x| x as u64).collect();
            write_array(&file, &format!("{}/start", prefix), &start).map_err(hdf5_err)?;
            write_array(&file, &format!("{}/global_shape", prefix), &shape).map_err(hdf5_err)?;
            write_scalar(&file, &format!("{}/kind", prefix), output.data.layout().code())
                .map_err(hdf5_err)?;
        }
        self.set = set;
        self.open = true;
        self.records = 0;
        Ok(())
    }
}

/// Layout of one task as stored in a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredLayout {
    /// Global index of the shard's block
    pub start: [usize; 2],
    /// Global shape
    pub global_shape: [usize; 2],
    /// Output layout
    pub kind: TaskLayout,
}

/// Read the layout of `task` from an open shard
///
/// # Errors
/// Missing datasets or unknown kind.
pub fn read_layout(file: &hdf5::File, task: &str) -> hdf5::Result<StoredLayout> {
    let prefix = format!("layout/{}", task);
    let start: Array1<u64> = crate::io::read_array(file, &format!("{}/start", prefix))?;
    let shape: Array1<u64> = crate::io::read_array(file, &format!("{}/global_shape", prefix))?;
    let code: u8 = read_scalar(file, &format!("{}/kind", prefix))?;
    let kind = TaskLayout::from_code(code)
        .ok_or_else(|| hdf5::Error::Internal(format!("{}: unknown kind {}", task, code)))?;
    let pair = |a: &Array1<u64>| -> hdf5::Result<[usize; 2]> {
        if a.len() == 2 {
            #[allow(clippy::cast_possible_truncation)]
            Ok([a[0] as usize, a[1] as usize])
        } else {
            Err(hdf5::Error::Internal(format!("{}: expected two entries", task)))
        }
    };
    Ok(StoredLayout {
        start: pair(&start)?,
        global_shape: pair(&shape)?,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn scalar_output(value: f64) -> Vec<TaskOutput> {
        vec![TaskOutput {
            name: "Ekin".to_owned(),
            data: TaskData::Scalar(value),
            start: [0, 0],
            global_shape: [1, 1],
        }]
    }

    fn meta(iteration: usize) -> RecordMeta {
        RecordMeta {
            sim_time: iteration as f64 * 0.1,
            iteration,
            wall_time: 0.,
        }
    }

    #[test]
    fn test_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("timeseries");
        let mut writer = SegmentWriter::new(&base, 0, 1, Some(2));
        for i in 0..5 {
            assert_eq!(writer.write(&meta(i), &scalar_output(1.)).unwrap(), i + 1);
        }
        assert_eq!(discover_sets(&base).unwrap(), vec![1, 2, 3]);
        let file = hdf5::File::open(shard_path(&base, 3, 0)).unwrap();
        assert_eq!(read_scalar::<u64>(&file, "records").unwrap(), 1);
        assert_eq!(read_scalar::<u64>(&file, "write_000001/write_number").unwrap(), 5);
        let layout = read_layout(&file, "Ekin").unwrap();
        assert_eq!(layout.kind, TaskLayout::Scalar);
    }

    #[test]
    fn test_resume_continues_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("snapshots");
        let mut writer = SegmentWriter::new(&base, 0, 1, Some(10));
        let outputs = vec![TaskOutput {
            name: "u".to_owned(),
            data: TaskData::Grid(Array2::zeros((4, 4))),
            start: [0, 0],
            global_shape: [4, 4],
        }];
        for i in 0..3 {
            writer.write(&meta(i), &outputs).unwrap();
        }
        let mut resumed = SegmentWriter::new(&base, 0, 1, Some(10));
        resumed.resume().unwrap();
        assert_eq!(resumed.write(&meta(3), &outputs).unwrap(), 4);
        assert_eq!(resumed.set(), 2);
    }

    #[test]
    fn test_names() {
        let base = Path::new("data/checkpoints");
        assert_eq!(
            shard_path(base, 2, 3),
            Path::new("data/checkpoints/checkpoints_s2/checkpoints_s2_p3.h5")
        );
        assert_eq!(record_name(12), "write_000012");
    }
}
