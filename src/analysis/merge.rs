//! Consolidation of segment shards into one time ordered file
//!
//! `merge(base)` reads every set `base/name_s*/` and writes `base/name.h5`:
//! ```text
//! sim_time, iteration, wall_time, write_number     [records]
//! tasks/{task}                                      [records, nx, ny] or [records]
//! ```
//! Records missing from any shard of their set are left out, so an
//! interrupted run can be merged. The merged file is written next to the
//! target and renamed when complete.
use super::segment::{
    discover_sets, handler_name, read_layout, record_name, set_dir, shard_path, StoredLayout,
};
use super::task::TaskLayout;
use crate::error::MergeError;
use crate::io::{
    read_array, read_array_complex, read_scalar, write_array, write_slice, write_slice_complex,
};
use indexmap::IndexMap;
use ndarray::{s, Array1, Axis, Ix1, Ix2};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Result of a successful merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged file (re)written
    Merged {
        /// Records in the merged file
        records: usize,
        /// Records left out because a shard did not hold them
        skipped: usize,
        /// Records dropped because their write number appeared before
        duplicates: usize,
    },
    /// Merged file already holds exactly the discovered records
    AlreadyMerged {
        /// Records in the merged file
        records: usize,
    },
}

/// Path of the merged file of a handler
pub fn merged_path<P: AsRef<Path>>(base_path: P) -> PathBuf {
    let base_path = base_path.as_ref();
    base_path.join(format!("{}.h5", handler_name(base_path)))
}

/// Open shards of one set
struct SetShards {
    dir: PathBuf,
    shards: Vec<hdf5::File>,
    layouts: Vec<IndexMap<String, StoredLayout>>,
    complete: usize,
}

/// One record of the merged file
#[derive(Debug, Clone, Copy)]
struct Entry {
    set: usize,
    k: usize,
    sim_time: f64,
    iteration: u64,
    wall_time: f64,
    write_number: u64,
}

/// Consolidate all segments of the handler at `base_path`
///
/// # Errors
/// No segments, unreadable shards, shards that disagree on the task
/// layout or a merged file that cannot be written.
pub fn merge<P: AsRef<Path>>(base_path: P) -> Result<MergeOutcome, MergeError> {
    let base_path = base_path.as_ref();
    let sets = discover_sets(base_path).map_err(|source| MergeError::Io {
        path: base_path.to_path_buf(),
        source,
    })?;
    if sets.is_empty() {
        return Err(MergeError::NoSegments(base_path.to_path_buf()));
    }

    let mut skipped = 0;
    let mut opened: Vec<(usize, SetShards)> = Vec::new();
    for set in sets {
        let (shards, incomplete) = open_set(base_path, set)?;
        skipped += incomplete;
        if shards.complete > 0 {
            opened.push((set, shards));
        }
    }
    let tasks = match opened.first() {
        Some((_, first)) => first.layouts[0].clone(),
        None => {
            return Err(MergeError::Inconsistent {
                path: base_path.to_path_buf(),
                reason: "no record is complete on every shard".to_owned(),
            })
        }
    };
    for (_, shards) in &opened {
        check_layouts(shards, &tasks)?;
    }

    // Time ordered records without repeated write numbers
    let mut entries = Vec::new();
    for (set, shards) in &opened {
        let root = &shards.shards[0];
        let path = shard_path(base_path, *set, 0);
        let corrupt = |source: hdf5::Error| MergeError::Corrupt {
            path: path.clone(),
            source,
        };
        for k in 1..=shards.complete {
            let group = record_name(k);
            entries.push(Entry {
                set: *set,
                k,
                sim_time: read_scalar(root, &format!("{}/sim_time", group)).map_err(corrupt)?,
                iteration: read_scalar(root, &format!("{}/iteration", group)).map_err(corrupt)?,
                wall_time: read_scalar(root, &format!("{}/wall_time", group)).map_err(corrupt)?,
                write_number: read_scalar(root, &format!("{}/write_number", group))
                    .map_err(corrupt)?,
            });
        }
    }
    entries.sort_by(|a, b| {
        a.sim_time
            .total_cmp(&b.sim_time)
            .then(a.write_number.cmp(&b.write_number))
    });
    let before = entries.len();
    let mut seen = HashSet::new();
    entries.retain(|e| seen.insert(e.write_number));
    let duplicates = before - entries.len();

    let target = merged_path(base_path);
    let write_numbers: Vec<u64> = entries.iter().map(|e| e.write_number).collect();
    if already_merged(&target, &write_numbers) {
        return Ok(MergeOutcome::AlreadyMerged {
            records: entries.len(),
        });
    }

    let partial = target.with_extension("h5.partial");
    write_merged(&partial, &entries, &opened, &tasks).map_err(|source| MergeError::Write {
        path: partial.clone(),
        source,
    })?;
    std::fs::rename(&partial, &target).map_err(|source| MergeError::Io {
        path: target.clone(),
        source,
    })?;
    tracing::info!(
        "merged {} records into {:?} ({} skipped, {} duplicates)",
        entries.len(),
        target,
        skipped,
        duplicates
    );
    Ok(MergeOutcome::Merged {
        records: entries.len(),
        skipped,
        duplicates,
    })
}

/// Open all shards of `set`. Returns the shards and the number of records
/// that are not present on every shard.
fn open_set(base_path: &Path, set: usize) -> Result<(SetShards, usize), MergeError> {
    let dir = set_dir(base_path, set);
    let mut shards = Vec::new();
    let mut layouts = Vec::new();
    let mut records = Vec::new();
    let mut nprocs = None;
    let mut rank = 0;
    loop {
        let path = shard_path(base_path, set, rank);
        if !path.exists() {
            break;
        }
        let corrupt = |source: hdf5::Error| MergeError::Corrupt {
            path: path.clone(),
            source,
        };
        let file = hdf5::File::open(&path).map_err(corrupt)?;
        let n: u64 = read_scalar(&file, "nprocs").map_err(corrupt)?;
        let r: u64 = read_scalar(&file, "records").map_err(corrupt)?;
        #[allow(clippy::cast_possible_truncation)]
        let (n, r) = (n as usize, r as usize);
        if nprocs.map_or(false, |m| m != n) {
            return Err(MergeError::Inconsistent {
                path: dir,
                reason: format!("shard {} was written by {} processes", rank, n),
            });
        }
        nprocs = Some(n);
        layouts.push(read_layouts(&file).map_err(corrupt)?);
        records.push(r);
        shards.push(file);
        rank += 1;
    }
    let most = records.iter().copied().max().unwrap_or(0);
    let complete = if nprocs == Some(shards.len()) {
        records.iter().copied().min().unwrap_or(0)
    } else {
        tracing::warn!(
            "{:?}: {} of {:?} shards present, set left out",
            dir,
            shards.len(),
            nprocs
        );
        0
    };
    Ok((
        SetShards {
            dir,
            shards,
            layouts,
            complete,
        },
        most - complete,
    ))
}

/// Task layouts stored in a shard, in task order
fn read_layouts(file: &hdf5::File) -> hdf5::Result<IndexMap<String, StoredLayout>> {
    let mut names = file.group("layout")?.member_names()?;
    names.sort();
    let mut layouts = IndexMap::new();
    for name in names {
        let layout = read_layout(file, &name)?;
        layouts.insert(name, layout);
    }
    Ok(layouts)
}

/// Every shard must hold the same tasks with the same global shape
fn check_layouts(
    shards: &SetShards,
    tasks: &IndexMap<String, StoredLayout>,
) -> Result<(), MergeError> {
    for (rank, layouts) in shards.layouts.iter().enumerate() {
        let same = layouts.len() == tasks.len()
            && tasks.iter().all(|(name, reference)| {
                layouts.get(name).map_or(false, |l| {
                    l.kind == reference.kind && l.global_shape == reference.global_shape
                })
            });
        if !same {
            return Err(MergeError::Inconsistent {
                path: shards.dir.clone(),
                reason: format!("task layout of shard {} differs", rank),
            });
        }
    }
    Ok(())
}

/// True if `target` exists and holds exactly `write_numbers`
fn already_merged(target: &Path, write_numbers: &[u64]) -> bool {
    if !target.exists() {
        return false;
    }
    hdf5::File::open(target)
        .and_then(|file| read_array::<u64, Ix1>(&file, "write_number"))
        .map_or(false, |stored| stored.as_slice() == Some(write_numbers))
}

fn shards_of(opened: &[(usize, SetShards)], set: usize) -> hdf5::Result<&SetShards> {
    opened
        .iter()
        .find(|(s, _)| *s == set)
        .map(|(_, shards)| shards)
        .ok_or_else(|| hdf5::Error::Internal(format!("set {} not opened", set)))
}

fn write_merged(
    path: &Path,
    entries: &[Entry],
    opened: &[(usize, SetShards)],
    tasks: &IndexMap<String, StoredLayout>,
) -> hdf5::Result<()> {
    let file = hdf5::File::create(path)?;
    let n = entries.len();
    write_array(&file, "sim_time", &entries.iter().map(|e| e.sim_time).collect::<Array1<f64>>())?;
    write_array(&file, "iteration", &entries.iter().map(|e| e.iteration).collect::<Array1<u64>>())?;
    write_array(&file, "wall_time", &entries.iter().map(|e| e.wall_time).collect::<Array1<f64>>())?;
    write_array(
        &file,
        "write_number",
        &entries.iter().map(|e| e.write_number).collect::<Array1<u64>>(),
    )?;

    for (task, layout) in tasks {
        let name = format!("tasks/{}", task);
        if layout.kind == TaskLayout::Scalar {
            let mut values = Array1::<f64>::zeros(n);
            for (r, e) in entries.iter().enumerate() {
                let source = &shards_of(opened, e.set)?.shards[0];
                values[r] = read_scalar(source, &format!("{}/{}", record_name(e.k), name))?;
            }
            write_array(&file, &name, &values)?;
            continue;
        }
        let [g0, g1] = layout.global_shape;
        let full_shape = [n, g0, g1];
        for (r, e) in entries.iter().enumerate() {
            let set = shards_of(opened, e.set)?;
            let record = format!("{}/{}", record_name(e.k), name);
            for (shard, layouts) in set.shards.iter().zip(set.layouts.iter()) {
                let st = layouts.get(task).map_or([0, 0], |l| l.start);
                if layout.kind == TaskLayout::Grid {
                    let block = read_array::<f64, Ix2>(shard, &record)?;
                    let (b0, b1) = block.dim();
                    let slice = s![r..r + 1, st[0]..st[0] + b0, st[1]..st[1] + b1];
                    write_slice(&file, &name, &block.insert_axis(Axis(0)), slice, &full_shape)?;
                } else {
                    let block = read_array_complex::<f64, Ix2>(shard, &record)?;
                    let (b0, b1) = block.dim();
                    let slice = s![r..r + 1, st[0]..st[0] + b0, st[1]..st[1] + b1];
                    write_slice_complex(
                        &file,
                        &name,
                        &block.insert_axis(Axis(0)),
                        slice,
                        &full_shape,
                    )?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::segment::{RecordMeta, SegmentWriter, TaskOutput};
    use crate::analysis::task::TaskData;
    use ndarray::{Array2, Array3};
    use num_complex::Complex;

    /// Global field is 8 x 4, split in x over `nprocs` shards
    fn outputs(rank: usize, nprocs: usize, write: usize) -> Vec<TaskOutput> {
        let rows = 8 / nprocs;
        let u = Array2::from_shape_fn((rows, 4), |(i, _)| {
            (write * 100 + rank * rows + i) as f64
        });
        let uhat = u.mapv(|x| Complex::new(x, -x));
        vec![
            TaskOutput {
                name: "u".to_owned(),
                data: TaskData::Grid(u),
                start: [rank * rows, 0],
                global_shape: [8, 4],
            },
            TaskOutput {
                name: "uhat".to_owned(),
                data: TaskData::Coeff(uhat),
                start: [rank * rows, 0],
                global_shape: [8, 4],
            },
            TaskOutput {
                name: "Ekin".to_owned(),
                data: TaskData::Scalar(write as f64),
                start: [0, 0],
                global_shape: [1, 1],
            },
        ]
    }

    fn run(base: &Path, nprocs: usize, max_writes: usize, writes: usize) -> Vec<SegmentWriter> {
        let mut writers: Vec<SegmentWriter> = (0..nprocs)
            .map(|rank| SegmentWriter::new(base, rank, nprocs, Some(max_writes)))
            .collect();
        for w in 1..=writes {
            let meta = RecordMeta {
                sim_time: w as f64 * 0.5,
                iteration: w * 10,
                wall_time: 0.,
            };
            for (rank, writer) in writers.iter_mut().enumerate() {
                writer.write(&meta, &outputs(rank, nprocs, w)).unwrap();
            }
        }
        writers
    }

    #[test]
    fn test_merge_shards_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("snapshots");
        run(&base, 4, 4, 12);
        assert_eq!(discover_sets(&base).unwrap(), vec![1, 2, 3]);

        let outcome = merge(&base).unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                records: 12,
                skipped: 0,
                duplicates: 0
            }
        );

        let file = hdf5::File::open(merged_path(&base)).unwrap();
        let write_number: Array1<u64> = read_array(&file, "write_number").unwrap();
        assert_eq!(write_number.to_vec(), (1..=12).collect::<Vec<u64>>());
        let sim_time: Array1<f64> = read_array(&file, "sim_time").unwrap();
        assert!(sim_time.windows(2).into_iter().all(|w| w[0] <= w[1]));
        let u: Array3<f64> = read_array(&file, "tasks/u").unwrap();
        assert_eq!(u.dim(), (12, 8, 4));
        for ((r, i, _), v) in u.indexed_iter() {
            assert!((v - ((r + 1) * 100 + i) as f64).abs() < 1e-12);
        }
        let uhat = read_array_complex::<f64, ndarray::Ix3>(&file, "tasks/uhat").unwrap();
        assert_eq!(uhat[[11, 7, 3]], Complex::new(1207., -1207.));
        let ekin: Array1<f64> = read_array(&file, "tasks/Ekin").unwrap();
        assert!((ekin[5] - 6.).abs() < 1e-12);
        drop(file);

        assert_eq!(
            merge(&base).unwrap(),
            MergeOutcome::AlreadyMerged { records: 12 }
        );
    }

    #[test]
    fn test_partial_segment() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("timeseries");
        let mut writers = run(&base, 2, 3, 5);
        // Rank 0 got one more record in before the run stopped
        let meta = RecordMeta {
            sim_time: 3.,
            iteration: 60,
            wall_time: 0.,
        };
        writers[0].write(&meta, &outputs(0, 2, 6)).unwrap();

        let outcome = merge(&base).unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                records: 5,
                skipped: 1,
                duplicates: 0
            }
        );
        // Rank 1 catches up, the merged file is rewritten
        writers[1].write(&meta, &outputs(1, 2, 6)).unwrap();
        assert_eq!(
            merge(&base).unwrap(),
            MergeOutcome::Merged {
                records: 6,
                skipped: 0,
                duplicates: 0
            }
        );
    }

    #[test]
    fn test_missing_shard_skips_set() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("checkpoints");
        run(&base, 2, 2, 4);
        std::fs::remove_file(shard_path(&base, 2, 1)).unwrap();
        assert_eq!(
            merge(&base).unwrap(),
            MergeOutcome::Merged {
                records: 2,
                skipped: 2,
                duplicates: 0
            }
        );
    }

    #[test]
    fn test_no_segments() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            merge(dir.path().join("nothing")),
            Err(MergeError::NoSegments(_))
        ));
    }
}
