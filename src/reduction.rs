use crate::config::UnitConfig;
use crate::depth::compute_depth;
use crate::error::{PipelineError, PipelineResult};
use crate::io::decompress::prepare_source;
use crate::io::export::{ExportedArtifacts, export_run};
use crate::io::snapshot::{read_fields, read_snapshot};
use crate::window::{SnapshotEntry, WindowedSnapshotIndex, select_window};
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

// Mesh coordinates and triangle topology, captured from the first snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct MeshGeometry {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub faces: Vec<[u32; 3]>,
}

impl MeshGeometry {
    pub fn node_count(&self) -> usize {
        self.x.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

/// Element-wise maximum of every depth field seen so far.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningMaxDepth {
    values: Vec<f32>,
}

impl RunningMaxDepth {
    pub fn seed(depth: Vec<f32>) -> Self {
        RunningMaxDepth { values: depth }
    }

    pub fn update(&mut self, depth: &[f32]) -> PipelineResult<()> {
        if depth.len() != self.values.len() {
            return Err(PipelineError::ShapeMismatch {
                field: "depth",
                expected: self.values.len(),
                actual: depth.len(),
            });
        }
        for (max, &d) in self.values.iter_mut().zip(depth) {
            *max = max.max(d);
        }
        Ok(())
    }

    /// Combine two partial maxima over disjoint snapshot ranges.
    pub fn merge(mut self, other: RunningMaxDepth) -> PipelineResult<Self> {
        self.update(&other.values)?;
        Ok(self)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Shared flag checked between snapshot steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitReduction {
    pub geometry: MeshGeometry,
    pub max_depth: RunningMaxDepth,
    pub timesteps: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct UnitSummary {
    pub snapshots: usize,
    pub nodes: usize,
    pub faces: usize,
    pub artifacts: ExportedArtifacts,
}

/// Reduce one unit and publish its artifacts under `run_id`.
///
/// Nothing is written unless every in-window snapshot was reduced.
pub fn run_unit(
    snapshot_dir: &Path,
    export_dir: &Path,
    run_id: &str,
    config: &UnitConfig,
    cancel: &CancelToken,
) -> PipelineResult<UnitSummary> {
    let reduction = reduce_unit(snapshot_dir, config, cancel)?;
    cancel.check()?;

    let artifacts = export_run(export_dir, run_id, &reduction.geometry, &reduction.max_depth)?;
    info!(
        run_id,
        snapshots = reduction.timesteps.len(),
        nodes = reduction.geometry.node_count(),
        faces = reduction.geometry.face_count(),
        "max depth exported"
    );
    Ok(UnitSummary {
        snapshots: reduction.timesteps.len(),
        nodes: reduction.geometry.node_count(),
        faces: reduction.geometry.face_count(),
        artifacts,
    })
}

pub fn reduce_unit(
    snapshot_dir: &Path,
    config: &UnitConfig,
    cancel: &CancelToken,
) -> PipelineResult<UnitReduction> {
    let index = select_window(snapshot_dir, &config.pattern, &config.window)?;
    reduce_index(snapshot_dir, &index, config, cancel)
}

pub fn reduce_index(
    snapshot_dir: &Path,
    index: &WindowedSnapshotIndex,
    config: &UnitConfig,
    cancel: &CancelToken,
) -> PipelineResult<UnitReduction> {
    if index.is_empty() {
        return Err(PipelineError::EmptyWindow {
            dir: snapshot_dir.to_path_buf(),
            start: config.window.start_index,
            end: config.window.end_index,
        });
    }
    let (first, rest) = (&index.entries[0], &index.entries[1..]);

    cancel.check()?;
    let (geometry, seed) = load_first(first, config)?;
    debug!(
        timestep = first.timestep,
        nodes = geometry.node_count(),
        "mesh geometry captured"
    );

    let max_depth = if config.shards <= 1 || rest.len() < 2 {
        fold_entries(seed, rest, config, cancel)?
    } else {
        let chunk = rest.len().div_ceil(config.shards);
        // Each shard starts from the seed; max is idempotent so the overlap is harmless
        rest.par_chunks(chunk)
            .map(|shard| fold_entries(seed.clone(), shard, config, cancel))
            .try_reduce_with(|a, b| a.merge(b))
            .unwrap_or_else(|| Ok(seed.clone()))?
    };

    Ok(UnitReduction {
        geometry,
        max_depth,
        timesteps: index.timesteps(),
    })
}

/// Fold `entries` into `acc` in the order given.
pub fn fold_entries(
    mut acc: RunningMaxDepth,
    entries: &[SnapshotEntry],
    config: &UnitConfig,
    cancel: &CancelToken,
) -> PipelineResult<RunningMaxDepth> {
    for entry in entries {
        cancel.check()?;
        let depth = load_depth(entry, config)?;
        acc.update(&depth)?;
    }
    Ok(acc)
}

fn load_first(
    entry: &SnapshotEntry,
    config: &UnitConfig,
) -> PipelineResult<(MeshGeometry, RunningMaxDepth)> {
    with_retries(entry, config.retries, || {
        let source = prepare_source(&entry.path)?;
        let snapshot = read_snapshot(&source, config.aggregation, &config.variables)?;
        let depth = compute_depth(&snapshot.fields.elevation, &snapshot.fields.bathymetry)?;
        if depth.len() != snapshot.x.len() {
            return Err(PipelineError::ShapeMismatch {
                field: "depth",
                expected: snapshot.x.len(),
                actual: depth.len(),
            });
        }
        let seed = RunningMaxDepth::seed(depth);
        if seed.is_empty() {
            return Err(PipelineError::malformed(source.name(), "mesh has no nodes"));
        }
        let geometry = MeshGeometry {
            x: snapshot.x,
            y: snapshot.y,
            faces: snapshot.faces,
        };
        Ok((geometry, seed))
    })
}

fn load_depth(entry: &SnapshotEntry, config: &UnitConfig) -> PipelineResult<Vec<f32>> {
    with_retries(entry, config.retries, || {
        let source = prepare_source(&entry.path)?;
        let fields = read_fields(&source, config.aggregation, &config.variables)?;
        compute_depth(&fields.elevation, &fields.bathymetry)
    })
}

fn with_retries<T>(
    entry: &SnapshotEntry,
    retries: usize,
    mut attempt: impl FnMut() -> PipelineResult<T>,
) -> PipelineResult<T> {
    let mut failures = 0;
    loop {
        match attempt() {
            Err(e) if e.is_retryable() && failures < retries => {
                failures += 1;
                warn!(
                    file = %entry.path.display(),
                    attempt = failures,
                    error = %e,
                    "snapshot read failed, retrying"
                );
            }
            result => return result,
        }
    }
}
