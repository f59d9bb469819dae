use crate::config::{AggregationMode, VariableNames};
use crate::error::{PipelineError, PipelineResult};
use std::path::PathBuf;

/// Where a snapshot dataset lives.
#[derive(Debug, Clone)]
pub enum SnapshotSource {
    File(PathBuf),
    /// Fully decompressed dataset bytes; `name` is only used in messages.
    Memory { name: String, bytes: Vec<u8> },
}

impl SnapshotSource {
    pub fn name(&self) -> String {
        match self {
            SnapshotSource::File(path) => path.display().to_string(),
            SnapshotSource::Memory { name, .. } => name.clone(),
        }
    }
}

// Full contents of one snapshot
#[derive(Debug, Clone)]
pub struct MeshSnapshot {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    /// 0-based node indices, first three corners of each face
    pub faces: Vec<[u32; 3]>,
    pub fields: SnapshotFields,
}

// Per-node fields that change between snapshots
#[derive(Debug, Clone)]
pub struct SnapshotFields {
    pub bathymetry: Vec<f32>,
    pub elevation: Vec<f32>,
}

/// Read coordinates, topology, bathymetry and elevation.
pub fn read_snapshot(
    source: &SnapshotSource,
    mode: AggregationMode,
    names: &VariableNames,
) -> PipelineResult<MeshSnapshot> {
    with_dataset(source, |file| {
        let label = source.name();
        let x = read_coordinate(file, &names.node_x, &label)?;
        let y = read_coordinate(file, &names.node_y, &label)?;
        if x.len() != y.len() {
            return Err(PipelineError::ShapeMismatch {
                field: "node_y",
                expected: x.len(),
                actual: y.len(),
            });
        }
        let faces = read_faces(file, &names.face_nodes, x.len(), &label)?;
        let fields = read_fields_from(file, mode, names, &label)?;
        Ok(MeshSnapshot { x, y, faces, fields })
    })
}

/// Read only bathymetry and elevation, for snapshots after the first.
pub fn read_fields(
    source: &SnapshotSource,
    mode: AggregationMode,
    names: &VariableNames,
) -> PipelineResult<SnapshotFields> {
    with_dataset(source, |file| read_fields_from(file, mode, names, &source.name()))
}

// The dataset handle is dropped when this returns, on success or error
fn with_dataset<T>(
    source: &SnapshotSource,
    read: impl FnOnce(&netcdf::File) -> PipelineResult<T>,
) -> PipelineResult<T> {
    match source {
        SnapshotSource::File(path) => {
            let file = netcdf::open(path).map_err(|e| {
                if path.exists() {
                    PipelineError::malformed(source.name(), format!("cannot open dataset: {e}"))
                } else {
                    PipelineError::SnapshotIo {
                        path: path.clone(),
                        source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
                    }
                }
            })?;
            read(&file)
        }
        SnapshotSource::Memory { name, bytes } => {
            let file = netcdf::open_mem(Some(name.as_str()), bytes).map_err(|e| {
                PipelineError::malformed(name.clone(), format!("cannot open in-memory dataset: {e}"))
            })?;
            read(&*file)
        }
    }
}

fn read_fields_from(
    file: &netcdf::File,
    mode: AggregationMode,
    names: &VariableNames,
    label: &str,
) -> PipelineResult<SnapshotFields> {
    let bathymetry = read_field(file, &names.bathymetry, label)?.values;
    let elev = read_field(file, &names.elevation, label)?;
    let elevation = match mode {
        AggregationMode::Hourly => elev.values,
        AggregationMode::Daily => max_over_time(elev, label)?,
    };
    Ok(SnapshotFields {
        bathymetry,
        elevation,
    })
}

struct Array {
    values: Vec<f32>,
    shape: Vec<usize>,
}

fn variable<'f>(file: &'f netcdf::File, name: &str, label: &str) -> PipelineResult<netcdf::Variable<'f>> {
    file.variable(name)
        .ok_or_else(|| PipelineError::malformed(label, format!("missing variable {name}")))
}

fn read_values(var: &netcdf::Variable<'_>, name: &str, label: &str) -> PipelineResult<Vec<f32>> {
    var.get_values::<f32, _>(..)
        .map_err(|e| PipelineError::malformed(label, format!("cannot read {name}: {e}")))
}

// Per-node field; masked values become NaN and end up dry
fn read_field(file: &netcdf::File, name: &str, label: &str) -> PipelineResult<Array> {
    let var = variable(file, name, label)?;
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let mut values = read_values(&var, name, label)?;

    if let Some(fill) = fill_value(&var) {
        for v in values.iter_mut().filter(|v| **v == fill) {
            *v = f32::NAN;
        }
    }
    Ok(Array { values, shape })
}

// Node coordinates are exported as-is, so a masked or non-finite one is corrupt
fn read_coordinate(file: &netcdf::File, name: &str, label: &str) -> PipelineResult<Vec<f32>> {
    let var = variable(file, name, label)?;
    let values = read_values(&var, name, label)?;
    let fill = fill_value(&var);
    if let Some(node) = values
        .iter()
        .position(|&v| !v.is_finite() || Some(v) == fill)
    {
        return Err(PipelineError::malformed(
            label,
            format!("{name} has no usable value at node {node}"),
        ));
    }
    Ok(values)
}

fn fill_value(var: &netcdf::Variable<'_>) -> Option<f32> {
    match var.attribute("_FillValue")?.value().ok()? {
        netcdf::AttributeValue::Float(v) => Some(v),
        netcdf::AttributeValue::Double(v) => Some(v as f32),
        _ => None,
    }
}

// Elevation stored as [time, node]; a 1-D variable is a single time step
fn max_over_time(elev: Array, label: &str) -> PipelineResult<Vec<f32>> {
    let steps = match elev.shape.as_slice() {
        [] | [_] => return Ok(elev.values),
        [steps, ..] => *steps,
    };
    if steps == 0 {
        return Err(PipelineError::malformed(label, "elevation has no time steps"));
    }
    if elev.values.len() % steps != 0 {
        return Err(PipelineError::malformed(
            label,
            format!("elevation length {} is not a multiple of {steps} time steps", elev.values.len()),
        ));
    }
    let nodes = elev.values.len() / steps;
    if nodes == 0 {
        return Ok(Vec::new());
    }

    let mut max = elev.values[..nodes].to_vec();
    for step in elev.values.chunks_exact(nodes).skip(1) {
        for (m, &v) in max.iter_mut().zip(step) {
            // f32::max skips NaN on either side
            *m = m.max(v);
        }
    }
    Ok(max)
}

fn read_faces(
    file: &netcdf::File,
    name: &str,
    node_count: usize,
    label: &str,
) -> PipelineResult<Vec<[u32; 3]>> {
    let var = variable(file, name, label)?;
    let corners = match var.dimensions() {
        [_, corners] => corners.len(),
        dims => {
            return Err(PipelineError::malformed(
                label,
                format!("{name} must be 2-D, found {} dimensions", dims.len()),
            ));
        }
    };
    if corners < 3 {
        return Err(PipelineError::malformed(
            label,
            format!("{name} has {corners} nodes per face, need at least 3"),
        ));
    }

    let raw = var
        .get_values::<i64, _>(..)
        .map_err(|e| PipelineError::malformed(label, format!("cannot read {name}: {e}")))?;

    raw.chunks_exact(corners)
        .enumerate()
        .map(|(face, row)| {
            to_zero_based(row, node_count).map_err(|one_based| {
                PipelineError::malformed(
                    label,
                    format!("face {face} references node {one_based} outside 1..={node_count}"),
                )
            })
        })
        .collect()
}

/// First three corners of a 1-based face row as 0-based node indices.
///
/// Returns the offending 1-based value if a corner is outside `1..=node_count`.
fn to_zero_based(row: &[i64], node_count: usize) -> Result<[u32; 3], i64> {
    let mut tri = [0u32; 3];
    for (slot, &one_based) in tri.iter_mut().zip(row) {
        *slot = one_based
            .checked_sub(1)
            .and_then(|index| usize::try_from(index).ok())
            .filter(|&index| index < node_count)
            .and_then(|index| u32::try_from(index).ok())
            .ok_or(one_based)?;
    }
    Ok(tri)
}
