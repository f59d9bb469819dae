use crate::error::{PipelineError, PipelineResult};
use std::path::PathBuf;
use std::str::FromStr;

// NetCDF variable names read from each snapshot
#[derive(Debug, Clone)]
pub struct VariableNames {
    pub node_x: String,
    pub node_y: String,
    pub bathymetry: String,
    pub elevation: String,
    pub face_nodes: String,
}

impl VariableNames {
    pub fn new() -> Self {
        VariableNames {
            node_x: "SCHISM_hgrid_node_x".to_string(),
            node_y: "SCHISM_hgrid_node_y".to_string(),
            bathymetry: "depth".to_string(),
            elevation: "elev".to_string(),
            face_nodes: "SCHISM_hgrid_face_nodes".to_string(),
        }
    }
}

impl Default for VariableNames {
    fn default() -> Self {
        Self::new()
    }
}

/// How the elevation variable of a snapshot is turned into one value per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Elevation as stored, one snapshot is one time point.
    Hourly,
    /// Per-node maximum over the snapshot's embedded time axis.
    Daily,
}

impl FromStr for AggregationMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(AggregationMode::Hourly),
            "daily" => Ok(AggregationMode::Daily),
            other => Err(PipelineError::UnsupportedAggregationMode(other.to_string())),
        }
    }
}

// Inclusive range of timestep indices kept for the reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub start_index: u64,
    pub end_index: u64,
}

impl WindowConfig {
    pub fn new(start_index: u64, end_index: u64) -> PipelineResult<Self> {
        if start_index > end_index {
            return Err(PipelineError::InvalidWindow {
                start: start_index,
                end: end_index,
            });
        }
        Ok(WindowConfig {
            start_index,
            end_index,
        })
    }

    pub fn contains(&self, index: u64) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }
}

impl Default for WindowConfig {
    // Six days of spin-up, ten-day run
    fn default() -> Self {
        WindowConfig {
            start_index: 144,
            end_index: 240,
        }
    }
}

/// File naming of snapshot artifacts: `{prefix}{timestep}{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPattern {
    pub prefix: String,
    pub suffix: String,
}

impl SnapshotPattern {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        SnapshotPattern {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Timestep index of a matching file name, `None` for unrelated files.
    pub fn timestep_of(&self, file_name: &str) -> Option<u64> {
        let digits = file_name
            .strip_prefix(&self.prefix)?
            .strip_suffix(&self.suffix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl Default for SnapshotPattern {
    fn default() -> Self {
        SnapshotPattern::new("schout_", ".nc.gz")
    }
}

// Everything needed to process one run+grid unit
#[derive(Debug, Clone)]
pub struct UnitConfig {
    pub window: WindowConfig,
    pub pattern: SnapshotPattern,
    pub aggregation: AggregationMode,
    pub variables: VariableNames,
    pub shards: usize,
    pub retries: usize,
}

impl Default for UnitConfig {
    fn default() -> Self {
        UnitConfig {
            window: WindowConfig::default(),
            pattern: SnapshotPattern::default(),
            aggregation: AggregationMode::Hourly,
            variables: VariableNames::new(),
            shards: 1,
            retries: 0,
        }
    }
}

// Directory layout and pool sizing for a batch of units
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub input_root: PathBuf,
    pub output_root: Option<PathBuf>,
    pub workers: usize,
    pub unit: UnitConfig,
}

impl BatchConfig {
    /// `{input_root}/{run_id}/{grid_id}/outputs`
    pub fn snapshot_dir(&self, run_id: &str, grid_id: &str) -> PathBuf {
        self.input_root.join(run_id).join(grid_id).join("outputs")
    }

    /// Artifacts go next to the snapshots unless an output root is set.
    pub fn export_dir(&self, run_id: &str, grid_id: &str) -> PathBuf {
        match &self.output_root {
            Some(root) => root.join(run_id).join(grid_id),
            None => self.snapshot_dir(run_id, grid_id),
        }
    }
}
