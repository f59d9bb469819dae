use crate::config::{SnapshotPattern, WindowConfig};
use crate::error::{PipelineError, PipelineResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub timestep: u64,
    pub path: PathBuf,
}

/// In-window snapshots of one unit, ascending by timestep.
#[derive(Debug, Clone, Default)]
pub struct WindowedSnapshotIndex {
    pub entries: Vec<SnapshotEntry>,
}

impl WindowedSnapshotIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn timesteps(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.timestep).collect()
    }
}

/// List `dir` and keep the snapshots whose timestep lies inside `window`.
///
/// Names that do not follow `pattern` are unrelated files and are skipped
/// without error. Subdirectories are never considered.
pub fn select_window(
    dir: &Path,
    pattern: &SnapshotPattern,
    window: &WindowConfig,
) -> PipelineResult<WindowedSnapshotIndex> {
    let list_err = |source| PipelineError::ListDirectory {
        dir: dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        if entry.file_type().map_err(list_err)?.is_dir() {
            continue;
        }
        // Non UTF-8 names cannot match the pattern
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }

    let index = select_from_names(dir, names, pattern, window);
    debug!(
        dir = %dir.display(),
        selected = index.len(),
        start = window.start_index,
        end = window.end_index,
        "windowed snapshot index built"
    );
    Ok(index)
}

/// Pure part of [`select_window`], over an already-listed set of names.
pub fn select_from_names<I>(
    dir: &Path,
    names: I,
    pattern: &SnapshotPattern,
    window: &WindowConfig,
) -> WindowedSnapshotIndex
where
    I: IntoIterator<Item = String>,
{
    let mut entries: Vec<SnapshotEntry> = names
        .into_iter()
        .filter_map(|name| match pattern.timestep_of(&name) {
            Some(timestep) if window.contains(timestep) => Some(SnapshotEntry {
                timestep,
                path: dir.join(name),
            }),
            Some(timestep) => {
                trace!(file = %name, timestep, "outside window");
                None
            }
            None => {
                trace!(file = %name, "not a snapshot, skipped");
                None
            }
        })
        .collect();

    // Zero-padded and plain names can share a timestep; keep the order stable
    entries.sort_by(|a, b| a.timestep.cmp(&b.timestep).then_with(|| a.path.cmp(&b.path)));
    WindowedSnapshotIndex { entries }
}
