use crate::error::{PipelineError, PipelineResult};
use crate::reduction::{MeshGeometry, RunningMaxDepth};
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct FaceRow {
    v0: u32,
    v1: u32,
    v2: u32,
}

#[derive(Debug, Serialize)]
struct MaxDepthRow {
    node_x: f32,
    node_y: f32,
    max_depth: f32,
}

/// Final locations of the two artifacts of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifacts {
    pub faces: PathBuf,
    pub max_depth: PathBuf,
}

impl ExportedArtifacts {
    pub fn in_dir(dir: &Path, run_id: &str) -> Self {
        ExportedArtifacts {
            faces: dir.join(format!("{run_id}_faces.csv")),
            max_depth: dir.join(format!("{run_id}_max_depth.csv")),
        }
    }

    fn targets(&self) -> [&Path; 2] {
        [self.faces.as_path(), self.max_depth.as_path()]
    }
}

/// Write the faces and max-depth tables for `run_id` into `dir`.
///
/// Both tables are staged next to their targets and only then renamed into
/// place. If anything fails, the previously published pair (if any) is put
/// back and nothing new is left behind. Leftovers of an interrupted earlier
/// publish are reconciled first, see [`recover_interrupted_publish`].
pub fn export_run(
    dir: &Path,
    run_id: &str,
    geometry: &MeshGeometry,
    max_depth: &RunningMaxDepth,
) -> PipelineResult<ExportedArtifacts> {
    if max_depth.len() != geometry.node_count() {
        return Err(PipelineError::ShapeMismatch {
            field: "max_depth",
            expected: geometry.node_count(),
            actual: max_depth.len(),
        });
    }

    fs::create_dir_all(dir).map_err(|source| PipelineError::WriteFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    let artifacts = ExportedArtifacts::in_dir(dir, run_id);
    recover_interrupted_publish(&artifacts)?;
    let staged = [
        staging_path(&artifacts.faces),
        staging_path(&artifacts.max_depth),
    ];

    let written = write_faces(&staged[0], geometry)
        .and_then(|_| write_max_depth(&staged[1], geometry, max_depth));
    if let Err(err) = written {
        discard(&staged);
        return Err(err);
    }

    publish(&staged, &artifacts.targets())?;
    debug!(
        faces = %artifacts.faces.display(),
        max_depth = %artifacts.max_depth.display(),
        "artifacts published"
    );
    Ok(artifacts)
}

/// Bring the artifact directory back to a single consistent pair (or none).
///
/// A publish that died part way leaves `*.bak` files behind. If both targets
/// are present the renames had finished and the backups are dropped;
/// otherwise the backed-up pair is restored over any half-published table.
/// A lone target without backups is the remains of a first publish and is
/// removed. Stale staging files are always removed.
pub fn recover_interrupted_publish(artifacts: &ExportedArtifacts) -> PipelineResult<()> {
    let targets = artifacts.targets();
    let backups = targets.map(backup_path);
    let present = targets.map(Path::exists);
    let backed_up = backups.clone().map(|b| b.exists());
    let failed = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| PipelineError::WriteFailed { path, source }
    };

    if present.iter().all(|&p| p) {
        for (backup, _) in backups.iter().zip(backed_up).filter(|(_, b)| *b) {
            fs::remove_file(backup).map_err(failed(backup.as_path()))?;
            warn!(path = %backup.display(), "removed backup of a completed publish");
        }
    } else if backed_up.iter().any(|&b| b) {
        for (i, backup) in backups.iter().enumerate().filter(|(i, _)| backed_up[*i]) {
            if present[i] {
                fs::remove_file(targets[i]).map_err(failed(targets[i]))?;
            }
            fs::rename(backup, targets[i]).map_err(failed(targets[i]))?;
            warn!(path = %targets[i].display(), "restored artifact of an interrupted publish");
        }
    }

    // Never leave one table without its partner
    let present = targets.map(Path::exists);
    if present[0] != present[1] {
        let lone = if present[0] { targets[0] } else { targets[1] };
        fs::remove_file(lone).map_err(failed(lone))?;
        warn!(path = %lone.display(), "removed unpaired artifact");
    }

    discard(&targets.map(staging_path));
    Ok(())
}

fn staging_path(target: &Path) -> PathBuf {
    sibling(target, "tmp")
}

fn backup_path(target: &Path) -> PathBuf {
    sibling(target, "bak")
}

fn sibling(target: &Path, tag: &str) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{tag}"));
    target.with_file_name(name)
}

// Create CSV writer over a fresh file
fn create_csv_writer(path: &Path) -> PipelineResult<Writer<BufWriter<File>>> {
    let file = File::create(path).map_err(|source| PipelineError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(WriterBuilder::new()
        .has_headers(true)
        .from_writer(BufWriter::new(file)))
}

fn write_faces(path: &Path, geometry: &MeshGeometry) -> PipelineResult<()> {
    let mut wtr = create_csv_writer(path)?;
    for &[v0, v1, v2] in &geometry.faces {
        wtr.serialize(FaceRow { v0, v1, v2 })
            .map_err(|e| csv_failure(path, e))?;
    }
    finish(path, wtr)
}

fn write_max_depth(
    path: &Path,
    geometry: &MeshGeometry,
    max_depth: &RunningMaxDepth,
) -> PipelineResult<()> {
    let mut wtr = create_csv_writer(path)?;
    for ((&node_x, &node_y), &depth) in geometry.x.iter().zip(&geometry.y).zip(max_depth.values()) {
        wtr.serialize(MaxDepthRow {
            node_x,
            node_y,
            max_depth: depth,
        })
        .map_err(|e| csv_failure(path, e))?;
    }
    finish(path, wtr)
}

// Flush through to disk so a rename never exposes a short file
fn finish(path: &Path, wtr: Writer<BufWriter<File>>) -> PipelineResult<()> {
    let write_failed = |source| PipelineError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let buffered = wtr
        .into_inner()
        .map_err(|e| write_failed(io::Error::other(e.to_string())))?;
    let file = buffered
        .into_inner()
        .map_err(|e| write_failed(e.into_error()))?;
    file.sync_all().map_err(write_failed)
}

fn csv_failure(path: &Path, err: csv::Error) -> PipelineError {
    let source = match err.into_kind() {
        csv::ErrorKind::Io(e) => e,
        other => io::Error::other(format!("{other:?}")),
    };
    PipelineError::WriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

fn publish(staged: &[PathBuf; 2], targets: &[&Path; 2]) -> PipelineResult<()> {
    let mut backed_up: Vec<usize> = Vec::new();
    let mut published: Vec<usize> = Vec::new();

    let result = (|| -> PipelineResult<()> {
        for (i, target) in targets.iter().enumerate() {
            if target.exists() {
                fs::rename(target, backup_path(target)).map_err(|source| {
                    PipelineError::WriteFailed {
                        path: target.to_path_buf(),
                        source,
                    }
                })?;
                backed_up.push(i);
            }
        }
        for (i, (from, target)) in staged.iter().zip(targets).enumerate() {
            fs::rename(from, target).map_err(|source| PipelineError::WriteFailed {
                path: target.to_path_buf(),
                source,
            })?;
            published.push(i);
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            for &i in &backed_up {
                let backup = backup_path(targets[i]);
                if let Err(e) = fs::remove_file(&backup) {
                    warn!(path = %backup.display(), error = %e, "stale backup left behind");
                }
            }
            Ok(())
        }
        Err(err) => {
            for &i in &published {
                let _ = fs::remove_file(targets[i]);
            }
            for &i in &backed_up {
                if let Err(e) = fs::rename(backup_path(targets[i]), targets[i]) {
                    warn!(path = %targets[i].display(), error = %e, "could not restore previous artifact");
                }
            }
            discard(staged);
            Err(err)
        }
    }
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn square() -> (MeshGeometry, RunningMaxDepth) {
        let geometry = MeshGeometry {
            x: vec![0.0, 1.0, 1.0, 0.0],
            y: vec![0.0, 0.0, 1.0, 1.0],
            faces: vec![[0, 1, 2], [0, 2, 3]],
        };
        let depth = RunningMaxDepth::seed(vec![0.0, 1.5, 0.25, 2.0]);
        (geometry, depth)
    }

    fn rows(path: &Path) -> Vec<csv::StringRecord> {
        csv::Reader::from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn writes_row_aligned_tables() {
        let dir = TempDir::new().unwrap();
        let (geometry, depth) = square();
        let artifacts = export_run(dir.path(), "12810327", &geometry, &depth).unwrap();

        assert_eq!(artifacts.faces, dir.path().join("12810327_faces.csv"));
        let faces = rows(&artifacts.faces);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1], vec!["0", "2", "3"]);

        let header = csv::Reader::from_path(&artifacts.max_depth)
            .unwrap()
            .headers()
            .unwrap()
            .clone();
        assert_eq!(header, vec!["node_x", "node_y", "max_depth"]);
        let nodes = rows(&artifacts.max_depth);
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[3], vec!["0.0", "1.0", "2.0"]);

        // No staging or backup files remain
        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["12810327_faces.csv", "12810327_max_depth.csv"]);
    }

    #[test]
    fn republish_replaces_previous_pair() {
        let dir = TempDir::new().unwrap();
        let (geometry, depth) = square();
        let first = export_run(dir.path(), "7", &geometry, &depth).unwrap();
        let before = fs::read(&first.max_depth).unwrap();

        let deeper = RunningMaxDepth::seed(vec![3.0; 4]);
        export_run(dir.path(), "7", &geometry, &deeper).unwrap();
        let after = fs::read(&first.max_depth).unwrap();
        assert_ne!(before, after);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_write_keeps_previous_pair() {
        let dir = TempDir::new().unwrap();
        let (geometry, depth) = square();
        let artifacts = export_run(dir.path(), "7", &geometry, &depth).unwrap();
        let faces_before = fs::read(&artifacts.faces).unwrap();
        let depth_before = fs::read(&artifacts.max_depth).unwrap();

        // A directory squatting on the staging name makes the second table unwritable
        fs::create_dir(staging_path(&artifacts.max_depth)).unwrap();
        let deeper = RunningMaxDepth::seed(vec![3.0; 4]);
        let err = export_run(dir.path(), "7", &geometry, &deeper).unwrap_err();
        assert_eq!(err.kind(), "write_failed");

        assert_eq!(fs::read(&artifacts.faces).unwrap(), faces_before);
        assert_eq!(fs::read(&artifacts.max_depth).unwrap(), depth_before);
        assert!(!staging_path(&artifacts.faces).exists());
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    // State after a crash between the two publish renames
    fn half_published(dir: &Path) -> (ExportedArtifacts, Vec<u8>, Vec<u8>) {
        let (geometry, depth) = square();
        let artifacts = export_run(dir, "7", &geometry, &depth).unwrap();
        let faces_before = fs::read(&artifacts.faces).unwrap();
        let depth_before = fs::read(&artifacts.max_depth).unwrap();
        for target in artifacts.targets() {
            fs::rename(target, backup_path(target)).unwrap();
        }
        fs::write(&artifacts.faces, "v0,v1,v2\n9,9,9\n").unwrap();
        fs::write(staging_path(&artifacts.max_depth), "node_x,node_y,max_depth\n").unwrap();
        (artifacts, faces_before, depth_before)
    }

    #[test]
    fn interrupted_publish_restores_previous_pair() {
        let dir = TempDir::new().unwrap();
        let (artifacts, faces_before, depth_before) = half_published(dir.path());

        recover_interrupted_publish(&artifacts).unwrap();
        assert_eq!(fs::read(&artifacts.faces).unwrap(), faces_before);
        assert_eq!(fs::read(&artifacts.max_depth).unwrap(), depth_before);
        assert_eq!(listing(dir.path()), vec!["7_faces.csv", "7_max_depth.csv"]);
    }

    #[test]
    fn export_after_interrupted_publish_leaves_one_pair() {
        let dir = TempDir::new().unwrap();
        let (artifacts, _, _) = half_published(dir.path());
        let (geometry, _) = square();

        let deeper = RunningMaxDepth::seed(vec![3.0; 4]);
        export_run(dir.path(), "7", &geometry, &deeper).unwrap();
        assert_eq!(listing(dir.path()), vec!["7_faces.csv", "7_max_depth.csv"]);
        assert!(rows(&artifacts.max_depth).iter().all(|r| &r[2] == "3.0"));
        assert_eq!(rows(&artifacts.faces)[0], vec!["0", "1", "2"]);
    }

    #[test]
    fn completed_publish_drops_stale_backups() {
        let dir = TempDir::new().unwrap();
        let (geometry, depth) = square();
        let artifacts = export_run(dir.path(), "7", &geometry, &depth).unwrap();
        let published = fs::read(&artifacts.max_depth).unwrap();
        fs::write(backup_path(&artifacts.max_depth), "old").unwrap();

        recover_interrupted_publish(&artifacts).unwrap();
        assert_eq!(listing(dir.path()), vec!["7_faces.csv", "7_max_depth.csv"]);
        assert_eq!(fs::read(&artifacts.max_depth).unwrap(), published);
    }

    #[test]
    fn unpaired_table_from_first_publish_is_removed() {
        let dir = TempDir::new().unwrap();
        let artifacts = ExportedArtifacts::in_dir(dir.path(), "7");
        fs::write(&artifacts.faces, "v0,v1,v2\n0,1,2\n").unwrap();

        recover_interrupted_publish(&artifacts).unwrap();
        assert!(listing(dir.path()).is_empty());
    }

    #[test]
    fn mismatched_depth_length_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (geometry, _) = square();
        let err = export_run(dir.path(), "7", &geometry, &RunningMaxDepth::seed(vec![1.0; 3])).unwrap_err();
        assert_eq!(err.kind(), "shape_mismatch");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
