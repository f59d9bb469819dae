use crate::config::BatchConfig;
use crate::error::PipelineError;
use crate::reduction::{CancelToken, UnitSummary, run_unit};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use tracing::{error, info};

/// One (run id, grid id) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub run_id: String,
    pub grid_id: String,
}

pub fn units(run_ids: &[String], grid_ids: &[String]) -> Vec<Unit> {
    run_ids
        .iter()
        .flat_map(|run_id| {
            grid_ids.iter().map(move |grid_id| Unit {
                run_id: run_id.clone(),
                grid_id: grid_id.clone(),
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: Unit,
    pub result: Result<UnitSummary, PipelineError>,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Process every unit on a pool of `config.workers` threads.
///
/// Units share nothing; a failing unit is recorded and the others carry on.
/// With `fail_fast`, the first failure cancels units still in progress.
pub fn run_batch(
    units: &[Unit],
    config: &BatchConfig,
    fail_fast: bool,
    pb: &ProgressBar,
) -> anyhow::Result<Vec<UnitOutcome>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()?;
    let cancel = CancelToken::new();

    let outcomes: Vec<UnitOutcome> = pool.install(|| {
        units
            .par_iter()
            .map(|unit| {
                let outcome = process_unit(unit, config, &cancel);
                if !outcome.is_success() && fail_fast {
                    cancel.cancel();
                }
                pb.inc(1);
                outcome
            })
            .collect()
    });
    Ok(outcomes)
}

fn process_unit(unit: &Unit, config: &BatchConfig, cancel: &CancelToken) -> UnitOutcome {
    let snapshot_dir = config.snapshot_dir(&unit.run_id, &unit.grid_id);
    let export_dir = config.export_dir(&unit.run_id, &unit.grid_id);
    info!(run_id = %unit.run_id, grid_id = %unit.grid_id, dir = %snapshot_dir.display(), "unit started");

    let result = run_unit(&snapshot_dir, &export_dir, &unit.run_id, &config.unit, cancel);
    if let Err(e) = &result {
        error!(run_id = %unit.run_id, grid_id = %unit.grid_id, kind = e.kind(), "unit failed: {e}");
    }
    UnitOutcome {
        unit: unit.clone(),
        result,
    }
}

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    run_id: &'a str,
    grid_id: &'a str,
    status: &'static str,
    kind: &'static str,
    message: String,
    snapshots: usize,
    nodes: usize,
    faces: usize,
}

impl<'a> From<&'a UnitOutcome> for ReportRow<'a> {
    fn from(outcome: &'a UnitOutcome) -> Self {
        let (status, kind, message, snapshots, nodes, faces) = match &outcome.result {
            Ok(summary) => (
                "ok",
                "",
                summary.artifacts.max_depth.display().to_string(),
                summary.snapshots,
                summary.nodes,
                summary.faces,
            ),
            Err(e) => ("failed", e.kind(), e.to_string(), 0, 0, 0),
        };
        ReportRow {
            run_id: &outcome.unit.run_id,
            grid_id: &outcome.unit.grid_id,
            status,
            kind,
            message,
            snapshots,
            nodes,
            faces,
        }
    }
}

pub fn write_report(path: &Path, outcomes: &[UnitOutcome]) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;
    for outcome in outcomes {
        wtr.serialize(ReportRow::from(outcome))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{UnitConfig, WindowConfig};
    use crate::test_support::{SnapshotFixture, write_gz_snapshot};
    use std::fs;
    use tempfile::TempDir;

    fn batch_config(root: &Path) -> BatchConfig {
        BatchConfig {
            input_root: root.to_path_buf(),
            output_root: None,
            workers: 2,
            unit: UnitConfig {
                window: WindowConfig::new(140, 240).unwrap(),
                ..UnitConfig::default()
            },
        }
    }

    #[test]
    fn units_are_cartesian_product() {
        let runs = vec!["1".to_string(), "2".to_string()];
        let grids = vec!["grid_1".to_string(), "grid_2".to_string()];
        let all = units(&runs, &grids);
        assert_eq!(all.len(), 4);
        assert_eq!(
            all[1],
            Unit {
                run_id: "1".to_string(),
                grid_id: "grid_2".to_string()
            }
        );
    }

    #[test]
    fn failing_unit_does_not_stop_others() {
        let root = TempDir::new().unwrap();
        let config = batch_config(root.path());

        let good = config.snapshot_dir("12810327", "grid_1");
        fs::create_dir_all(&good).unwrap();
        write_gz_snapshot(&good.join("schout_150.nc.gz"), &SnapshotFixture::square(vec![0.5; 4]));

        // Only spin-up output
        let early = config.snapshot_dir("94746831", "grid_1");
        fs::create_dir_all(&early).unwrap();
        write_gz_snapshot(&early.join("schout_10.nc.gz"), &SnapshotFixture::square(vec![0.5; 4]));

        let todo = units(
            &["94746831".to_string(), "12810327".to_string(), "58954209".to_string()],
            &["grid_1".to_string()],
        );
        let outcomes = run_batch(&todo, &config, false, &ProgressBar::hidden()).unwrap();

        let by_run = |id: &str| outcomes.iter().find(|o| o.unit.run_id == id).unwrap();
        assert!(by_run("12810327").is_success());
        assert_eq!(by_run("94746831").result.as_ref().unwrap_err().kind(), "empty_window");
        assert_eq!(by_run("58954209").result.as_ref().unwrap_err().kind(), "list_directory");
        assert!(good.join("12810327_faces.csv").exists());
        assert_eq!(fs::read_dir(&early).unwrap().count(), 1);

        let report = root.path().join("report.csv");
        write_report(&report, &outcomes).unwrap();
        let text = fs::read_to_string(&report).unwrap();
        assert!(text.starts_with("run_id,grid_id,status,kind,message,snapshots,nodes,faces"));
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("empty_window"));
    }
}
