use anyhow::{Context, Result};
use csv::ReaderBuilder;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Working areas that hold per-run directories.
pub const RUN_AREAS: [&str; 4] = ["tmp", "input", "output", "inundation_schism"];

#[derive(Debug)]
pub struct RemovalOutcome {
    pub run_id: String,
    pub path: PathBuf,
    pub result: std::io::Result<()>,
}

/// Remove `{root}/{area}/{run_id}` for every area and run id.
///
/// Removals are independent and best effort: a failure is logged and
/// returned for that directory only.
pub fn remove_run_directories(root: &Path, run_ids: &[String]) -> Vec<RemovalOutcome> {
    RUN_AREAS
        .iter()
        .flat_map(|area| {
            run_ids
                .par_iter()
                .map(|run_id| {
                    let path = root.join(area).join(run_id);
                    let result = fs::remove_dir_all(&path);
                    match &result {
                        Ok(()) => info!(path = %path.display(), "removed"),
                        Err(e) => warn!(path = %path.display(), error = %e, "removal failed"),
                    }
                    RemovalOutcome {
                        run_id: run_id.clone(),
                        path,
                        result,
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Run ids from the first column of a headerless CSV list.
pub fn read_run_id_file(path: &Path) -> Result<Vec<String>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open run id list: {:?}", path))?;

    let mut run_ids = Vec::new();
    for record in rdr.records() {
        let record = record.with_context(|| format!("Failed to read run id list: {:?}", path))?;
        if let Some(id) = record.get(0).filter(|id| !id.is_empty()) {
            run_ids.push(id.to_string());
        }
    }
    Ok(run_ids)
}
