use crate::error::{PipelineError, PipelineResult};
use crate::io::snapshot::SnapshotSource;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Resolve a snapshot path into something the reader can open.
///
/// Gzip archives are inflated completely into memory first; plain files are
/// handed over by path.
pub fn prepare_source(path: &Path) -> PipelineResult<SnapshotSource> {
    if path.extension().is_some_and(|ext| ext == "gz") {
        let bytes = gunzip_to_memory(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(SnapshotSource::Memory { name, bytes })
    } else {
        Ok(SnapshotSource::File(path.to_path_buf()))
    }
}

pub fn gunzip_to_memory(path: &Path) -> PipelineResult<Vec<u8>> {
    let io_err = |source| PipelineError::SnapshotIo {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut bytes = Vec::new();
    match decoder.read_to_end(&mut bytes) {
        Ok(_) => Ok(bytes),
        // A truncated or corrupt archive will not heal on retry
        Err(e) if matches!(e.kind(), ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof) => {
            Err(PipelineError::malformed(
                path.display().to_string(),
                format!("gzip decompression failed: {e}"),
            ))
        }
        Err(e) => Err(io_err(e)),
    }
}
