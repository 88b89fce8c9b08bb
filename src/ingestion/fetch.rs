//! Fetch functions - locate the raw export on disk

use crate::error::FetchError;
use crate::ingestion::types::RawData;
use std::fs;
use std::path::Path;
use tracing::info;

/// Check that the lead export exists and is readable.
///
/// The file itself is streamed later by the parser. A missing file is
/// reported as [`FetchError::NotFound`] so the run can abort before touching
/// the network.
pub fn fetch_leads_csv(path: &Path) -> Result<RawData, FetchError> {
    if !path.exists() {
        return Err(FetchError::NotFound(path.to_path_buf()));
    }

    let metadata = fs::metadata(path).map_err(|source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if !metadata.is_file() {
        return Err(FetchError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }

    // Surface permission problems now rather than mid-run
    fs::File::open(path).map_err(|source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Found CSV file {} ({} bytes)", path.display(), metadata.len());

    Ok(RawData::File(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_not_found() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nope.csv");

        let err = fetch_leads_csv(&path).unwrap_err();
        assert!(matches!(err, FetchError::NotFound(p) if p == path));
    }

    #[test]
    fn test_existing_file_is_returned_as_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("leads.csv");
        fs::write(&path, "lead_id\nL-1\n").unwrap();

        let raw = fetch_leads_csv(&path).unwrap();
        assert!(matches!(raw, RawData::File(p) if p == path));
    }

    #[test]
    fn test_directory_is_rejected() {
        let temp = tempdir().unwrap();

        let err = fetch_leads_csv(temp.path()).unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }
}
