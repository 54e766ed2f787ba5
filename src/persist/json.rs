/// JSON sink for batch output.
///
/// The document is written to a sibling temp file and renamed into place, so
/// a reader (the precomputed query path) sees either the previous run or the
/// complete new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{BatchOutput, PersistError};
use crate::logging::Component;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "batch_output.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `output` to `path`, replacing any previous document atomically.
pub fn write_output(path: &Path, output: &BatchOutput) -> Result<(), PersistError> {
    output.validate()?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
    }

    let body = serde_json::to_vec(output)?;
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp).map_err(io_error(&tmp))?;
        file.write_all(&body).map_err(io_error(&tmp))?;
        file.sync_all().map_err(io_error(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_error(path))?;

    tracing::info!(
        component = %Component::Persist,
        path = %path.display(),
        bytes = body.len(),
        events = ?output.events_processed,
        "wrote batch output"
    );
    Ok(())
}

pub fn read_output(path: &Path) -> Result<BatchOutput, PersistError> {
    let body = fs::read_to_string(path).map_err(io_error(path))?;
    let output: BatchOutput = serde_json::from_str(&body)?;
    output.validate()?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TimingView;
    use chrono::{TimeZone, Utc};

    fn output() -> BatchOutput {
        let mut out = BatchOutput::new(
            "test",
            "static",
            None,
            Utc.with_ymd_and_hms(2025, 1, 28, 4, 0, 0).unwrap(),
            vec![0.0],
            vec![0.0, 1.0],
        );
        out.insert_event("heat", &[TimingView::never(), TimingView::never()]);
        out.mark_failed("freezing");
        out
    }

    #[test]
    fn test_write_then_read_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("event_timing.json");
        write_output(&path, &output()).unwrap();

        assert!(!temp_path(&path).exists(), "temp file should be renamed away");
        let back = read_output(&path).unwrap();
        assert_eq!(back, output());
        assert_eq!(back.events_failed, vec!["freezing"]);
    }

    #[test]
    fn test_inconsistent_document_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event_timing.json");
        let mut bad = output();
        bad.latitude.push(1.0);
        let err = write_output(&path, &bad).unwrap_err();
        assert!(matches!(err, PersistError::ColumnLength { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_document_is_unavailable() {
        let err = read_output(Path::new("/nonexistent/whenwx/event_timing.json")).unwrap_err();
        assert!(err.is_unavailable());
    }
}
