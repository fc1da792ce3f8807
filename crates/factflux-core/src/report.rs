//! Markdown report export.

use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::FactFluxError;

/// `<topic with spaces replaced by underscores>_report.md`.
///
/// Path separators are replaced as well so the name always stays inside the
/// output directory.
pub fn report_file_name(topic: &str) -> String {
    let stem: String = topic
        .trim()
        .chars()
        .map(|ch| match ch {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    format!("{stem}_report.md")
}

/// Write `content` to `dir/report_file_name(topic)`, creating `dir` if needed.
pub fn write_report(dir: &Path, topic: &str, content: &str) -> Result<PathBuf, FactFluxError> {
    create_dir_all(dir).map_err(|err| {
        FactFluxError::Other(anyhow::anyhow!(
            "failed to create output directory {}: {err}",
            dir.display()
        ))
    })?;

    let path = dir.join(report_file_name(topic));
    let mut file = File::create(&path).map_err(|err| {
        FactFluxError::Other(anyhow::anyhow!(
            "failed to create report file {}: {err}",
            path.display()
        ))
    })?;
    file.write_all(content.as_bytes()).map_err(|err| {
        FactFluxError::Other(anyhow::anyhow!(
            "failed to write report file {}: {err}",
            path.display()
        ))
    })?;
    Ok(path)
}
