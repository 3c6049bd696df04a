//! Result persistence under the platform data directory.

use crate::model::FinalResult;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// UTC timestamp in RFC 3339, used to stamp results and derive filenames.
pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no platform data directory")?;
    Ok(base.join("docchat-trace"))
}

/// Save a completed run under the data directory. The filename combines the
/// run timestamp and the document it was asked about.
pub(crate) fn save_run(result: &FinalResult) -> Result<PathBuf> {
    let dir = data_dir()?;
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let stem = result.timestamp_utc.replace(':', "-").replace('T', "_");
    let path = dir.join(format!("answer_{}_{}.json", stem, sanitize(&result.doc_id)));
    export_json(&path, result)?;
    Ok(path)
}

/// Write a result as pretty JSON to an explicit path.
pub(crate) fn export_json(path: &Path, result: &FinalResult) -> Result<()> {
    let body = serde_json::to_string_pretty(result).context("serialize result")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Keep filenames portable: anything outside [A-Za-z0-9._-] becomes '-'.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
