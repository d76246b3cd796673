//! Transient export artifacts.
//!
//! Search results delivered as a file are written under the configured temp
//! dir and removed after delivery; they are never persisted state.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use crate::{domain::Tier, Result};

/// `{tier}_results_{YYYYMMDD_HHMMSS}.txt`
pub fn export_filename(tier: Tier, at: DateTime<Local>) -> String {
    format!("{}_results_{}.txt", tier.label(), at.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug)]
pub struct ExportArtifact {
    path: PathBuf,
    filename: String,
}

impl ExportArtifact {
    pub fn write(temp_dir: &Path, tier: Tier, content: &str) -> Result<Self> {
        let filename = export_filename(tier, Local::now());
        let path = temp_dir.join(&filename);
        fs::write(&path, content)?;
        Ok(Self { path, filename })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Best-effort removal after delivery; a leftover file is only worth a log line.
    pub fn remove(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            eprintln!("[EXPORT] failed to remove {}: {e}", self.path.display());
        }
    }
}
