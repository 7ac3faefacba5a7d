//! Batch job descriptor.
//!
//! A small TOML file handed to the daemon for each batch:
//!
//! ```toml
//! context_id = 12
//! working_dir = "/srv/stigpost/incoming/12"
//! target_name = "WEB01"   # optional, single-host files only
//! debug = false           # optional
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Parsed batch descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDescriptor {
    /// Assessment context the batch belongs to.
    pub context_id: i64,
    /// Directory scanned for incoming files; holding directories live under it.
    pub working_dir: PathBuf,
    /// Asset name forced onto single-host files.
    #[serde(default)]
    pub target_name: Option<String>,
    /// Keep files in place and log verbosely.
    #[serde(default)]
    pub debug: bool,
}

impl JobDescriptor {
    /// Read, parse and validate a descriptor file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read job descriptor {}", path.display()))?;
        let descriptor = Self::parse(&content)
            .with_context(|| format!("invalid job descriptor {}", path.display()))?;
        Ok(descriptor)
    }

    /// Parse and validate descriptor text.
    pub fn parse(content: &str) -> Result<Self> {
        let descriptor: Self = toml::from_str(content)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Minimal validity: positive context id and an existing working directory.
    pub fn validate(&self) -> Result<()> {
        if self.context_id <= 0 {
            bail!("context_id must be a positive integer, got {}", self.context_id);
        }
        if !self.working_dir.is_dir() {
            bail!(
                "working_dir {} does not exist or is not a directory",
                self.working_dir.display()
            );
        }
        if let Some(name) = &self.target_name {
            if name.trim().is_empty() {
                bail!("target_name must not be empty when given");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_for(dir: &Path, extra: &str) -> String {
        format!(
            "context_id = 7\nworking_dir = {:?}\n{extra}",
            dir.display().to_string()
        )
    }

    #[test]
    fn minimal_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let d = JobDescriptor::parse(&toml_for(dir.path(), "")).unwrap();
        assert_eq!(d.context_id, 7);
        assert_eq!(d.working_dir, dir.path());
        assert!(d.target_name.is_none());
        assert!(!d.debug);
    }

    #[test]
    fn optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let d = JobDescriptor::parse(&toml_for(
            dir.path(),
            "target_name = \"WEB01\"\ndebug = true\n",
        ))
        .unwrap();
        assert_eq!(d.target_name.as_deref(), Some("WEB01"));
        assert!(d.debug);
    }

    #[test]
    fn non_numeric_context_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "context_id = \"seven\"\nworking_dir = {:?}\n",
            dir.path().display().to_string()
        );
        assert!(JobDescriptor::parse(&text).is_err());
    }

    #[test]
    fn zero_context_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "context_id = 0\nworking_dir = {:?}\n",
            dir.path().display().to_string()
        );
        let err = JobDescriptor::parse(&text).unwrap_err();
        assert!(err.to_string().contains("context_id"));
    }

    #[test]
    fn missing_working_dir_is_rejected() {
        let err = JobDescriptor::parse(
            "context_id = 1\nworking_dir = \"/nonexistent/stigpost/batch\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JobDescriptor::parse(&toml_for(dir.path(), "max_results = 4\n")).is_err());
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let err = JobDescriptor::load(Path::new("/nonexistent/batch.toml"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("cannot read job descriptor"));
    }
}
