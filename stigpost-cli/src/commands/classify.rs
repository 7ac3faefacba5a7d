//! `stigpost classify` -- detect source types without touching the store.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use stigpost_core::types::SourceType;
use stigpost_ingest::classify_path;

use crate::cli::ClassifyArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `classify` command.
pub fn execute(args: ClassifyArgs, writer: &OutputWriter) -> Result<(), CliError> {
    let report = classify_all(&args.paths);
    writer.render(&report)
}

pub fn classify_all(paths: &[impl AsRef<Path>]) -> ClassifyReport {
    let files = paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            let source = classify_path(path);
            ClassifiedFile {
                path: path.display().to_string(),
                source: source.map_or("directory", |s| s.as_str()).to_owned(),
                label: source.map(|s| s.label().to_owned()),
                holding_dir: source.and_then(|s| s.holding_dir()).map(str::to_owned),
            }
        })
        .collect();
    ClassifyReport { files }
}

#[derive(Debug, Serialize)]
pub struct ClassifyReport {
    pub files: Vec<ClassifiedFile>,
}

#[derive(Debug, Serialize)]
pub struct ClassifiedFile {
    pub path: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holding_dir: Option<String>,
}

impl Render for ClassifyReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let width = self.files.iter().map(|f| f.path.len()).max().unwrap_or(0);
        for f in &self.files {
            let source = if f.source == SourceType::Unsupported.as_str() {
                f.source.red()
            } else {
                f.source.green()
            };
            writeln!(w, "{:<width$}  {}", f.path, source)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mixed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ckl = dir.path().join("web01.ckl");
        std::fs::write(&ckl, "<CHECKLIST></CHECKLIST>").expect("write");
        let junk = dir.path().join("notes.txt");
        std::fs::write(&junk, "nothing to see").expect("write");

        let report = classify_all(&[ckl, junk, dir.path().to_path_buf()]);

        assert_eq!(report.files[0].source, "ckl");
        assert_eq!(report.files[0].holding_dir.as_deref(), Some("stig_viewer"));
        assert_eq!(report.files[1].source, "unsupported");
        assert!(report.files[1].holding_dir.is_none());
        assert_eq!(report.files[2].source, "directory");
        assert!(report.files[2].label.is_none());
    }

    #[test]
    fn test_classify_text_is_aligned() {
        colored::control::set_override(false);
        let report = ClassifyReport {
            files: vec![
                ClassifiedFile {
                    path: "a.nessus".to_owned(),
                    source: "nessus".to_owned(),
                    label: Some("Nessus".to_owned()),
                    holding_dir: Some("nessus".to_owned()),
                },
                ClassifiedFile {
                    path: "long-name.csv".to_owned(),
                    source: "echecklist".to_owned(),
                    label: Some("eChecklist".to_owned()),
                    holding_dir: Some("echecklist".to_owned()),
                },
            ],
        };
        let mut buf = Vec::new();
        report.render_text(&mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text, "a.nessus       nessus\nlong-name.csv  echecklist\n");
    }
}
