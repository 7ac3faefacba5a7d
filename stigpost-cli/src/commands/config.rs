//! `stigpost config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use stigpost_core::config::StigpostConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Top-level sections of `stigpost.toml`.
pub const SECTIONS: [&str; 5] = ["general", "store", "orchestrator", "ingest", "deconfliction"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => {
            let report = validate(config_path).await;
            writer.render(&report)?;
            if !report.valid {
                return Err(CliError::Config("configuration is invalid".to_owned()));
            }
            Ok(())
        }
        ConfigAction::Show { section } => {
            info!(path = %config_path.display(), "loading configuration");
            let config = StigpostConfig::load_or_default(config_path).await?;
            let report = show(&config, config_path, section.as_deref())?;
            writer.render(&report)
        }
    }
}

/// Load the file strictly: a missing file is invalid here.
pub async fn validate(config_path: &Path) -> ConfigValidationReport {
    info!(path = %config_path.display(), "validating configuration");
    let errors = match StigpostConfig::load(config_path).await {
        Ok(_) => Vec::new(),
        Err(e) => vec![e.to_string()],
    };
    ConfigValidationReport {
        source: config_path.display().to_string(),
        valid: errors.is_empty(),
        errors,
    }
}

/// Effective configuration (file + env overrides + defaults), optionally one section.
pub fn show(
    config: &StigpostConfig,
    config_path: &Path,
    section: Option<&str>,
) -> Result<ConfigReport, CliError> {
    let full = toml::Value::try_from(config)
        .map_err(|e| CliError::Command(format!("cannot serialize configuration: {e}")))?;
    let value = match section {
        None => full,
        Some(name) => full.get(name).cloned().ok_or_else(|| {
            CliError::Command(format!(
                "unknown section: {name} (expected: {})",
                SECTIONS.join(", ")
            ))
        })?,
    };
    let config_toml = toml::to_string_pretty(&value)
        .map_err(|e| CliError::Command(format!("cannot serialize configuration: {e}")))?;
    let config_json = serde_json::to_value(&value)?;

    Ok(ConfigReport {
        source: config_path.display().to_string(),
        section: section.map(str::to_owned),
        config: config_json,
        config_toml,
    })
}

/// Configuration display report.
#[derive(Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub config: serde_json::Value,
    /// Text rendering only
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        match &self.section {
            Some(section) => writeln!(
                w,
                "Configuration {} (source: {})",
                format!("[{section}]").bold(),
                self.source
            )?,
            None => writeln!(w, "Configuration (source: {})", self.source.bold())?,
        }
        writeln!(w)?;
        write!(w, "{}", self.config_toml)
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    /// Empty when valid
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;
        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_full_config_has_every_section() {
        let report =
            show(&StigpostConfig::default(), Path::new("stigpost.toml"), None).expect("show");
        for section in SECTIONS {
            assert!(
                report.config.get(section).is_some(),
                "missing section {section}"
            );
        }
        assert!(report.config_toml.contains("[orchestrator]"));
    }

    #[test]
    fn test_show_single_section() {
        let report = show(
            &StigpostConfig::default(),
            Path::new("stigpost.toml"),
            Some("orchestrator"),
        )
        .expect("show");
        assert_eq!(report.config["max_results"], 5);
        assert!(report.config_toml.contains("max_results = 5"));
    }

    #[test]
    fn test_show_unknown_section() {
        let err = show(
            &StigpostConfig::default(),
            Path::new("stigpost.toml"),
            Some("reporting"),
        )
        .err()
        .expect("unknown section should fail");
        assert!(err.to_string().contains("unknown section: reporting"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_config_report_json_skips_toml_text() {
        let report = show(
            &StigpostConfig::default(),
            Path::new("stigpost.toml"),
            Some("store"),
        )
        .expect("show");
        let json = serde_json::to_value(&report).expect("json");
        assert!(json.get("config_toml").is_none());
        assert_eq!(json["section"], "store");
    }

    #[test]
    fn test_validation_report_render_invalid() {
        colored::control::set_override(false);
        let report = ConfigValidationReport {
            source: "bad.toml".to_owned(),
            valid: false,
            errors: vec!["max_results must be between 1 and 256".to_owned()],
        };
        let mut buf = Vec::new();
        report.render_text(&mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("Result: INVALID"));
        assert!(text.contains("Error: max_results must be between 1 and 256"));
    }
}
