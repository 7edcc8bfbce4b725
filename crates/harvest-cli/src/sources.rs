//! Config-defined data sources.
//!
//! `[[sources]]` tables in the harvest config file:
//!
//! ```toml
//! [[sources]]
//! name = "Echo"
//! kind = "echo"
//! standalone = true
//!
//! [[sources]]
//! name = "YMS"
//! kind = "command"
//! program = "yms-pull"
//! args = ["--site", "{site}", "--from", "{sos}", "--to", "{eos}"]
//! ```
//!
//! A command gets the credential token in `HARVEST_CREDENTIAL` and prints JSON on stdout.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::debug;

use harvest_core::domain::{HarvestError, ModuleResult, RawPayload, RunParams, TaskError};
use harvest_core::ports::{Credential, DataSource, SourceFactory};

pub const CREDENTIAL_ENV: &str = "HARVEST_CREDENTIAL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(default)]
    pub summary_suffix: Option<String>,
    /// Runs without a session credential.
    #[serde(default)]
    pub standalone: bool,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Echo,
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// Treat a top-level object as named sections, one document key each.
        #[serde(default)]
        sections: bool,
    },
}

#[derive(Debug, Default, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceSpec>,
}

/// Read `[[sources]]` from the config file; a missing file has none.
pub fn load_sources(path: &Path) -> Result<Vec<SourceSpec>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_sources(&contents).with_context(|| format!("parse sources in {}", path.display()))
}

pub fn parse_sources(contents: &str) -> Result<Vec<SourceSpec>> {
    let file: SourcesFile = toml::from_str(contents)?;
    Ok(file.sources)
}

/// Replace `{site}`, `{sos}`, `{eos}`, `{plan_type}` and `{shift}`.
pub fn substitute(template: &str, params: &RunParams) -> String {
    template
        .replace("{site}", &params.site)
        .replace("{sos}", &params.sos)
        .replace("{eos}", &params.eos)
        .replace("{plan_type}", &params.plan_type)
        .replace("{shift}", &params.shift)
}

pub struct SpecFactory {
    spec: SourceSpec,
}

impl SpecFactory {
    pub fn new(spec: SourceSpec) -> Self {
        Self { spec }
    }
}

impl SourceFactory for SpecFactory {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn summary_suffix(&self) -> &str {
        self.spec.summary_suffix.as_deref().unwrap_or("_summary")
    }

    fn build(&self, params: &RunParams) -> Result<Arc<dyn DataSource>, HarvestError> {
        match &self.spec.kind {
            SourceKind::Echo => Ok(Arc::new(EchoSource {
                params: params.clone(),
            })),
            SourceKind::Command {
                program,
                args,
                sections,
            } => {
                if program.trim().is_empty() {
                    return Err(HarvestError::Config(format!(
                        "source {:?} has an empty program",
                        self.spec.name
                    )));
                }
                Ok(Arc::new(CommandSource {
                    program: program.clone(),
                    args: args.iter().map(|a| substitute(a, params)).collect(),
                    sections: *sections,
                }))
            }
        }
    }
}

/// Returns the run parameters; needs no credential.
pub struct EchoSource {
    params: RunParams,
}

#[async_trait]
impl DataSource for EchoSource {
    async fn retrieve(&self, _credential: Arc<Credential>) -> Result<RawPayload, TaskError> {
        Ok(RawPayload::Json(json!({
            "echo_message": "harvest is alive",
            "Site": self.params.site,
            "SOSdatetime": self.params.sos,
            "EOSdatetime": self.params.eos,
            "PlanType": self.params.plan_type,
            "Shift": self.params.shift,
        })))
    }

    fn transform(&self, raw: RawPayload) -> Result<ModuleResult, TaskError> {
        match raw {
            RawPayload::Json(value) => Ok(ModuleResult::Scalar(value)),
            other => Err(TaskError::processing(format!("unexpected echo payload {other:?}"))),
        }
    }
}

/// Runs an external program and parses its stdout as JSON.
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    sections: bool,
}

#[async_trait]
impl DataSource for CommandSource {
    async fn retrieve(&self, credential: Arc<Credential>) -> Result<RawPayload, TaskError> {
        debug!(program = %self.program, args = ?self.args, "running source command");
        let output = Command::new(&self.program)
            .args(&self.args)
            .env(CREDENTIAL_ENV, credential.token())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TaskError::processing(format!("could not start {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(TaskError::untyped(message));
        }
        Ok(RawPayload::Bytes(output.stdout))
    }

    fn transform(&self, raw: RawPayload) -> Result<ModuleResult, TaskError> {
        let value: Value = match raw {
            RawPayload::Bytes(bytes) => serde_json::from_slice(&bytes),
            RawPayload::Text(text) => serde_json::from_str(&text),
            RawPayload::Json(value) => Ok(value),
            RawPayload::Empty => Ok(Value::Null),
        }
        .map_err(|e| TaskError::processing(format!("invalid JSON from {}: {e}", self.program)))?;

        match value {
            Value::Object(map) if self.sections => Ok(ModuleResult::Sections(map)),
            other => Ok(ModuleResult::from_json(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::domain::ErrorKind;

    fn params() -> RunParams {
        RunParams {
            site: "BCN1".into(),
            sos: "2025-03-01 06:00:00".into(),
            eos: "2025-03-01 18:00:00".into(),
            plan_type: "Standard".into(),
            shift: "Day".into(),
            requested_modules: vec![],
        }
    }

    #[test]
    fn parses_source_tables_and_ignores_other_keys() {
        let specs = parse_sources(
            r#"
            max_workers = 3

            [[sources]]
            name = "Echo"
            kind = "echo"
            standalone = true

            [[sources]]
            name = "DockMaster"
            kind = "command"
            program = "dock"
            args = ["{site}"]
            sections = true
            "#,
        )
        .unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].kind, SourceKind::Echo);
        assert!(specs[0].standalone);
        assert_eq!(
            specs[1].kind,
            SourceKind::Command {
                program: "dock".into(),
                args: vec!["{site}".into()],
                sections: true,
            }
        );
    }

    #[test]
    fn substitutes_run_parameters() {
        assert_eq!(
            substitute("{site}/{shift}/{plan_type}@{sos}", &params()),
            "BCN1/Day/Standard@2025-03-01 06:00:00"
        );
    }

    #[tokio::test]
    async fn echo_returns_parameters() {
        let factory = SpecFactory::new(SourceSpec {
            name: "Echo".into(),
            summary_suffix: None,
            standalone: true,
            kind: SourceKind::Echo,
        });
        let source = factory.build(&params()).unwrap();
        let raw = source.retrieve(Arc::new(Credential::anonymous())).await.unwrap();
        match source.transform(raw).unwrap() {
            ModuleResult::Scalar(v) => assert_eq!(v["Site"], "BCN1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sections_flag_splits_objects() {
        let source = CommandSource {
            program: "x".into(),
            args: vec![],
            sections: true,
        };
        let raw = RawPayload::Bytes(br#"{"DockMaster": [1], "DockMasterFiltered": [2]}"#.to_vec());
        assert!(matches!(source.transform(raw), Ok(ModuleResult::Sections(m)) if m.len() == 2));
    }

    #[test]
    fn invalid_json_is_a_processing_error() {
        let source = CommandSource {
            program: "x".into(),
            args: vec![],
            sections: false,
        };
        let err = source.transform(RawPayload::Bytes(b"<html>".to_vec())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Processing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_sees_credential_and_prints_table() {
        let source = CommandSource {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                format!(r#"printf '[{{"token": "%s"}}]' "${CREDENTIAL_ENV}""#),
            ],
            sections: false,
        };
        let raw = source
            .retrieve(Arc::new(Credential::new("secret", 1)))
            .await
            .unwrap();
        match source.transform(raw).unwrap() {
            ModuleResult::Table(rows) => assert_eq!(rows[0]["token"], "secret"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_classified_from_stderr() {
        let source = CommandSource {
            program: "sh".into(),
            args: vec!["-c".into(), "echo '401 Unauthorized' >&2; exit 1".into()],
            sections: false,
        };
        let err = source
            .retrieve(Arc::new(Credential::anonymous()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(err.message, "401 Unauthorized");
    }
}
