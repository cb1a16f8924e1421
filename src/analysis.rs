//! Hand-off of downloaded files to the external analyzer.
//!
//! The analyzer runs out of process as
//! `<command> [args...] --target_file=<path> --source_id=<id>`. Exit code 0
//! is success and its stdout is logged; anything else is an
//! [`AnalysisError`]. A failed analysis never touches the already committed
//! ingestion record.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::error::AnalysisError;

/// Output of a successful analyzer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub stdout: String,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, file: &Path, source_id: i64) -> Result<AnalysisReport, AnalysisError>;
}

/// Runs the analyzer as a child process with a timeout budget.
#[derive(Debug, Clone)]
pub struct ProcessAnalyzer {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessAnalyzer {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone(), config.timeout())
    }

    fn build_args(&self, file: &Path, source_id: i64) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(format!("--target_file={}", file.display()));
        args.push(format!("--source_id={}", source_id));
        args
    }
}

#[async_trait]
impl Analyzer for ProcessAnalyzer {
    async fn analyze(&self, file: &Path, source_id: i64) -> Result<AnalysisReport, AnalysisError> {
        let args = self.build_args(file, source_id);
        debug!(command = %self.command, ?args, "Calling analyzer subprocess");

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(AnalysisError::Spawn {
                    command: self.command.clone(),
                    source,
                })
            }
            Err(_) => return Err(AnalysisError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(AnalysisError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(AnalysisReport {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn shell(script: &str, timeout: Duration) -> ProcessAnalyzer {
        ProcessAnalyzer::new(
            "sh",
            vec!["-c".into(), script.into(), "analyzer".into()],
            timeout,
        )
    }

    #[test]
    fn file_and_source_id_are_appended_after_configured_args() {
        let analyzer = ProcessAnalyzer::new(
            "node",
            vec!["scripts/analyze.js".into()],
            Duration::from_secs(1),
        );
        let args = analyzer.build_args(&PathBuf::from("/data/7-leak.csv"), 42);
        assert_eq!(
            args,
            vec![
                "scripts/analyze.js".to_string(),
                "--target_file=/data/7-leak.csv".to_string(),
                "--source_id=42".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn zero_exit_captures_stdout() {
        let analyzer = shell("echo \"$1 $2\"", Duration::from_secs(10));
        let report = analyzer
            .analyze(Path::new("/tmp/a.csv"), 9)
            .await
            .unwrap();
        assert_eq!(report.stdout, "--target_file=/tmp/a.csv --source_id=9");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_code_and_stderr() {
        let analyzer = shell("echo broken file >&2; exit 3", Duration::from_secs(10));
        match analyzer.analyze(Path::new("/tmp/a.csv"), 9).await {
            Err(AnalysisError::Exit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken file");
            }
            other => panic!("expected exit failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hung_analyzer_times_out() {
        let analyzer = shell("sleep 5", Duration::from_millis(200));
        assert!(matches!(
            analyzer.analyze(Path::new("/tmp/a.csv"), 9).await,
            Err(AnalysisError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn missing_command_fails_to_spawn() {
        let analyzer = ProcessAnalyzer::new(
            "definitely-not-an-analyzer-binary",
            Vec::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            analyzer.analyze(Path::new("/tmp/a.csv"), 9).await,
            Err(AnalysisError::Spawn { .. })
        ));
    }
}
