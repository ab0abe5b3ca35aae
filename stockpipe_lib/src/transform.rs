//! Downstream transformation job: `dbt deps` then `dbt build`.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

pub const DEFAULT_BIN: &str = "dbt";
const PROJECT_FILE: &str = "dbt_project.yml";
const STEPS: [&str; 2] = ["deps", "build"];

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("{what} directory not found: {}", path.display())]
    MissingDirectory { what: &'static str, path: PathBuf },
    #[error("dbt_project.yml not found in {}", .0.display())]
    MissingProjectFile(PathBuf),
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed with {status}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransformJob {
    pub bin: String,
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
}

/// Captured output of one step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub step: String,
    pub output: String,
}

impl TransformJob {
    pub fn new(
        bin: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        profiles_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bin: bin.into(),
            project_dir: project_dir.into(),
            profiles_dir: profiles_dir.into(),
        }
    }

    /// Fails before anything is spawned if either directory is missing.
    pub fn validate(&self) -> Result<(), TransformError> {
        if !self.project_dir.is_dir() {
            return Err(TransformError::MissingDirectory {
                what: "Project",
                path: self.project_dir.clone(),
            });
        }
        if !self.project_dir.join(PROJECT_FILE).is_file() {
            return Err(TransformError::MissingProjectFile(self.project_dir.clone()));
        }
        if !self.profiles_dir.is_dir() {
            return Err(TransformError::MissingDirectory {
                what: "Profiles",
                path: self.profiles_dir.clone(),
            });
        }
        Ok(())
    }

    fn command_line(&self, step: &str) -> String {
        format!(
            "{} {} --project-dir {} --profiles-dir {}",
            self.bin,
            step,
            self.project_dir.display(),
            self.profiles_dir.display()
        )
    }

    /// Runs every step in order, stopping at the first failure.
    pub async fn run(&self) -> Result<Vec<StepOutput>, TransformError> {
        self.validate()?;
        tracing::info!(
            bin = %self.bin,
            project_dir = %self.project_dir.display(),
            profiles_dir = %self.profiles_dir.display(),
            "Starting transform"
        );

        let mut outputs = Vec::with_capacity(STEPS.len());
        for step in STEPS {
            outputs.push(self.run_step(step).await?);
        }
        tracing::info!("Transform steps {} completed", STEPS.join(" + "));
        Ok(outputs)
    }

    async fn run_step(&self, step: &str) -> Result<StepOutput, TransformError> {
        let command = self.command_line(step);
        tracing::info!("Running command: {}", command);

        let output = Command::new(&self.bin)
            .arg(step)
            .arg("--project-dir")
            .arg(&self.project_dir)
            .arg("--profiles-dir")
            .arg(&self.profiles_dir)
            .current_dir(&self.project_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransformError::Spawn {
                command: command.clone(),
                source,
            })?;

        let text = combined_output(&output.stdout, &output.stderr);
        if !text.is_empty() {
            tracing::info!("{}", text);
        }

        if !output.status.success() {
            tracing::error!("Command failed: {}", command);
            return Err(TransformError::CommandFailed {
                command,
                status: output.status.to_string(),
                output: text,
            });
        }
        Ok(StepOutput {
            step: step.to_string(),
            output: text,
        })
    }
}

fn combined_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).trim_end().to_string();
    let err = String::from_utf8_lossy(stderr);
    let err = err.trim_end();
    if !err.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(err);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, tempfile::TempDir) {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join(PROJECT_FILE), "name: stock\n").unwrap();
        let profiles = tempfile::tempdir().unwrap();
        (project, profiles)
    }

    #[test]
    fn missing_directories_are_reported() {
        let (project, profiles) = project();
        let job = TransformJob::new("dbt", project.path().join("nope"), profiles.path());
        assert!(matches!(
            job.validate(),
            Err(TransformError::MissingDirectory { what: "Project", .. })
        ));

        let job = TransformJob::new("dbt", project.path(), profiles.path().join("nope"));
        assert!(matches!(
            job.validate(),
            Err(TransformError::MissingDirectory { what: "Profiles", .. })
        ));

        let bare = tempfile::tempdir().unwrap();
        let job = TransformJob::new("dbt", bare.path(), profiles.path());
        assert!(matches!(job.validate(), Err(TransformError::MissingProjectFile(_))));
    }

    #[test]
    fn output_streams_are_joined() {
        assert_eq!(combined_output(b"ok\n", b""), "ok");
        assert_eq!(combined_output(b"ok\n", b"warn\n"), "ok\nwarn");
        assert_eq!(combined_output(b"", b"warn"), "warn");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_both_steps() {
        let (project, profiles) = project();
        let job = TransformJob::new("echo", project.path(), profiles.path());
        let outputs = job.run().await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].output.starts_with("deps --project-dir"));
        assert!(outputs[1].output.starts_with("build --project-dir"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let (project, profiles) = project();
        let job = TransformJob::new("false", project.path(), profiles.path());
        let err = job.run().await.unwrap_err();
        assert!(matches!(err, TransformError::CommandFailed { ref command, .. } if command.starts_with("false deps")));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let (project, profiles) = project();
        let job = TransformJob::new("definitely-not-a-real-binary-3141", project.path(), profiles.path());
        assert!(matches!(job.run().await, Err(TransformError::Spawn { .. })));
    }
}
