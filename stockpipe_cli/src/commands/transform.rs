//! Runs the downstream transform project and reports the result.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use stockpipe_lib::config::TransformSettings;
use stockpipe_lib::notify::{failure_message, notify_best_effort};
use stockpipe_lib::pipeline::build_notifier;
use stockpipe_lib::transform::TransformJob;
use stockpipe_lib::{ConfigError, PipelineConfig};

const JOB: &str = "dbt transform";

#[derive(Args)]
pub struct TransformArgs {
    /// Transform project directory (overrides DBT_PROJECT_DIR)
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Profiles directory (overrides DBT_PROFILES_DIR)
    #[arg(long)]
    pub profiles_dir: Option<PathBuf>,

    /// Print each step's captured output
    #[arg(long)]
    pub verbose: bool,
}

pub async fn run(args: &TransformArgs, config: PipelineConfig) -> Result<()> {
    let job = build_job(args, &config.transform)?;
    let notifier = build_notifier(&config).await;

    match job.run().await {
        Ok(steps) => {
            for step in &steps {
                if args.verbose {
                    println!("== {} ==\n{}", step.step, step.output);
                } else {
                    eprintln!("{} completed", step.step);
                }
            }
            let body = format!(
                "{} succeeded for project {}",
                JOB,
                job.project_dir.display()
            );
            notify_best_effort(notifier.as_ref(), &format!("{} succeeded", JOB), &body).await;
            Ok(())
        }
        Err(e) => {
            let (subject, body) = failure_message(JOB, &e);
            notify_best_effort(notifier.as_ref(), &subject, &body).await;
            Err(e.into())
        }
    }
}

fn build_job(args: &TransformArgs, settings: &TransformSettings) -> Result<TransformJob, ConfigError> {
    let project_dir = args
        .project_dir
        .clone()
        .or_else(|| settings.project_dir.clone())
        .ok_or(ConfigError::MissingEnv("DBT_PROJECT_DIR"))?;
    let profiles_dir = args
        .profiles_dir
        .clone()
        .unwrap_or_else(|| settings.profiles_dir.clone());
    Ok(TransformJob::new(settings.bin.clone(), project_dir, profiles_dir))
}
