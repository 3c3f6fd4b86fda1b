mod app;
mod cli;
mod error;
mod image_loader;
mod layout;
mod models;
mod scanner;
mod workbook;

use std::process::ExitCode;

use anyhow::{anyhow, Context};
use tracing::info;
use tracing_subscriber::filter::Directive;

use app::{RunOutcome, ShotSheetApp};
use cli::Args;

/// Installs the stderr log subscriber; stdout carries only the result line.
fn init_tracing() -> anyhow::Result<()> {
    let directive: Directive = "shotsheet=info"
        .parse()
        .context("invalid default log directive")?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("{e:#}");
    }

    let args = Args::parse_env();
    let result = args
        .validate()
        .and_then(|options| ShotSheetApp::new(options).run());

    match result {
        Ok(RunOutcome::Saved { path, summary }) => {
            info!(
                images = summary.images,
                page_breaks = summary.page_breaks,
                "Updated {}",
                path.display()
            );
            println!(
                "Images inserted successfully into the template file: {}",
                path.display()
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::DryRun { plan }) => {
            for step in &plan.steps {
                println!("{step}");
            }
            println!("{} images planned, workbook not modified", plan.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{e}");
            ExitCode::FAILURE
        }
    }
}
