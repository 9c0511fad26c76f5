pub mod bootparams;
pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;
pub mod planner;
pub mod preflight;
pub mod provision;
pub mod report;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

pub fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    logging::init();

    let mut config = match &cli.config {
        Some(path) => config::ProvisionConfig::load(path)?,
        None => config::ProvisionConfig::default(),
    };
    config.apply_cli(&cli);
    let steps = cli.selected_steps();

    // Device existence cannot be checked in dry-run: the card may not even
    // be plugged in yet.
    let target_device = (!cli.dry_run).then(|| PathBuf::from(&config.device));
    preflight::run(&preflight::PreflightConfig::for_steps(&steps, target_device))?;

    let ctx = provision::ProvisionContext {
        hal: Arc::new(mkcard_hal::LinuxHal::new()),
        config,
        policy: cli.match_policy,
        dry_run: cli.dry_run,
        confirmed: cli.yes_i_know,
    };
    let report = provision::run(&ctx, &steps)?;

    log::info!(
        "Provisioning of {} complete ({} steps)",
        report.device,
        report.steps.len()
    );
    Ok(())
}
