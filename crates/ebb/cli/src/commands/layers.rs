//! Layer commands: deploy-data, deploy-compute, pause, resume, decommission-data

use super::{replicas, short_image};
use crate::error::{CliError, CliResult};
use crate::output::{self, print_info, print_success, print_warning, spinner, OutputFormat};
use ebb_control::{ComputeReport, LifecycleController, Outcome, RolledOut};
use serde::Serialize;
use std::io::IsTerminal;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
struct RolloutRow {
    workload: String,
    revision: String,
    image: String,
    replicas: String,
    tier: String,
}

impl From<&RolledOut> for RolloutRow {
    fn from(r: &RolledOut) -> Self {
        Self {
            workload: r.workload.clone(),
            revision: r.revision.to_string(),
            image: short_image(r.image.as_str()),
            replicas: replicas(&r.scale),
            tier: r.scale.tier.clone(),
        }
    }
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    operation: &'a str,
    outcome: Outcome,
}

fn report_outcome(operation: &str, outcome: Outcome, done: &str, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return output::print_single(&OutcomeView { operation, outcome }, format);
    }
    match outcome {
        Outcome::Applied => print_success(done),
        Outcome::AlreadyConverged => print_info(&format!("{}: nothing to do", operation)),
    }
    Ok(())
}

fn report_compute(done: &str, report: &ComputeReport, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return output::print_single(report, format);
    }
    if let Some(alert) = &report.alert {
        print_warning(&alert.to_string());
    }
    if report.outcome == Outcome::AlreadyConverged {
        print_info("Compute layer already active: nothing to do");
        return Ok(());
    }
    print_success(done);
    output::print_output(
        report.workloads.iter().map(RolloutRow::from).collect(),
        report,
        format,
    )
}

pub async fn deploy_data(controller: &LifecycleController, format: OutputFormat) -> CliResult<()> {
    let pb = spinner("Deploying data layer...", format);
    let result = controller.deploy_data().await;
    pb.finish_and_clear();
    report_outcome("deploy-data", result?, "Data layer active", format)
}

pub async fn deploy_compute(controller: &LifecycleController, format: OutputFormat) -> CliResult<()> {
    let pb = spinner("Deploying compute layer...", format);
    let result = controller.deploy_compute().await;
    pb.finish_and_clear();
    report_compute("Compute layer active", &result?, format)
}

pub async fn pause(controller: &LifecycleController, format: OutputFormat) -> CliResult<()> {
    let pb = spinner("Pausing compute layer...", format);
    let result = controller.pause().await;
    pb.finish_and_clear();
    report_outcome("pause", result?, "Compute layer paused", format)
}

pub async fn resume(controller: &LifecycleController, format: OutputFormat) -> CliResult<()> {
    let pb = spinner("Resuming compute layer...", format);
    let result = controller.resume().await;
    pb.finish_and_clear();
    report_compute("Compute layer resumed", &result?, format)
}

/// Without `--confirm`, ask on an interactive terminal; otherwise refuse
pub async fn decommission_data(
    controller: &LifecycleController,
    confirm: bool,
    format: OutputFormat,
) -> CliResult<()> {
    let confirmed = confirm || (std::io::stdin().is_terminal() && ask_confirmation(controller)?);

    let pb = spinner("Decommissioning data layer...", format);
    let result = controller.decommission_data(confirmed).await;
    pb.finish_and_clear();
    report_outcome(
        "decommission-data",
        result?,
        "Data layer decommissioned",
        format,
    )
}

fn ask_confirmation(controller: &LifecycleController) -> CliResult<bool> {
    let prompt = format!(
        "Permanently delete data layer '{}' and everything in it?",
        controller.config().layers.data
    );
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| CliError::InvalidInput(e.to_string()))
}
