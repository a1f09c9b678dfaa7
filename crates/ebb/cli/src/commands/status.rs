//! Read-only commands: status, plan

use super::{replicas, short, short_image};
use crate::error::CliResult;
use crate::output::{self, print_info, print_warning, OutputFormat};
use colored::*;
use ebb_control::{LayerStatus, LifecycleController, SecretStatus, WorkloadStatus};
use ebb_types::{LayerState, Phase};
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
struct LayerRow {
    layer: String,
    name: String,
    phase: String,
    since: String,
    resources: usize,
    detail: String,
}

impl From<&LayerStatus> for LayerRow {
    fn from(l: &LayerStatus) -> Self {
        let detail = match &l.state {
            LayerState::Failed {
                during,
                check,
                reason,
            } => format!("{} failed at {}: {}", during, check, reason),
            _ if l.stale => "stale: will be marked Failed on next operation".to_string(),
            _ => String::new(),
        };
        Self {
            layer: l.kind.to_string(),
            name: l.name.clone(),
            phase: format_phase(l.phase),
            since: l
                .since
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            resources: l.resources.len(),
            detail,
        }
    }
}

fn format_phase(phase: Phase) -> String {
    let label = phase.to_string();
    match phase {
        Phase::Active => label.green().to_string(),
        Phase::Failed => label.red().to_string(),
        Phase::Paused => label.yellow().to_string(),
        Phase::Absent => label.dimmed().to_string(),
        _ => label.cyan().to_string(),
    }
}

#[derive(Debug, Serialize, Tabled)]
struct WorkloadRow {
    workload: String,
    active: String,
    image: String,
    replicas: String,
    tier: String,
    revisions: usize,
}

impl From<&WorkloadStatus> for WorkloadRow {
    fn from(w: &WorkloadStatus) -> Self {
        Self {
            workload: w.name.clone(),
            active: w
                .active_revision
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
            image: short_image(w.image.as_str()),
            replicas: replicas(&w.scale),
            tier: w.scale.tier.clone(),
            revisions: w.revisions,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct SecretRow {
    secret: String,
    vault_ref: String,
    fingerprint: String,
    verified: String,
    consumers: String,
}

impl From<&SecretStatus> for SecretRow {
    fn from(s: &SecretStatus) -> Self {
        match &s.latest {
            Some(latest) => Self {
                secret: s.name.clone(),
                vault_ref: latest.vault_ref.to_string(),
                fingerprint: short(latest.fingerprint.as_hex()),
                verified: if s.rotating {
                    "rotating".cyan().to_string()
                } else if latest.verified {
                    "yes".green().to_string()
                } else {
                    "no".red().to_string()
                },
                consumers: latest
                    .consumers
                    .iter()
                    .map(|(workload, result)| format!("{}: {}", workload, result.outcome))
                    .collect::<Vec<_>>()
                    .join(", "),
            },
            None => Self {
                secret: s.name.clone(),
                vault_ref: "-".to_string(),
                fingerprint: "-".to_string(),
                verified: "-".to_string(),
                consumers: String::new(),
            },
        }
    }
}

pub async fn status(controller: &LifecycleController, format: OutputFormat) -> CliResult<()> {
    let report = controller.status().await?;
    if format != OutputFormat::Table {
        return output::print_single(&report, format);
    }

    let layers = vec![LayerRow::from(&report.data), LayerRow::from(&report.compute)];
    output::print_output(layers, &report, format)?;

    if !report.workloads.is_empty() {
        println!();
        output::print_output(
            report.workloads.iter().map(WorkloadRow::from).collect(),
            &report,
            format,
        )?;
    }
    if !report.secrets.is_empty() {
        println!();
        output::print_output(
            report.secrets.iter().map(SecretRow::from).collect(),
            &report,
            format,
        )?;
    }

    if let Some(budget) = &report.budget {
        println!();
        let line = format!(
            "Projected {} of {} monthly budget",
            budget.current_projected, budget.monthly_ceiling
        );
        match budget.alert() {
            Some(alert) => print_warning(&alert.to_string()),
            None => print_info(&line),
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Tabled)]
struct PlanRow {
    workload: String,
    replicas: String,
    tier: String,
    cpu: String,
    memory: String,
    monthly: String,
}

pub async fn plan(controller: &LifecycleController, format: OutputFormat) -> CliResult<()> {
    let plan = controller.plan()?;
    if format != OutputFormat::Table {
        return output::print_single(&plan, format);
    }

    let rows = plan
        .workloads
        .iter()
        .map(|w| PlanRow {
            workload: w.workload.clone(),
            replicas: replicas(&w.scale),
            tier: w.scale.tier.clone(),
            cpu: format!("{}m", w.scale.cpu_millis),
            memory: format!("{}Mi", w.scale.memory_mib),
            monthly: w.monthly_cost.to_string(),
        })
        .collect();
    output::print_output(rows, &plan, format)?;

    println!();
    match &plan.alert {
        Some(alert) => print_warning(&alert.to_string()),
        None => print_info(&format!(
            "Projected {} of {} monthly budget",
            plan.budget.current_projected, plan.budget.monthly_ceiling
        )),
    }
    Ok(())
}
