//! rotate-secret

use super::short;
use crate::error::{CliError, CliResult};
use crate::output::{self, print_success, spinner, OutputFormat};
use ebb_control::LifecycleController;
use ebb_secrets::ConsumerReport;
use ebb_types::VaultRef;
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
struct ConsumerRow {
    workload: String,
    revision: String,
    outcome: String,
    attempts: u32,
    retired: String,
}

impl From<&ConsumerReport> for ConsumerRow {
    fn from(c: &ConsumerReport) -> Self {
        Self {
            workload: c.workload.clone(),
            revision: c.revision.to_string(),
            outcome: c.outcome.to_string(),
            attempts: c.attempts,
            retired: c
                .previous
                .as_ref()
                .filter(|_| c.retired)
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub async fn rotate(
    controller: &LifecycleController,
    secret: &str,
    vault_ref: &str,
    format: OutputFormat,
) -> CliResult<()> {
    let vault_ref: VaultRef = vault_ref
        .parse()
        .map_err(|e: ebb_types::VaultRefError| CliError::InvalidInput(e.to_string()))?;

    let pb = spinner(&format!("Rotating {}...", secret), format);
    let result = controller.rotate_secret(secret, &vault_ref).await;
    pb.finish_and_clear();
    let report = result?;

    if format != OutputFormat::Table {
        return output::print_single(&report, format);
    }
    print_success(&format!(
        "Rotated {} to {} (fingerprint {}), verified on every consumer",
        report.secret,
        report.vault_ref,
        short(report.fingerprint.as_hex())
    ));
    output::print_output(
        report.consumers.iter().map(ConsumerRow::from).collect(),
        &report,
        format,
    )
}
