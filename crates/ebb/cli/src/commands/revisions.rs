//! Revision commands: rollback, prune

use crate::error::CliResult;
use crate::output::{self, print_info, print_success, OutputFormat};
use ebb_control::LifecycleController;
use ebb_types::RevisionId;
use serde::Serialize;

pub async fn rollback(
    controller: &LifecycleController,
    workload: &str,
    revision: Option<String>,
    format: OutputFormat,
) -> CliResult<()> {
    let report = controller
        .rollback(workload, revision.map(RevisionId::new))
        .await?;
    if format != OutputFormat::Table {
        return output::print_single(&report, format);
    }
    print_success(&format!(
        "{} now serving {} (was {})",
        report.workload,
        report.to,
        report
            .from
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "nothing".to_string())
    ));
    Ok(())
}

#[derive(Serialize)]
struct PruneView<'a> {
    workload: &'a str,
    removed: Vec<RevisionId>,
}

pub async fn prune(
    controller: &LifecycleController,
    workload: &str,
    keep: usize,
    format: OutputFormat,
) -> CliResult<()> {
    let removed = controller.prune(workload, keep).await?;
    if format != OutputFormat::Table {
        return output::print_single(&PruneView { workload, removed }, format);
    }
    if removed.is_empty() {
        print_info(&format!("{}: nothing to prune", workload));
    } else {
        print_success(&format!(
            "Pruned {} revision(s) of {}",
            removed.len(),
            workload
        ));
    }
    Ok(())
}
