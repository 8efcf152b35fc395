use std::cell::RefCell;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    models::{CertificateIdSet, DeleteRejection, DeleteTaskResult, TaskStatus},
    poll::{poll_until, PollOutcome, PollPolicy},
    provider_client::ProviderApi,
    rebind::TaskOutcome,
};

/// Result of deleting superseded certificates.
///
/// A `Completed` outcome only means every deletion task reached a terminal status;
/// individual results may still report failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetirementReport {
    pub outcome: TaskOutcome,
    pub rejected: Vec<DeleteRejection>,
    pub results: Vec<DeleteTaskResult>,
}

impl RetirementReport {
    /// Certificates confirmed deleted.
    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .map(|r| r.certificate_id.as_str())
    }
}

/// Deletes certificates no CDN domain references any more.
pub struct RetirementManager<'a, P> {
    provider: &'a P,
    policy: PollPolicy,
}

impl<'a, P: ProviderApi> RetirementManager<'a, P> {
    pub fn new(provider: &'a P, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn retire(&self, certificate_ids: &CertificateIdSet) -> Result<RetirementReport> {
        info!(certs = %certificate_ids, "deleting old certificates");
        let scheduled = self
            .provider
            .delete_certificates(certificate_ids)
            .await
            .with_context(|| format!("failed to delete certificates {certificate_ids}"))?;
        for rejection in &scheduled.rejected {
            warn!(
                cert = rejection.certificate_id,
                "provider refused to delete certificate: {}", rejection.message
            );
        }
        if scheduled.tasks.is_empty() {
            info!("no deletion task to wait for");
            return Ok(RetirementReport {
                outcome: TaskOutcome::Completed,
                rejected: scheduled.rejected,
                results: vec![],
            });
        }

        let task_ids = scheduled
            .tasks
            .iter()
            .map(|task| task.task_id.clone())
            .collect::<Vec<_>>();
        // Kept so a timeout can still report what the provider last said.
        let last_results = RefCell::new(Vec::new());
        let (provider, task_ids, last) = (self.provider, &task_ids, &last_results);
        let outcome = poll_until(
            self.policy,
            "certificate deletion",
            move || async move {
                let results = provider.describe_delete_tasks(task_ids).await?;
                last.replace(results.clone());
                anyhow::Ok(results)
            },
            |results: &Vec<DeleteTaskResult>| results.iter().all(|r| r.status.is_terminal()),
            |_| false,
        )
        .await
        .context("failed to query certificate deletion status")?;

        let (outcome, results) = match outcome {
            PollOutcome::Completed(results) => (TaskOutcome::Completed, results),
            PollOutcome::Skipped => (TaskOutcome::NothingToDo, vec![]),
            PollOutcome::TimedOut => (TaskOutcome::TimedOut, last_results.into_inner()),
        };
        for result in &results {
            match result.status {
                TaskStatus::Completed => {
                    info!(cert = result.certificate_id, "certificate deleted")
                }
                TaskStatus::Pending => {
                    warn!(cert = result.certificate_id, "certificate deletion still in progress")
                }
                status => warn!(
                    cert = result.certificate_id,
                    task = result.task_id,
                    error = result.error.as_deref().unwrap_or("-"),
                    domains = result.domains.join(" "),
                    "certificate deletion {status}"
                ),
            }
        }
        Ok(RetirementReport {
            outcome,
            rejected: scheduled.rejected,
            results,
        })
    }
}
