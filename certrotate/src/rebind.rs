use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::{
    models::{MigrationRequest, MigrationTask},
    poll::{poll_until, PollOutcome, PollPolicy},
    provider_client::{ApiError, ProviderApi},
};

/// How an asynchronous provider task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    /// The provider reported there was nothing to update.
    NothingToDo,
    /// The wait gave up before the provider reported a terminal state.
    TimedOut,
}

impl<T> From<PollOutcome<T>> for TaskOutcome {
    fn from(outcome: PollOutcome<T>) -> Self {
        match outcome {
            PollOutcome::Completed(_) => Self::Completed,
            PollOutcome::Skipped => Self::NothingToDo,
            PollOutcome::TimedOut => Self::TimedOut,
        }
    }
}

fn check_deploy(task: MigrationTask) -> Result<MigrationTask> {
    if task.is_failed() {
        bail!(
            "certificate deploy record {} failed",
            task.deploy_record_id.as_deref().unwrap_or("-")
        );
    }
    Ok(task)
}

/// Repoints CDN domains at a new certificate.
pub struct BindingUpdater<'a, P> {
    provider: &'a P,
    policy: PollPolicy,
}

impl<'a, P: ProviderApi> BindingUpdater<'a, P> {
    pub fn new(provider: &'a P, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    /// Moves every CDN domain bound to `old_certificate_id` onto `new_certificate_id` and waits
    /// for the provider to finish deploying.
    ///
    /// The migration request is not counted against the poll policy: up to
    /// `max_attempts` status probes follow it. A deploy record the provider reports as failed
    /// is a fatal error.
    pub async fn rebind_by_certificate(
        &self,
        old_certificate_id: &str,
        new_certificate_id: &str,
    ) -> Result<TaskOutcome> {
        let request = MigrationRequest::cdn(old_certificate_id, new_certificate_id);
        info!(
            old_cert = old_certificate_id,
            new_cert = new_certificate_id,
            "migrating certificate bindings"
        );
        let issued = self
            .provider
            .migrate_certificate(&request)
            .await
            .and_then(check_deploy);
        let task = match issued {
            Ok(task) => task,
            Err(err) if ApiError::is_benign_migration_error(&err) => {
                info!(
                    old_cert = old_certificate_id,
                    "no cdn instance bound to the old certificate: {err}"
                );
                return Ok(TaskOutcome::NothingToDo);
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to migrate certificate {old_certificate_id}")
                })
            }
        };
        if task.is_done() {
            info!(old_cert = old_certificate_id, "certificate migration completed");
            return Ok(TaskOutcome::Completed);
        }

        let what = format!("migration of certificate {old_certificate_id}");
        let (provider, request) = (self.provider, &request);
        let outcome = poll_until(
            self.policy,
            &what,
            move || async move {
                provider
                    .migration_status(request)
                    .await
                    .and_then(check_deploy)
            },
            |task: &MigrationTask| task.is_done(),
            ApiError::is_benign_migration_error,
        )
        .await
        .with_context(|| format!("failed to query {what}"))?;
        let outcome = TaskOutcome::from(outcome);
        match outcome {
            TaskOutcome::TimedOut => error!(
                old_cert = old_certificate_id,
                deploy_record = task.deploy_record_id.as_deref().unwrap_or("-"),
                "certificate migration timed out, continuing"
            ),
            _ => info!(
                old_cert = old_certificate_id,
                ?outcome,
                "certificate migration finished"
            ),
        }
        Ok(outcome)
    }

    /// Sets the HTTPS certificate of a single domain.
    pub async fn rebind_by_domain(&self, domain: &str, new_certificate_id: &str) -> Result<()> {
        info!(domain, new_cert = new_certificate_id, "binding certificate");
        self.provider
            .set_domain_certificate(domain, new_certificate_id)
            .await
            .with_context(|| format!("failed to set certificate of {domain}"))?;
        info!(domain, "certificate bound");
        Ok(())
    }
}
