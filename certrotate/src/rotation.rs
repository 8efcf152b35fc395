use std::{collections::BTreeSet, fmt};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    certificate::CertificateSummary,
    domain_index::DomainCertIndex,
    models::{CertificateIdSet, CertificateMaterial},
    poll::PollPolicy,
    provider_client::ProviderApi,
    rebind::{BindingUpdater, TaskOutcome},
    retire::{RetirementManager, RetirementReport},
};

#[derive(Clone, Debug, bon::Builder)]
#[builder(on(String, into))]
pub struct RotationConfig {
    /// Distinct CDN domains to serve with the new certificate.
    domains: BTreeSet<String>,
    certificate: CertificateMaterial,
    /// Alias shown in the provider console for the uploaded certificate.
    certificate_alias: Option<String>,
    #[builder(default)]
    poll_policy: PollPolicy,
    /// Delete the replaced certificates once nothing references them.
    #[builder(default = true)]
    retire_old_certificates: bool,
}

impl RotationConfig {
    pub fn domains(&self) -> &BTreeSet<String> {
        &self.domains
    }
}

/// Steps of a rotation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    UploadingCertificate,
    ClassifyingDomains,
    RebindingStaleCertDomains,
    RebindingUnboundDomains,
    RetiringOldCertificates,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::UploadingCertificate => "uploading certificate",
            Stage::ClassifyingDomains => "classifying domains",
            Stage::RebindingStaleCertDomains => "rebinding domains of old certificates",
            Stage::RebindingUnboundDomains => "binding domains without certificate",
            Stage::RetiringOldCertificates => "retiring old certificates",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub old_certificate_id: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub new_certificate_id: String,
    pub migrations: Vec<MigrationRecord>,
    /// Domains that had no certificate and were bound explicitly.
    pub bound_domains: Vec<String>,
    /// `None` if no old certificate was confirmed unused or retirement is disabled.
    pub retirement: Option<RetirementReport>,
}

impl RotationReport {
    /// Whether some wait timed out or some old certificate could not be deleted.
    pub fn is_degraded(&self) -> bool {
        let timed_out = self
            .migrations
            .iter()
            .any(|m| m.outcome == TaskOutcome::TimedOut);
        let retirement_incomplete = self.retirement.as_ref().is_some_and(|r| {
            r.outcome == TaskOutcome::TimedOut
                || !r.rejected.is_empty()
                || r.deleted().count() != r.results.len()
        });
        timed_out || retirement_incomplete
    }
}

/// Runs one certificate rotation against a provider.
pub struct CertRotator<P> {
    provider: P,
    config: RotationConfig,
}

impl<P: ProviderApi> CertRotator<P> {
    pub fn new(provider: P, config: RotationConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Uploads the new certificate, moves every configured domain onto it and deletes the
    /// certificates it replaced.
    ///
    /// Stops at the first fatal error; the error names the stage the rotation halted in.
    pub async fn run(&self) -> Result<RotationReport> {
        let mut stage = Stage::UploadingCertificate;
        let result = self.run_stages(&mut stage).await;
        result.with_context(|| format!("rotation halted while {stage}"))
    }

    async fn run_stages(&self, stage: &mut Stage) -> Result<RotationReport> {
        let config = &self.config;
        let provider = &self.provider;

        enter(stage, Stage::UploadingCertificate);
        self.check_certificate()?;
        let new_certificate_id = provider
            .upload_certificate(&config.certificate, config.certificate_alias.as_deref())
            .await
            .context("failed to upload certificate")?;
        info!(cert = new_certificate_id, "uploaded new certificate");

        enter(stage, Stage::ClassifyingDomains);
        let index = DomainCertIndex::query(provider, &config.domains, &new_certificate_id).await?;

        enter(stage, Stage::RebindingStaleCertDomains);
        let updater = BindingUpdater::new(provider, config.poll_policy);
        let mut migrations = Vec::with_capacity(index.stale_cert_ids.len());
        for old_certificate_id in &index.stale_cert_ids {
            let outcome = updater
                .rebind_by_certificate(old_certificate_id, &new_certificate_id)
                .await?;
            migrations.push(MigrationRecord {
                old_certificate_id: old_certificate_id.clone(),
                outcome,
            });
        }

        enter(stage, Stage::RebindingUnboundDomains);
        let mut bound_domains = Vec::with_capacity(index.unbound_domains.len());
        for domain in &index.unbound_domains {
            updater
                .rebind_by_domain(domain, &new_certificate_id)
                .await?;
            bound_domains.push(domain.clone());
        }

        let (retirable, unconfirmed) = split_by_confirmation(&migrations);
        if !unconfirmed.is_empty() {
            warn!(
                certs = %unconfirmed,
                "keeping old certificates whose migration was not confirmed"
            );
        }
        let retirement = if retirable.is_empty() {
            None
        } else if !config.retire_old_certificates {
            info!(certs = %retirable, "keeping old certificates");
            None
        } else {
            enter(stage, Stage::RetiringOldCertificates);
            let retirement = RetirementManager::new(provider, config.poll_policy)
                .retire(&retirable)
                .await?;
            Some(retirement)
        };

        enter(stage, Stage::Done);
        Ok(RotationReport {
            new_certificate_id,
            migrations,
            bound_domains,
            retirement,
        })
    }

    fn check_certificate(&self) -> Result<()> {
        if self.config.domains.is_empty() {
            bail!("no cdn domain configured");
        }
        let summary = CertificateSummary::inspect(&self.config.certificate)
            .context("invalid certificate")?;
        info!(
            names = summary.subject_alt_names.join(" "),
            not_after = %summary.not_after,
            "new certificate"
        );
        if summary.is_expired(OffsetDateTime::now_utc()) {
            bail!("certificate expired at {}", summary.not_after);
        }
        for domain in summary.uncovered(&self.config.domains) {
            warn!(domain, "domain is not covered by the new certificate");
        }
        Ok(())
    }
}

/// Splits the old certificates into those no domain can still be using and those whose
/// migration timed out.
fn split_by_confirmation(migrations: &[MigrationRecord]) -> (CertificateIdSet, CertificateIdSet) {
    let mut retirable = CertificateIdSet::new();
    let mut unconfirmed = CertificateIdSet::new();
    for migration in migrations {
        let id = migration.old_certificate_id.as_str();
        match migration.outcome {
            TaskOutcome::Completed | TaskOutcome::NothingToDo => retirable.insert(id),
            TaskOutcome::TimedOut => unconfirmed.insert(id),
        };
    }
    (retirable, unconfirmed)
}

fn enter(stage: &mut Stage, next: Stage) {
    *stage = next;
    info!(stage = %next, "rotation stage");
}
