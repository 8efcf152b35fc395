//! In-memory provider used by the unit tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use anyhow::{bail, Result};

use crate::{
    models::{
        CertificateIdSet, CertificateMaterial, DeleteCertificatesResult, DeleteRejection,
        DeleteTask, DeleteTaskResult, Domain, MigrationProgress, MigrationRequest, MigrationTask,
        TaskStatus,
    },
    provider_client::{ApiError, ProviderApi, NO_DEPLOY_INSTANCES},
};

pub const NEW_CERT: &str = "C-new";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Upload,
    DescribeBindings(Vec<String>),
    Migrate { old: String, new: String },
    MigrationStatus { old: String },
    SetDomain { domain: String, cert: String },
    Delete(Vec<String>),
    DescribeDeleteTasks(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum MigrationScript {
    /// The status probe reports success on the n-th probe.
    CompleteAfterProbes(u32),
    /// The migration request itself reports success.
    CompleteImmediately,
    /// The migration request fails with the benign "no deploy instances" error.
    NoDeployInstances,
    /// The first status probe fails with the benign "no deploy instances" error.
    NoDeployInstancesOnProbe,
    NeverCompletes,
    /// The migration request returns a failed deploy record without progress.
    DeployFails,
    /// The first status probe returns a failed deploy record without progress.
    DeployFailsOnProbe,
    Fails(&'static str),
}

pub struct FakeProvider {
    pub fail_upload: bool,
    pub fail_describe: bool,
    pub fail_delete: bool,
    pub fail_describe_delete: bool,
    pub bindings: BTreeMap<String, Option<String>>,
    pub migrations: BTreeMap<String, MigrationScript>,
    pub failing_domains: BTreeSet<String>,
    pub rejected_deletes: BTreeSet<String>,
    /// Final status per certificate, `Completed` when absent.
    pub delete_statuses: BTreeMap<String, TaskStatus>,
    /// Number of delete status queries answered with `Pending`, `u32::MAX` for never.
    pub delete_pending_polls: u32,
    calls: Mutex<Vec<Call>>,
    probes: Mutex<BTreeMap<String, u32>>,
    delete_polls: Mutex<u32>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            fail_upload: false,
            fail_describe: false,
            fail_delete: false,
            fail_describe_delete: false,
            bindings: BTreeMap::new(),
            migrations: BTreeMap::new(),
            failing_domains: BTreeSet::new(),
            rejected_deletes: BTreeSet::new(),
            delete_statuses: BTreeMap::new(),
            delete_pending_polls: 0,
            calls: Mutex::new(Vec::new()),
            probes: Mutex::new(BTreeMap::new()),
            delete_polls: Mutex::new(0),
        }
    }

    pub fn with_binding(mut self, domain: &str, cert: Option<&str>) -> Self {
        self.bindings
            .insert(domain.to_string(), cert.map(ToString::to_string));
        self
    }

    pub fn with_migration(mut self, old: &str, script: MigrationScript) -> Self {
        self.migrations.insert(old.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn script(&self, old: &str) -> MigrationScript {
        self.migrations
            .get(old)
            .cloned()
            .unwrap_or(MigrationScript::CompleteAfterProbes(1))
    }
}

pub fn api_error(code: &str) -> anyhow::Error {
    ApiError {
        code: code.into(),
        message: format!("fake {code}"),
        request_id: "fake-request".into(),
    }
    .into()
}

fn task(status: i64) -> MigrationTask {
    MigrationTask {
        deploy_record_id: Some("42".into()),
        deploy_status: Some(status),
        progress: vec![MigrationProgress {
            resource_type: "cdn".into(),
            status,
        }],
    }
}

fn failed_task() -> MigrationTask {
    MigrationTask {
        deploy_record_id: Some("42".into()),
        deploy_status: Some(MigrationTask::DEPLOY_FAILED),
        progress: vec![],
    }
}

impl ProviderApi for FakeProvider {
    async fn upload_certificate(
        &self,
        _material: &CertificateMaterial,
        _alias: Option<&str>,
    ) -> Result<String> {
        self.record(Call::Upload);
        if self.fail_upload {
            return Err(api_error("FailedOperation.CertificateParseError"));
        }
        Ok(NEW_CERT.into())
    }

    async fn describe_domain_bindings(&self, domains: &BTreeSet<String>) -> Result<Vec<Domain>> {
        self.record(Call::DescribeBindings(domains.iter().cloned().collect()));
        if self.fail_describe {
            return Err(api_error("AuthFailure.UnauthorizedOperation"));
        }
        Ok(domains
            .iter()
            .filter_map(|name| {
                self.bindings
                    .get(name)
                    .map(|cert| Domain::new(name.clone(), cert.clone()))
            })
            .collect())
    }

    async fn migrate_certificate(&self, request: &MigrationRequest) -> Result<MigrationTask> {
        self.record(Call::Migrate {
            old: request.old_certificate_id.clone(),
            new: request.certificate_id.clone(),
        });
        match self.script(&request.old_certificate_id) {
            MigrationScript::CompleteImmediately => Ok(task(1)),
            MigrationScript::NoDeployInstances => Err(api_error(NO_DEPLOY_INSTANCES)),
            MigrationScript::DeployFails => Ok(failed_task()),
            MigrationScript::Fails(code) => Err(api_error(code)),
            _ => Ok(task(0)),
        }
    }

    async fn migration_status(&self, request: &MigrationRequest) -> Result<MigrationTask> {
        let old = request.old_certificate_id.clone();
        self.record(Call::MigrationStatus { old: old.clone() });
        let probes = {
            let mut probes = self.probes.lock().unwrap();
            let count = probes.entry(old.clone()).or_default();
            *count += 1;
            *count
        };
        match self.script(&old) {
            MigrationScript::CompleteAfterProbes(n) if probes >= n => Ok(task(1)),
            MigrationScript::NoDeployInstancesOnProbe => Err(api_error(NO_DEPLOY_INSTANCES)),
            MigrationScript::CompleteImmediately => Ok(task(1)),
            MigrationScript::DeployFailsOnProbe => Ok(failed_task()),
            MigrationScript::Fails(code) => Err(api_error(code)),
            _ => Ok(task(0)),
        }
    }

    async fn set_domain_certificate(&self, domain: &str, certificate_id: &str) -> Result<()> {
        self.record(Call::SetDomain {
            domain: domain.into(),
            cert: certificate_id.into(),
        });
        if self.failing_domains.contains(domain) {
            bail!("fake failure setting {domain}");
        }
        Ok(())
    }

    async fn delete_certificates(
        &self,
        certificate_ids: &CertificateIdSet,
    ) -> Result<DeleteCertificatesResult> {
        self.record(Call::Delete(certificate_ids.to_vec()));
        if self.fail_delete {
            return Err(api_error("FailedOperation"));
        }
        let (rejected, accepted): (Vec<_>, Vec<_>) = certificate_ids
            .iter()
            .partition(|id| self.rejected_deletes.contains(*id));
        Ok(DeleteCertificatesResult {
            tasks: accepted
                .into_iter()
                .map(|id| DeleteTask {
                    certificate_id: id.into(),
                    task_id: format!("T-{id}"),
                })
                .collect(),
            rejected: rejected
                .into_iter()
                .map(|id| DeleteRejection {
                    certificate_id: id.into(),
                    message: "certificate is in use".into(),
                })
                .collect(),
        })
    }

    async fn describe_delete_tasks(&self, task_ids: &[String]) -> Result<Vec<DeleteTaskResult>> {
        self.record(Call::DescribeDeleteTasks(task_ids.to_vec()));
        if self.fail_describe_delete {
            return Err(api_error("InternalError"));
        }
        let polls = {
            let mut polls = self.delete_polls.lock().unwrap();
            *polls += 1;
            *polls
        };
        Ok(task_ids
            .iter()
            .map(|task_id| {
                let certificate_id = task_id.trim_start_matches("T-").to_string();
                let status = if polls <= self.delete_pending_polls {
                    TaskStatus::Pending
                } else {
                    self.delete_statuses
                        .get(&certificate_id)
                        .copied()
                        .unwrap_or(TaskStatus::Completed)
                };
                let (error, domains) = match status {
                    TaskStatus::ResourceInUse => {
                        (Some("certificate in use".to_string()), vec!["x.com".into()])
                    }
                    _ => (None, vec![]),
                };
                DeleteTaskResult {
                    task_id: task_id.clone(),
                    certificate_id,
                    status,
                    error,
                    domains,
                }
            })
            .collect())
    }
}
