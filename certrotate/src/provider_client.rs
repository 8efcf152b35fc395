use std::collections::BTreeSet;

use anyhow::Result;
use enum_dispatch::enum_dispatch;
use thiserror::Error;

pub use tencent::{TencentClient, TencentConfig};

use crate::models::{
    CertificateIdSet, CertificateMaterial, DeleteCertificatesResult, DeleteTaskResult, Domain,
    MigrationRequest, MigrationTask,
};

mod tencent;

/// Error code returned by the provider when a migration has no deployed instance to update.
pub const NO_DEPLOY_INSTANCES: &str = "FailedOperation.CertificateDeployInstanceEmpty";

/// An error reported by the provider API itself, as opposed to a transport failure.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message} (request id: {request_id})")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    /// Whether the error says the migration had nothing to update.
    pub fn is_no_deploy_instances(&self) -> bool {
        self.code == NO_DEPLOY_INSTANCES
    }

    /// Classify an arbitrary error chain.
    pub fn is_benign_migration_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<ApiError>()
            .is_some_and(ApiError::is_no_deploy_instances)
    }
}

#[enum_dispatch]
#[allow(async_fn_in_trait)]
pub trait ProviderApi {
    /// Uploads a server certificate.
    ///
    /// Returns the id assigned by the provider. Duplicate uploads are allowed.
    async fn upload_certificate(
        &self,
        material: &CertificateMaterial,
        alias: Option<&str>,
    ) -> Result<String>;

    /// Reads the certificate currently bound to each of the given CDN domains.
    async fn describe_domain_bindings(&self, domains: &BTreeSet<String>) -> Result<Vec<Domain>>;

    /// Starts moving every resource bound to the old certificate onto the new one.
    async fn migrate_certificate(&self, request: &MigrationRequest) -> Result<MigrationTask>;

    /// Queries the progress of a migration started with `migrate_certificate`.
    async fn migration_status(&self, request: &MigrationRequest) -> Result<MigrationTask>;

    /// Points a single domain's HTTPS configuration at the given certificate.
    ///
    /// Enables HTTPS and HTTP/2 on the domain. Completion of the call is the confirmation.
    async fn set_domain_certificate(&self, domain: &str, certificate_id: &str) -> Result<()>;

    /// Schedules deletion of the given certificates, one task per certificate.
    async fn delete_certificates(
        &self,
        certificate_ids: &CertificateIdSet,
    ) -> Result<DeleteCertificatesResult>;

    /// Reads the status of deletion tasks.
    async fn describe_delete_tasks(&self, task_ids: &[String]) -> Result<Vec<DeleteTaskResult>>;
}

/// A CDN certificate provider client.
#[derive(Debug)]
#[enum_dispatch(ProviderApi)]
pub enum ProviderClient {
    Tencent(TencentClient),
}

impl ProviderClient {
    pub fn new_tencent(config: TencentConfig) -> Result<Self> {
        Ok(Self::Tencent(TencentClient::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    fn api_error(code: &str) -> ApiError {
        ApiError {
            code: code.into(),
            message: "message".into(),
            request_id: "req".into(),
        }
    }

    #[test]
    fn benign_error_survives_context() {
        let err: Result<()> = Err(anyhow::Error::new(api_error(NO_DEPLOY_INSTANCES)));
        let err = err.context("failed to migrate").unwrap_err();
        assert!(ApiError::is_benign_migration_error(&err));
    }

    #[test]
    fn other_errors_are_not_benign() {
        let err = anyhow::Error::new(api_error("AuthFailure.SignatureFailure"));
        assert!(!ApiError::is_benign_migration_error(&err));
        let err = anyhow::anyhow!("{NO_DEPLOY_INSTANCES}");
        assert!(!ApiError::is_benign_migration_error(&err));
    }
}
