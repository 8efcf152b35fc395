use std::{collections::BTreeSet, fmt};

use anyhow::{bail, Context, Result};
use reqwest::Client;
use ring::hmac;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::debug;

use crate::models::{
    CertificateIdSet, CertificateMaterial, DeleteCertificatesResult, DeleteRejection, DeleteTask,
    DeleteTaskResult, Domain, MigrationProgress, MigrationRequest, MigrationTask, TaskStatus,
};

use super::{ApiError, ProviderApi};

const SSL_API_VERSION: &str = "2019-12-05";
const CDN_API_VERSION: &str = "2018-06-06";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host;x-tc-action";
const ALGORITHM: &str = "TC3-HMAC-SHA256";
/// Upper bound of `Limit` accepted by `DescribeDomainsConfig`.
const DOMAINS_PAGE_SIZE: usize = 1000;

/// Credentials and endpoints for the Tencent Cloud SSL and CDN APIs.
#[derive(Clone, Serialize, Deserialize)]
pub struct TencentConfig {
    pub secret_id: String,
    pub secret_key: String,
    /// Empty for the region-less CDN and SSL services.
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_ssl_endpoint")]
    pub ssl_endpoint: String,
    #[serde(default = "default_cdn_endpoint")]
    pub cdn_endpoint: String,
}

fn default_ssl_endpoint() -> String {
    "ssl.tencentcloudapi.com".into()
}

fn default_cdn_endpoint() -> String {
    "cdn.tencentcloudapi.com".into()
}

impl TencentConfig {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            region: String::new(),
            ssl_endpoint: default_ssl_endpoint(),
            cdn_endpoint: default_cdn_endpoint(),
        }
    }
}

impl fmt::Debug for TencentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TencentConfig")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("ssl_endpoint", &self.ssl_endpoint)
            .field("cdn_endpoint", &self.cdn_endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Service {
    Ssl,
    Cdn,
}

impl Service {
    fn name(self) -> &'static str {
        match self {
            Service::Ssl => "ssl",
            Service::Cdn => "cdn",
        }
    }

    fn version(self) -> &'static str {
        match self {
            Service::Ssl => SSL_API_VERSION,
            Service::Cdn => CDN_API_VERSION,
        }
    }

    fn endpoint(self, config: &TencentConfig) -> &str {
        match self {
            Service::Ssl => &config.ssl_endpoint,
            Service::Cdn => &config.cdn_endpoint,
        }
    }
}

#[derive(Debug)]
pub struct TencentClient {
    config: TencentConfig,
    http: Client,
}

impl TencentClient {
    pub fn new(config: TencentConfig) -> Result<Self> {
        if config.secret_id.is_empty() || config.secret_key.is_empty() {
            bail!("tencent cloud secret id and secret key are required");
        }
        let http = Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self { config, http })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        service: Service,
        action: &str,
        payload: &Value,
    ) -> Result<T> {
        let host = service.endpoint(&self.config);
        let body = serde_json::to_string(payload)?;
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        let authorization = Tc3Signer {
            secret_id: &self.config.secret_id,
            secret_key: &self.config.secret_key,
        }
        .authorization(service.name(), host, action, &body, timestamp)?;

        debug!(service = service.name(), action, "calling tencent cloud api");
        let mut request = self
            .http
            .post(format!("https://{host}/"))
            .header("Authorization", authorization)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-TC-Action", action)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Version", service.version());
        if !self.config.region.is_empty() {
            request = request.header("X-TC-Region", &self.config.region);
        }
        let response = request
            .body(body)
            .send()
            .await
            .with_context(|| format!("failed to send {action} request"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read {action} response"))?;
        if !status.is_success() {
            bail!("{action} failed with http status {status}: {text}");
        }
        parse_response(&text).with_context(|| format!("{action} failed"))
    }
}

impl ProviderApi for TencentClient {
    async fn upload_certificate(
        &self,
        material: &CertificateMaterial,
        alias: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({
            "CertificatePublicKey": material.public_key,
            "CertificatePrivateKey": material.private_key,
            "CertificateType": "SVR",
            "Repeatable": true,
        });
        if let Some(alias) = alias {
            payload["Alias"] = json!(alias);
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            certificate_id: String,
        }

        let response: Response = self
            .call(Service::Ssl, "UploadCertificate", &payload)
            .await?;
        Ok(response.certificate_id)
    }

    async fn describe_domain_bindings(&self, domains: &BTreeSet<String>) -> Result<Vec<Domain>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            domains: Option<Vec<DomainDetail>>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct DomainDetail {
            domain: String,
            #[serde(default)]
            https: Option<Https>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Https {
            #[serde(default)]
            cert_info: Option<CertInfo>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct CertInfo {
            #[serde(default)]
            cert_id: Option<String>,
        }

        let names = domains.iter().collect::<Vec<_>>();
        let mut bindings = Vec::with_capacity(names.len());
        for page in names.chunks(DOMAINS_PAGE_SIZE) {
            let payload = json!({
                "Offset": 0,
                "Limit": page.len(),
                "Filters": [{
                    "Name": "domain",
                    "Value": page,
                    "Fuzzy": false,
                }],
            });
            let response: Response = self
                .call(Service::Cdn, "DescribeDomainsConfig", &payload)
                .await?;
            bindings.extend(response.domains.unwrap_or_default().into_iter().map(|detail| {
                let cert_id = detail
                    .https
                    .and_then(|https| https.cert_info)
                    .and_then(|info| info.cert_id);
                Domain::new(detail.domain, cert_id)
            }));
        }
        Ok(bindings)
    }

    async fn migrate_certificate(&self, request: &MigrationRequest) -> Result<MigrationTask> {
        self.update_certificate_instance(request).await
    }

    /// `UpdateCertificateInstance` is idempotent for an in-flight deploy record and reports its
    /// progress, so the status probe re-issues it.
    async fn migration_status(&self, request: &MigrationRequest) -> Result<MigrationTask> {
        self.update_certificate_instance(request).await
    }

    async fn set_domain_certificate(&self, domain: &str, certificate_id: &str) -> Result<()> {
        let payload = json!({
            "Domain": domain,
            "Https": {
                "Switch": "on",
                "Http2": "on",
                "CertInfo": {
                    "CertId": certificate_id,
                },
            },
        });
        let _: Value = self
            .call(Service::Cdn, "UpdateDomainConfig", &payload)
            .await?;
        Ok(())
    }

    async fn delete_certificates(
        &self,
        certificate_ids: &CertificateIdSet,
    ) -> Result<DeleteCertificatesResult> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            cert_task_ids: Option<Vec<CertTaskId>>,
            #[serde(default)]
            fail: Option<Vec<Fail>>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct CertTaskId {
            cert_id: String,
            task_id: String,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Fail {
            cert_id: String,
            #[serde(default)]
            msg: String,
        }

        let payload = json!({
            "CertificateIds": certificate_ids.to_vec(),
            "IsSync": true,
        });
        let response: Response = self
            .call(Service::Ssl, "DeleteCertificates", &payload)
            .await?;
        Ok(DeleteCertificatesResult {
            tasks: response
                .cert_task_ids
                .unwrap_or_default()
                .into_iter()
                .map(|task| DeleteTask {
                    certificate_id: task.cert_id,
                    task_id: task.task_id,
                })
                .collect(),
            rejected: response
                .fail
                .unwrap_or_default()
                .into_iter()
                .map(|fail| DeleteRejection {
                    certificate_id: fail.cert_id,
                    message: fail.msg,
                })
                .collect(),
        })
    }

    async fn describe_delete_tasks(&self, task_ids: &[String]) -> Result<Vec<DeleteTaskResult>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            delete_task_result: Option<Vec<TaskResult>>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct TaskResult {
            task_id: String,
            cert_id: String,
            status: i64,
            #[serde(default)]
            error: Option<String>,
            #[serde(default)]
            domains: Option<Vec<String>>,
        }

        let payload = json!({ "TaskIds": task_ids });
        let response: Response = self
            .call(Service::Ssl, "DescribeDeleteCertificatesTaskResult", &payload)
            .await?;
        Ok(response
            .delete_task_result
            .unwrap_or_default()
            .into_iter()
            .map(|result| DeleteTaskResult {
                task_id: result.task_id,
                certificate_id: result.cert_id,
                status: TaskStatus::from_code(result.status),
                error: result.error.filter(|e| !e.is_empty()),
                domains: result.domains.unwrap_or_default(),
            })
            .collect())
    }
}

impl TencentClient {
    async fn update_certificate_instance(
        &self,
        request: &MigrationRequest,
    ) -> Result<MigrationTask> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            deploy_record_id: Option<u64>,
            #[serde(default)]
            deploy_status: Option<i64>,
            #[serde(default)]
            update_sync_progress: Option<Vec<SyncProgress>>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct SyncProgress {
            resource_type: String,
            status: i64,
        }

        let payload = json!({
            "OldCertificateId": request.old_certificate_id,
            "CertificateId": request.certificate_id,
            "ResourceTypes": request.resource_types,
            "ExpiringNotificationSwitch": u8::from(request.notify_on_expiry),
        });
        let response: Response = self
            .call(Service::Ssl, "UpdateCertificateInstance", &payload)
            .await?;
        Ok(MigrationTask {
            deploy_record_id: response
                .deploy_record_id
                .filter(|id| *id != 0)
                .map(|id| id.to_string()),
            deploy_status: response.deploy_status,
            progress: response
                .update_sync_progress
                .unwrap_or_default()
                .into_iter()
                .map(|p| MigrationProgress {
                    resource_type: p.resource_type,
                    status: p.status,
                })
                .collect(),
        })
    }
}

/// Parses the `{"Response": {...}}` envelope shared by all actions.
fn parse_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "Response")]
        response: Value,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct ErrorBody {
        code: String,
        #[serde(default)]
        message: String,
    }

    let envelope: Envelope = serde_json::from_str(text).context("failed to parse response")?;
    if let Some(error) = envelope.response.get("Error") {
        let error: ErrorBody =
            serde_json::from_value(error.clone()).context("failed to parse error response")?;
        let request_id = envelope
            .response
            .get("RequestId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ApiError {
            code: error.code,
            message: error.message,
            request_id,
        }
        .into());
    }
    serde_json::from_value(envelope.response).context("unexpected response body")
}

/// TC3-HMAC-SHA256 request signer.
struct Tc3Signer<'a> {
    secret_id: &'a str,
    secret_key: &'a str,
}

impl Tc3Signer<'_> {
    fn authorization(
        &self,
        service: &str,
        host: &str,
        action: &str,
        payload: &str,
        timestamp: i64,
    ) -> Result<String> {
        let date = utc_date(timestamp)?;
        let credential_scope = format!("{date}/{service}/tc3_request");
        let string_to_sign = format!(
            "{ALGORITHM}\n{timestamp}\n{credential_scope}\n{}",
            sha256_hex(canonical_request(host, action, payload).as_bytes())
        );

        let secret_date = hmac_sha256(format!("TC3{}", self.secret_key).as_bytes(), date.as_bytes());
        let secret_service = hmac_sha256(&secret_date, service.as_bytes());
        let secret_signing = hmac_sha256(&secret_service, b"tc3_request");
        let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes()));

        Ok(format!(
            "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.secret_id
        ))
    }
}

fn canonical_request(host: &str, action: &str, payload: &str) -> String {
    let canonical_headers = format!(
        "content-type:{CONTENT_TYPE}\nhost:{host}\nx-tc-action:{}\n",
        action.to_lowercase()
    );
    format!(
        "POST\n/\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{}",
        sha256_hex(payload.as_bytes())
    )
}

fn utc_date(timestamp: i64) -> Result<String> {
    let time = OffsetDateTime::from_unix_timestamp(timestamp).context("invalid timestamp")?;
    Ok(format!(
        "{:04}-{:02}-{:02}",
        time.year(),
        u8::from(time.month()),
        time.day()
    ))
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}
