use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// A CDN domain together with the certificate currently serving its HTTPS traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    /// `None` when the CDN has no managed certificate bound to the domain.
    pub bound_certificate_id: Option<String>,
}

impl Domain {
    pub fn new(name: impl Into<String>, bound_certificate_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            bound_certificate_id: bound_certificate_id.filter(|id| !id.is_empty()),
        }
    }
}

/// PEM encoded certificate chain and private key.
#[derive(Clone)]
pub struct CertificateMaterial {
    pub public_key: String,
    pub private_key: String,
}

impl CertificateMaterial {
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
        }
    }
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("public_key", &format_args!("<{} bytes>", self.public_key.len()))
            .field("private_key", &format_args!("<redacted>"))
            .finish()
    }
}

/// A deduplicated set of certificate ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CertificateIdSet(BTreeSet<String>);

impl CertificateIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for CertificateIdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a CertificateIdSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for CertificateIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = self.iter().collect::<Vec<_>>();
        write!(f, "{}", ids.join(", "))
    }
}

/// Status of an asynchronous provider task.
///
/// Codes follow the provider's delete task vocabulary:
/// `0=InProgress, 1=Completed, 2=Failed, 3=Unauthorized, 4=ResourceInUse, 5=InternalTimeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
    Unauthorized,
    ResourceInUse,
    InternalTimeout,
    Unknown(i64),
}

impl TaskStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Pending,
            1 => Self::Completed,
            2 => Self::Failed,
            3 => Self::Unauthorized,
            4 => Self::ResourceInUse,
            5 => Self::InternalTimeout,
            other => Self::Unknown(other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("in progress"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::ResourceInUse => f.write_str("resource in use"),
            Self::InternalTimeout => f.write_str("internal timeout"),
            Self::Unknown(code) => write!(f, "unknown status {code}"),
        }
    }
}

/// Request to move every resource bound to `old_certificate_id` onto `certificate_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub old_certificate_id: String,
    pub certificate_id: String,
    pub resource_types: Vec<String>,
    pub notify_on_expiry: bool,
}

impl MigrationRequest {
    pub fn cdn(old_certificate_id: impl Into<String>, certificate_id: impl Into<String>) -> Self {
        Self {
            old_certificate_id: old_certificate_id.into(),
            certificate_id: certificate_id.into(),
            resource_types: vec!["cdn".into()],
            notify_on_expiry: true,
        }
    }
}

/// Progress of one resource type within a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    pub resource_type: String,
    pub status: i64,
}

impl MigrationProgress {
    pub const SUCCESS: i64 = 1;

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationTask {
    pub deploy_record_id: Option<String>,
    /// Overall deploy status, `1` once the whole record has been deployed.
    pub deploy_status: Option<i64>,
    pub progress: Vec<MigrationProgress>,
}

impl MigrationTask {
    pub const DEPLOY_FAILED: i64 = 0;

    /// A migration is done once every progress entry reports success.
    ///
    /// Without any progress entry, only the overall deploy status can tell.
    pub fn is_done(&self) -> bool {
        if self.progress.is_empty() {
            return self.deploy_status == Some(MigrationProgress::SUCCESS);
        }
        self.progress.iter().all(MigrationProgress::is_success)
    }

    /// The provider reports the deploy record as failed and has nothing in progress.
    pub fn is_failed(&self) -> bool {
        self.progress.is_empty() && self.deploy_status == Some(MigrationTask::DEPLOY_FAILED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTask {
    pub certificate_id: String,
    pub task_id: String,
}

/// A certificate the provider refused to schedule for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteRejection {
    pub certificate_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteCertificatesResult {
    pub tasks: Vec<DeleteTask>,
    pub rejected: Vec<DeleteRejection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteTaskResult {
    pub task_id: String,
    pub certificate_id: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// Domains still referencing the certificate, if the provider reports them.
    pub domains: Vec<String>,
}
