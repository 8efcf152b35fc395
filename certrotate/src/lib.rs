//! Certificate rotation for CDN-fronted domains.
//!
//! This library replaces the TLS certificate served by a set of CDN domains in one pass:
//! it uploads the new certificate, finds which domains still reference an old certificate
//! (or none at all), repoints them at the new one, waits for the provider to finish
//! deploying, and finally deletes the certificates nothing references any more.
//!
//! # Features
//!
//! - One bulk migration per old certificate, shared by every domain bound to it
//! - Explicit binding of domains that had no certificate
//! - Bounded polling of asynchronous provider tasks
//! - Tencent Cloud SSL/CDN provider client
//!
//! # Usage
//!
//! ```rust,no_run
//! use certrotate::{
//!     parse_domains, CertRotator, CertificateMaterial, ProviderClient, RotationConfig,
//!     TencentConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = ProviderClient::new_tencent(TencentConfig::new(
//!         "your_secret_id",
//!         "your_secret_key",
//!     ))?;
//!     let fullchain = std::fs::read_to_string("fullchain.pem")?;
//!     let key = std::fs::read_to_string("key.pem")?;
//!
//!     let config = RotationConfig::builder()
//!         .domains(parse_domains("cdn.example.com static.example.com"))
//!         .certificate(CertificateMaterial::new(fullchain, key))
//!         .build();
//!     let report = CertRotator::new(provider, config).run().await?;
//!
//!     println!("now serving {}", report.new_certificate_id);
//!     Ok(())
//! }
//! ```
//!
//! A fatal provider error stops the rotation where it happened; nothing is rolled back.
//! Waits that run out of attempts and certificates that could not be deleted are reported
//! in the returned [`RotationReport`] instead.

pub use certificate::CertificateSummary;
pub use domain_index::{parse_domains, DomainCertIndex};
pub use models::{
    CertificateIdSet, CertificateMaterial, DeleteRejection, DeleteTaskResult, Domain,
    TaskStatus,
};
pub use poll::{poll_until, PollOutcome, PollPolicy};
pub use provider_client::{ApiError, ProviderApi, ProviderClient, TencentClient, TencentConfig};
pub use rebind::{BindingUpdater, TaskOutcome};
pub use retire::{RetirementManager, RetirementReport};
pub use rotation::{CertRotator, MigrationRecord, RotationConfig, RotationReport, Stage};

mod certificate;
mod domain_index;
pub mod models;
mod poll;
pub mod provider_client;
mod rebind;
mod retire;
mod rotation;

#[cfg(test)]
mod testing;
