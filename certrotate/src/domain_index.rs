use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::{
    models::{CertificateIdSet, Domain},
    provider_client::ProviderApi,
};

/// Splits a whitespace delimited domain list, dropping empty entries and duplicates.
pub fn parse_domains(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Current certificate bindings of the configured domains.
#[derive(Debug, Clone, Default)]
pub struct DomainCertIndex {
    pub bindings: Vec<Domain>,
    /// Old certificates still referenced by at least one domain.
    pub stale_cert_ids: CertificateIdSet,
    /// Domains without any managed certificate.
    pub unbound_domains: BTreeSet<String>,
}

impl DomainCertIndex {
    /// Queries the bindings of `domains` in one batch and classifies them against the new
    /// certificate.
    pub async fn query(
        provider: &impl ProviderApi,
        domains: &BTreeSet<String>,
        new_certificate_id: &str,
    ) -> Result<Self> {
        info!(count = domains.len(), "querying certificate bindings");
        let bindings = provider
            .describe_domain_bindings(domains)
            .await
            .context("failed to query domain certificate bindings")?;

        let found = bindings
            .iter()
            .map(|d| d.name.as_str())
            .collect::<BTreeSet<_>>();
        let missing = domains
            .iter()
            .filter(|d| !found.contains(d.as_str()))
            .map(String::as_str)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            bail!("domains not found in the cdn: {}", missing.join(", "));
        }

        let index = Self::classify(bindings, new_certificate_id);
        info!(
            stale_certs = %index.stale_cert_ids,
            unbound = index.unbound_domains.len(),
            "classified domains"
        );
        Ok(index)
    }

    pub fn classify(bindings: Vec<Domain>, new_certificate_id: &str) -> Self {
        let mut stale_cert_ids = CertificateIdSet::new();
        let mut unbound_domains = BTreeSet::new();
        for domain in &bindings {
            match &domain.bound_certificate_id {
                Some(id) if id == new_certificate_id => {
                    debug!(domain = domain.name, "already bound to the new certificate");
                }
                Some(id) => {
                    debug!(domain = domain.name, cert = id, "bound to old certificate");
                    stale_cert_ids.insert(id.as_str());
                }
                None => {
                    debug!(domain = domain.name, "no certificate bound");
                    unbound_domains.insert(domain.name.clone());
                }
            }
        }
        Self {
            bindings,
            stale_cert_ids,
            unbound_domains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeProvider, NEW_CERT};

    #[test]
    fn parse_domains_collapses_duplicates_and_whitespace() {
        let domains = parse_domains("  a.com\n\tb.com  a.com\r\n\n c.com b.com ");
        assert_eq!(
            domains.into_iter().collect::<Vec<_>>(),
            vec!["a.com", "b.com", "c.com"]
        );
        assert!(parse_domains(" \n\t ").is_empty());
    }

    #[test]
    fn classify_splits_stale_and_unbound() {
        let index = DomainCertIndex::classify(
            vec![
                Domain::new("a.com", Some("C1".into())),
                Domain::new("b.com", Some("C1".into())),
                Domain::new("c.com", Some("C2".into())),
                Domain::new("d.com", None),
                Domain::new("e.com", Some(NEW_CERT.into())),
            ],
            NEW_CERT,
        );
        assert_eq!(index.stale_cert_ids.to_vec(), vec!["C1", "C2"]);
        assert_eq!(
            index.unbound_domains.into_iter().collect::<Vec<_>>(),
            vec!["d.com"]
        );
        assert_eq!(index.bindings.len(), 5);
    }

    #[tokio::test]
    async fn query_is_one_batch_over_distinct_domains() {
        let provider = FakeProvider::new()
            .with_binding("a.com", Some("C1"))
            .with_binding("b.com", Some("C1"));
        let domains = parse_domains("a.com a.com b.com");
        let index = DomainCertIndex::query(&provider, &domains, NEW_CERT)
            .await
            .unwrap();
        assert_eq!(
            provider.calls(),
            vec![Call::DescribeBindings(vec!["a.com".into(), "b.com".into()])]
        );
        assert_eq!(index.stale_cert_ids.to_vec(), vec!["C1"]);
        assert!(index.unbound_domains.is_empty());
    }

    #[tokio::test]
    async fn unknown_domain_is_fatal() {
        let provider = FakeProvider::new().with_binding("a.com", Some("C1"));
        let err = DomainCertIndex::query(&provider, &parse_domains("a.com z.com"), NEW_CERT)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "domains not found in the cdn: z.com");
    }

    #[tokio::test]
    async fn provider_error_is_fatal() {
        let mut provider = FakeProvider::new();
        provider.fail_describe = true;
        let err = DomainCertIndex::query(&provider, &parse_domains("a.com"), NEW_CERT)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to query domain certificate bindings"
        );
    }
}
