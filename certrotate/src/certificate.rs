use anyhow::{bail, Context, Result};
use time::OffsetDateTime;
use x509_parser::prelude::{GeneralName, Pem};

use crate::models::CertificateMaterial;

/// The parts of the new certificate worth checking before it is rolled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject_alt_names: Vec<String>,
    pub not_after: OffsetDateTime,
}

impl CertificateSummary {
    pub fn inspect(material: &CertificateMaterial) -> Result<Self> {
        if material.private_key.trim().is_empty() {
            bail!("private key is empty");
        }
        let pem = read_pem(&material.public_key)?;
        let cert = pem.parse_x509().context("invalid x509 certificate")?;
        let not_after = cert.validity().not_after.to_datetime();
        let mut subject_alt_names = Vec::new();
        if let Some(san) = cert
            .tbs_certificate
            .subject_alternative_name()
            .context("failed to parse subject alternative name")?
        {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    subject_alt_names.push(dns.to_string());
                }
            }
        }
        Ok(Self {
            subject_alt_names,
            not_after,
        })
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.not_after <= now
    }

    /// Whether any subject alternative name matches `domain`.
    ///
    /// A wildcard name covers exactly one extra label.
    pub fn covers(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.subject_alt_names.iter().any(|name| {
            let name = name.to_ascii_lowercase();
            match name.strip_prefix("*.") {
                Some(base) => domain
                    .split_once('.')
                    .is_some_and(|(label, rest)| !label.is_empty() && rest == base),
                None => name == domain,
            }
        })
    }

    pub fn uncovered<'a>(&self, domains: impl IntoIterator<Item = &'a String>) -> Vec<&'a str> {
        domains
            .into_iter()
            .filter(|d| !self.covers(d))
            .map(String::as_str)
            .collect()
    }
}

fn read_pem(cert_pem: &str) -> Result<Pem> {
    Pem::iter_from_buffer(cert_pem.as_bytes())
        .next()
        .transpose()
        .context("invalid pem")?
        .context("no certificate in pem")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(names: &[&str]) -> CertificateSummary {
        CertificateSummary {
            subject_alt_names: names.iter().map(|n| n.to_string()).collect(),
            not_after: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn wildcard_covers_one_label() {
        let summary = summary(&["example.com", "*.example.com"]);
        assert!(summary.covers("example.com"));
        assert!(summary.covers("cdn.example.com"));
        assert!(summary.covers("CDN.Example.com"));
        assert!(!summary.covers("a.cdn.example.com"));
        assert!(!summary.covers("example.org"));
    }

    #[test]
    fn lists_uncovered_domains() {
        let summary = summary(&["*.example.com"]);
        let domains = vec!["a.example.com".to_string(), "example.com".to_string()];
        assert_eq!(summary.uncovered(&domains), vec!["example.com"]);
    }

    #[test]
    fn inspects_generated_certificate() {
        let certified =
            rcgen::generate_simple_self_signed(vec!["a.com".into(), "*.b.com".into()]).unwrap();
        let material = CertificateMaterial::new(
            certified.cert.pem(),
            certified.key_pair.serialize_pem(),
        );
        let summary = CertificateSummary::inspect(&material).unwrap();
        assert_eq!(summary.subject_alt_names, vec!["a.com", "*.b.com"]);
        assert!(!summary.is_expired(OffsetDateTime::now_utc()));
        assert!(summary.covers("x.b.com"));
    }

    #[test]
    fn rejects_garbage() {
        let material = CertificateMaterial::new("not a pem", "key");
        assert!(CertificateSummary::inspect(&material).is_err());
        let material = CertificateMaterial::new("", "");
        assert!(CertificateSummary::inspect(&material).is_err());
    }
}
