use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use certrotate::{
    parse_domains, CertRotator, CertificateMaterial, PollPolicy, ProviderClient, RotationConfig,
    RotationReport, TencentConfig,
};
use clap::Parser;
use documented::DocumentedFields;
use fs_err as fs;
use load_config::{env_inputs, load_config};
use serde::{Deserialize, Serialize};
use toml_edit::ser::to_document;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = include_str!("../certrotate.toml");

#[derive(Parser)]
enum Command {
    /// Upload the certificate and move every configured CDN domain onto it
    Rotate {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate configuration template
    Cfg {
        /// Write to file
        #[arg(short, long)]
        write_to: Option<PathBuf>,
    },
}

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, PartialEq, Deserialize, Serialize, DocumentedFields)]
struct Config {
    /// Tencent Cloud API secret id
    secret_id: String,
    /// Tencent Cloud API secret key
    secret_key: String,
    /// Region sent with every API request, empty for none
    region: String,
    /// Endpoint of the SSL certificate service
    ssl_endpoint: String,
    /// Endpoint of the CDN service
    cdn_endpoint: String,
    /// PEM file with the full certificate chain to deploy
    fullchain_file: PathBuf,
    /// PEM file with the private key of the certificate
    key_file: PathBuf,
    /// CDN domains to serve with the certificate, separated by whitespace
    cdn_domains: String,
    /// Alias of the uploaded certificate, empty for none
    certificate_alias: String,
    /// Seconds between two status probes of a provider task
    poll_interval: u64,
    /// Status probes before giving up on a provider task
    poll_max_attempts: u32,
    /// Delete the replaced certificates once nothing uses them
    retire_old_certificates: bool,
    /// Write a JSON report of the rotation to this file, empty for none
    report_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let tencent = TencentConfig::new("", "");
        Self {
            secret_id: "".into(),
            secret_key: "".into(),
            region: tencent.region,
            ssl_endpoint: tencent.ssl_endpoint,
            cdn_endpoint: tencent.cdn_endpoint,
            fullchain_file: "fullchain.pem".into(),
            key_file: "key.pem".into(),
            cdn_domains: "".into(),
            certificate_alias: "".into(),
            poll_interval: 1,
            poll_max_attempts: 60,
            retire_old_certificates: true,
            report_file: "".into(),
        }
    }
}

impl Config {
    fn load(config_file: Option<&str>) -> Result<Self> {
        let config = load_config("certrotate", DEFAULT_CONFIG, config_file)
            .merge(env_inputs("CERTROTATE_"))
            .merge(env_inputs("INPUT_"))
            .extract()?;
        Ok(config)
    }

    fn to_commented_toml(&self) -> Result<String> {
        let mut doc = to_document(self)?;

        for (i, (mut key, _value)) in doc.iter_mut().enumerate() {
            let decor = key.leaf_decor_mut();
            let docstring = Self::FIELD_DOCS[i];

            let mut comment = String::new();
            for line in docstring.lines() {
                let line = if line.is_empty() {
                    String::from("#\n")
                } else {
                    format!("# {line}\n")
                };
                comment.push_str(&line);
            }
            decor.set_prefix(comment);
        }
        Ok(doc.to_string())
    }

    fn tencent(&self) -> TencentConfig {
        TencentConfig {
            secret_id: self.secret_id.clone(),
            secret_key: self.secret_key.clone(),
            region: self.region.clone(),
            ssl_endpoint: self.ssl_endpoint.clone(),
            cdn_endpoint: self.cdn_endpoint.clone(),
        }
    }

    fn rotation(&self) -> Result<RotationConfig> {
        let fullchain = fs::read_to_string(&self.fullchain_file)?;
        let key = fs::read_to_string(&self.key_file)?;
        let alias = Some(self.certificate_alias.trim()).filter(|alias| !alias.is_empty());
        let poll_policy = PollPolicy {
            interval: Duration::from_secs(self.poll_interval),
            max_attempts: self.poll_max_attempts,
        };
        Ok(RotationConfig::builder()
            .domains(parse_domains(&self.cdn_domains))
            .certificate(CertificateMaterial::new(fullchain, key))
            .maybe_certificate_alias(alias)
            .poll_policy(poll_policy)
            .retire_old_certificates(self.retire_old_certificates)
            .build())
    }
}

async fn rotate(config_file: Option<&str>) -> Result<()> {
    let config = Config::load(config_file).context("Failed to load configuration")?;
    let rotation = config.rotation().context("Failed to read certificate")?;
    info!(domains = rotation.domains().len(), "starting certificate rotation");
    let provider =
        ProviderClient::new_tencent(config.tencent()).context("Failed to create provider client")?;
    let report = CertRotator::new(provider, rotation).run().await?;
    log_report(&report);
    if !config.report_file.is_empty() {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&config.report_file, json)?;
        info!(file = config.report_file, "rotation report written");
    }
    Ok(())
}

fn log_report(report: &RotationReport) {
    for migration in &report.migrations {
        info!(
            cert = migration.old_certificate_id,
            outcome = ?migration.outcome,
            "migrated domains of old certificate"
        );
    }
    if !report.bound_domains.is_empty() {
        info!(domains = report.bound_domains.join(" "), "bound domains");
    }
    if let Some(retirement) = &report.retirement {
        info!(
            deleted = retirement.deleted().collect::<Vec<_>>().join(" "),
            outcome = ?retirement.outcome,
            "retired old certificates"
        );
    }
    if report.is_degraded() {
        warn!("rotation finished with unconfirmed steps, check the log above");
    }
    info!(cert = report.new_certificate_id, "rotation finished");
}

/// Escapes a message for a GitHub Actions workflow command.
fn escape_annotation(message: &str) -> String {
    message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Rotate { config } => {
            let config = config.as_ref().and_then(|path| path.to_str());
            rotate(config).await?;
        }
        Command::Cfg { write_to } => {
            let toml_str = Config::default().to_commented_toml()?;
            match write_to {
                Some(path) => fs::write(path, toml_str)?,
                None => println!("{}", toml_str),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:?}");
            if std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true") {
                println!("::error::{}", escape_annotation(&format!("{err:#}")));
            }
            ExitCode::FAILURE
        }
    }
}
