//! CLI command implementations

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use kino_eme::config::{normalize, EmeOptions, KeySystemConfig, KeySystemOptions};
use kino_eme::fairplay::concat_init_data_id_and_certificate;
use kino_eme::http::HttpTransport;
use kino_eme::license::{CertificateSource, FetchContext, HttpCertificate};
use kino_eme::negotiate::{supported_configurations, KeySystemConfiguration};
use kino_eme::{EventBus, KeySystemFamily, LicenseExchange, ReqwestTransport, TransportConfig};

use crate::output::render;

/// Normalized view of one configured key system
#[derive(Debug, Serialize)]
struct KeySystemReport {
    key_system: String,
    family: Option<KeySystemFamily>,
    license_url: Option<String>,
    certificate: bool,
    content_id: bool,
    pssh_bytes: Option<usize>,
    configurations: Vec<KeySystemConfiguration>,
    error: Option<String>,
}

impl KeySystemReport {
    fn from_options(options: &KeySystemOptions) -> Self {
        Self {
            key_system: options.key_system().to_string(),
            family: Some(options.family()),
            license_url: options.license_url().map(str::to_string),
            certificate: options.certificate_source().is_some(),
            content_id: options.content_id_resolver().is_some(),
            pssh_bytes: options.pssh().map(|pssh| pssh.len()),
            configurations: supported_configurations(options.key_system(), options.config()),
            error: None,
        }
    }

    fn failed(key_system: &str, error: String) -> Self {
        Self {
            key_system: key_system.to_string(),
            family: None,
            license_url: None,
            certificate: false,
            content_id: false,
            pssh_bytes: None,
            configurations: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    key_systems: Vec<KeySystemReport>,
    headers: usize,
    limit_renewals_before_play: bool,
    limit_renewals_max_pause_duration: Option<u64>,
}

impl fmt::Display for ConfigReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "EME Configuration:")?;
        writeln!(f, "  Key systems: {}", self.key_systems.len())?;
        writeln!(f, "  Global headers: {}", self.headers)?;
        writeln!(f, "  Limit renewals before play: {}", self.limit_renewals_before_play)?;
        if let Some(secs) = self.limit_renewals_max_pause_duration {
            writeln!(f, "  Max pause before renewal: {}s", secs)?;
        }

        for (i, report) in self.key_systems.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  {}. {}", i + 1, report.key_system)?;
            if let Some(error) = &report.error {
                writeln!(f, "     Error: {}", error)?;
                continue;
            }
            if let Some(family) = report.family {
                writeln!(f, "     Family: {:?}", family)?;
            }
            match &report.license_url {
                Some(url) => writeln!(f, "     License: {}", url)?,
                None => writeln!(f, "     License: custom source")?,
            }
            writeln!(f, "     Certificate: {}", yes_no(report.certificate))?;
            writeln!(f, "     Content id: {}", yes_no(report.content_id))?;
            if let Some(bytes) = report.pssh_bytes {
                writeln!(f, "     PSSH override: {} bytes", bytes)?;
            }
            for configuration in &report.configurations {
                for capability in &configuration.video_capabilities {
                    writeln!(
                        f,
                        "     Video: {} {}",
                        capability.content_type.as_deref().unwrap_or("-"),
                        capability.robustness.as_deref().unwrap_or("")
                    )?;
                }
                for capability in &configuration.audio_capabilities {
                    writeln!(
                        f,
                        "     Audio: {} {}",
                        capability.content_type.as_deref().unwrap_or("-"),
                        capability.robustness.as_deref().unwrap_or("")
                    )?;
                }
                if !configuration.init_data_types.is_empty() {
                    writeln!(f, "     Init data: {}", configuration.init_data_types.join(", "))?;
                }
            }
        }
        Ok(())
    }
}

/// Result of a network fetch
#[derive(Debug, Serialize)]
struct FetchReport {
    kind: &'static str,
    url: String,
    key_system: String,
    bytes: usize,
    output: Option<PathBuf>,
}

impl fmt::Display for FetchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} received:", self.kind)?;
        writeln!(f, "  URL: {}", self.url)?;
        writeln!(f, "  Key system: {}", self.key_system)?;
        writeln!(f, "  Size: {} bytes", self.bytes)?;
        if let Some(path) = &self.output {
            writeln!(f, "  Written to: {}", path.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PackReport {
    init_data_bytes: usize,
    content_id: String,
    certificate_bytes: usize,
    total_bytes: usize,
    output: PathBuf,
}

impl fmt::Display for PackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FairPlay init data packed:")?;
        writeln!(f, "  Init data: {} bytes", self.init_data_bytes)?;
        writeln!(f, "  Content id: {}", self.content_id)?;
        writeln!(f, "  Certificate: {} bytes", self.certificate_bytes)?;
        writeln!(f, "  Total: {} bytes", self.total_bytes)?;
        writeln!(f, "  Written to: {}", self.output.display())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Parse `name=value` header arguments
fn parse_headers(headers: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    headers
        .iter()
        .map(|header| {
            let (name, value) = header
                .split_once('=')
                .with_context(|| format!("Header must be name=value: {}", header))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn transport(timeout_ms: u64) -> anyhow::Result<Arc<dyn HttpTransport>> {
    let config = TransportConfig {
        request_timeout_ms: timeout_ms,
    };
    Ok(Arc::new(ReqwestTransport::new(&config)?))
}

fn write_output(path: Option<&Path>, body: &Bytes) -> anyhow::Result<()> {
    if let Some(path) = path {
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), bytes = body.len(), "Wrote response body");
    }
    Ok(())
}

/// Normalize every key system in an options file
pub fn config(file: &Path, format: &str) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let options = EmeOptions::from_json(&json)?;

    let key_systems = options
        .key_systems
        .iter()
        .map(|(key_system, raw)| match normalize(key_system, raw.clone()) {
            Ok(normalized) => KeySystemReport::from_options(&normalized),
            Err(e) => KeySystemReport::failed(key_system, e.to_string()),
        })
        .collect();

    let report = ConfigReport {
        key_systems,
        headers: options.eme_headers.len(),
        limit_renewals_before_play: options.limit_renewals_before_play,
        limit_renewals_max_pause_duration: options.limit_renewals_max_pause_duration,
    };

    println!("{}", render(&report, format));
    Ok(())
}

/// POST a captured challenge to a license server
pub async fn license(
    url: &str,
    challenge: &Path,
    key_system: &str,
    headers: &[String],
    output: Option<PathBuf>,
    timeout_ms: u64,
    format: &str,
) -> anyhow::Result<()> {
    let message = Bytes::from(
        std::fs::read(challenge)
            .with_context(|| format!("Failed to read {}", challenge.display()))?,
    );

    let mut config = KeySystemConfig::license_url(url);
    for (name, value) in parse_headers(headers)? {
        config = config.with_license_header(&name, &value);
    }
    let options = normalize(key_system, config)?;

    info!(url, key_system, bytes = message.len(), "Sending license challenge");

    let exchange = LicenseExchange::new(&options, transport(timeout_ms)?, EventBus::default());
    let license = exchange
        .fetch_license(&EmeOptions::new(), message, None)
        .await?;

    write_output(output.as_deref(), &license)?;

    let report = FetchReport {
        kind: "License",
        url: url.to_string(),
        key_system: key_system.to_string(),
        bytes: license.len(),
        output,
    };
    println!("{}", render(&report, format));
    Ok(())
}

/// Fetch a server certificate
pub async fn certificate(url: &str, output: Option<PathBuf>, format: &str) -> anyhow::Result<()> {
    const KEY_SYSTEM: &str = "com.apple.fps.1_0";

    let transport = transport(TransportConfig::default().request_timeout_ms)?;
    let options = EmeOptions::new();
    let ctx = FetchContext {
        options: &options,
        transport: transport.as_ref(),
        key_system: KEY_SYSTEM,
    };

    info!(url, "Fetching server certificate");

    let certificate = HttpCertificate::new(url, Default::default())
        .fetch_certificate(&ctx)
        .await?;

    write_output(output.as_deref(), &certificate)?;

    let report = FetchReport {
        kind: "Certificate",
        url: url.to_string(),
        key_system: KEY_SYSTEM.to_string(),
        bytes: certificate.len(),
        output,
    };
    println!("{}", render(&report, format));
    Ok(())
}

/// Build a FairPlay init data buffer from its parts
pub fn fairplay_pack(
    init_data: &Path,
    content_id: &str,
    certificate: &Path,
    output: &Path,
    format: &str,
) -> anyhow::Result<()> {
    let init_data = std::fs::read(init_data)
        .with_context(|| format!("Failed to read {}", init_data.display()))?;
    let certificate = std::fs::read(certificate)
        .with_context(|| format!("Failed to read {}", certificate.display()))?;

    let packed = concat_init_data_id_and_certificate(&init_data, content_id, &certificate);
    write_output(Some(output), &packed)?;

    let report = PackReport {
        init_data_bytes: init_data.len(),
        content_id: content_id.to_string(),
        certificate_bytes: certificate.len(),
        total_bytes: packed.len(),
        output: output.to_path_buf(),
    };
    println!("{}", render(&report, format));
    Ok(())
}
