//! Key system configuration
//!
//! Raw options arrive either as a bare license URL or as a structured
//! `KeySystemConfig`. `normalize` resolves them into `KeySystemOptions` with
//! exactly one license strategy (and one certificate strategy for families
//! that need it) before anything touches the platform.

use crate::fairplay::SkdContentId;
use crate::http::HeaderOverrides;
use crate::license::{
    CertificateSource, ContentIdResolver, EnvelopeParser, HttpCertificate, HttpLicense,
    LicenseSource,
};
use crate::negotiate::{KeySystemConfiguration, Requirement};
use crate::types::KeySystemFamily;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Per key system configuration as supplied by the host
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySystemConfig {
    /// License server URL
    pub url: Option<String>,
    /// Alias for `url`, used when `url` is absent
    pub license_uri: Option<String>,
    /// Server certificate URL
    pub certificate_uri: Option<String>,
    /// Headers for license requests
    pub license_headers: HeaderOverrides,
    /// Headers for certificate requests
    pub certificate_headers: HeaderOverrides,
    pub audio_content_type: Option<String>,
    pub audio_robustness: Option<String>,
    pub video_content_type: Option<String>,
    pub video_robustness: Option<String>,
    pub persistent_state: Option<Requirement>,
    pub init_data_types: Option<Vec<String>>,
    /// Replaces the derived capability query entirely
    pub supported_configurations: Option<Vec<KeySystemConfiguration>>,
    /// Base64 init data used instead of the payload reported by the platform
    pub pssh: Option<String>,
    #[serde(skip)]
    pub license_source: Option<Arc<dyn LicenseSource>>,
    #[serde(skip)]
    pub certificate_source: Option<Arc<dyn CertificateSource>>,
    #[serde(skip)]
    pub content_id: Option<Arc<dyn ContentIdResolver>>,
    #[serde(skip)]
    pub envelope: Option<Arc<dyn EnvelopeParser>>,
}

impl KeySystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with only a license URL
    pub fn license_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_certificate_uri(mut self, uri: impl Into<String>) -> Self {
        self.certificate_uri = Some(uri.into());
        self
    }

    pub fn with_license_source(mut self, source: Arc<dyn LicenseSource>) -> Self {
        self.license_source = Some(source);
        self
    }

    pub fn with_certificate_source(mut self, source: Arc<dyn CertificateSource>) -> Self {
        self.certificate_source = Some(source);
        self
    }

    pub fn with_content_id(mut self, resolver: Arc<dyn ContentIdResolver>) -> Self {
        self.content_id = Some(resolver);
        self
    }

    pub fn with_envelope(mut self, parser: Arc<dyn EnvelopeParser>) -> Self {
        self.envelope = Some(parser);
        self
    }

    /// Add a license request header
    pub fn with_license_header(mut self, name: &str, value: &str) -> Self {
        self.license_headers.insert(name.to_string(), Some(value.to_string()));
        self
    }

    pub fn with_video(mut self, content_type: &str, robustness: Option<&str>) -> Self {
        self.video_content_type = Some(content_type.to_string());
        self.video_robustness = robustness.map(str::to_string);
        self
    }

    pub fn with_audio(mut self, content_type: &str, robustness: Option<&str>) -> Self {
        self.audio_content_type = Some(content_type.to_string());
        self.audio_robustness = robustness.map(str::to_string);
        self
    }

    pub fn with_pssh(mut self, init_data: &[u8]) -> Self {
        self.pssh = Some(STANDARD.encode(init_data));
        self
    }
}

impl fmt::Debug for KeySystemConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySystemConfig")
            .field("url", &self.url)
            .field("license_uri", &self.license_uri)
            .field("certificate_uri", &self.certificate_uri)
            .field("license_headers", &self.license_headers)
            .field("certificate_headers", &self.certificate_headers)
            .field("video_content_type", &self.video_content_type)
            .field("audio_content_type", &self.audio_content_type)
            .field("persistent_state", &self.persistent_state)
            .field("init_data_types", &self.init_data_types)
            .field("pssh", &self.pssh)
            .field("license_source", &self.license_source.is_some())
            .field("certificate_source", &self.certificate_source.is_some())
            .field("content_id", &self.content_id.is_some())
            .field("envelope", &self.envelope.is_some())
            .finish_non_exhaustive()
    }
}

/// Options for one key system before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawKeySystemOptions {
    /// Bare license URL
    Url(String),
    Detailed(KeySystemConfig),
}

impl From<&str> for RawKeySystemOptions {
    fn from(url: &str) -> Self {
        RawKeySystemOptions::Url(url.to_string())
    }
}

impl From<String> for RawKeySystemOptions {
    fn from(url: String) -> Self {
        RawKeySystemOptions::Url(url)
    }
}

impl From<KeySystemConfig> for RawKeySystemOptions {
    fn from(config: KeySystemConfig) -> Self {
        RawKeySystemOptions::Detailed(config)
    }
}

/// Options for one key system with every strategy resolved
#[derive(Clone)]
pub struct KeySystemOptions {
    key_system: String,
    family: KeySystemFamily,
    config: KeySystemConfig,
    license: Arc<dyn LicenseSource>,
    certificate: Option<Arc<dyn CertificateSource>>,
    content_id: Option<Arc<dyn ContentIdResolver>>,
    pssh: Option<Bytes>,
}

impl KeySystemOptions {
    pub fn key_system(&self) -> &str {
        &self.key_system
    }

    pub fn family(&self) -> KeySystemFamily {
        self.family
    }

    pub fn config(&self) -> &KeySystemConfig {
        &self.config
    }

    pub fn license_url(&self) -> Option<&str> {
        self.config.url.as_deref()
    }

    pub fn license_source(&self) -> &Arc<dyn LicenseSource> {
        &self.license
    }

    pub fn certificate_source(&self) -> Option<&Arc<dyn CertificateSource>> {
        self.certificate.as_ref()
    }

    pub fn content_id_resolver(&self) -> Option<&Arc<dyn ContentIdResolver>> {
        self.content_id.as_ref()
    }

    /// Decoded `pssh` override
    pub fn pssh(&self) -> Option<&Bytes> {
        self.pssh.as_ref()
    }

    /// Back to raw form; normalizing the result yields an equal record
    pub fn into_raw(self) -> RawKeySystemOptions {
        RawKeySystemOptions::Detailed(self.config)
    }
}

impl fmt::Debug for KeySystemOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySystemOptions")
            .field("key_system", &self.key_system)
            .field("family", &self.family)
            .field("config", &self.config)
            .field("certificate", &self.certificate.is_some())
            .field("content_id", &self.content_id.is_some())
            .finish_non_exhaustive()
    }
}

impl PartialEq for KeySystemOptions {
    fn eq(&self, other: &Self) -> bool {
        self.key_system == other.key_system
            && self.family == other.family
            && self.pssh == other.pssh
            && serde_json::to_value(&self.config).ok() == serde_json::to_value(&other.config).ok()
            && Arc::ptr_eq(&self.license, &other.license)
            && same_handle(&self.certificate, &other.certificate)
            && same_handle(&self.content_id, &other.content_id)
            && same_handle(&self.config.envelope, &other.config.envelope)
    }
}

fn same_handle<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Resolve raw options for `key_system` into a complete record.
///
/// Fails with `MissingLicenseStrategy` when neither a license URL nor a
/// license source is present, and with `MissingCertificateStrategy` for
/// certificate-requiring families without a certificate URL or source.
pub fn normalize(
    key_system: &str,
    raw: impl Into<RawKeySystemOptions>,
) -> Result<KeySystemOptions> {
    let mut config = match raw.into() {
        RawKeySystemOptions::Url(url) => KeySystemConfig::license_url(url),
        RawKeySystemOptions::Detailed(config) => config,
    };
    let family = KeySystemFamily::from_key_system(key_system);

    if config.url.is_none() {
        config.url = config.license_uri.clone();
    }

    let license = match (&config.license_source, &config.url) {
        (Some(source), _) => source.clone(),
        (None, Some(url)) => default_license_source(family, url, &config),
        (None, None) => {
            return Err(Error::MissingLicenseStrategy {
                key_system: key_system.to_string(),
            })
        }
    };

    let certificate = match (&config.certificate_source, &config.certificate_uri) {
        (Some(source), _) => Some(source.clone()),
        (None, Some(uri)) => Some(Arc::new(HttpCertificate::new(
            uri.clone(),
            config.certificate_headers.clone(),
        )) as Arc<dyn CertificateSource>),
        (None, None) if family.requires_certificate() => {
            return Err(Error::MissingCertificateStrategy {
                key_system: key_system.to_string(),
            })
        }
        (None, None) => None,
    };

    let content_id = match &config.content_id {
        Some(resolver) => Some(resolver.clone()),
        None if family == KeySystemFamily::FairPlay => {
            Some(Arc::new(SkdContentId) as Arc<dyn ContentIdResolver>)
        }
        None => None,
    };

    let pssh = config
        .pssh
        .as_deref()
        .map(|encoded| {
            STANDARD.decode(encoded).map(Bytes::from).map_err(|e| {
                Error::InvalidConfig(format!("pssh for {key_system} is not valid base64: {e}"))
            })
        })
        .transpose()?;

    config.license_source = Some(license.clone());
    config.certificate_source = certificate.clone();
    config.content_id = content_id.clone();

    Ok(KeySystemOptions {
        key_system: key_system.to_string(),
        family,
        config,
        license,
        certificate,
        content_id,
        pssh,
    })
}

fn default_license_source(
    family: KeySystemFamily,
    url: &str,
    config: &KeySystemConfig,
) -> Arc<dyn LicenseSource> {
    let license = HttpLicense::new(url, config.license_headers.clone());
    match family {
        KeySystemFamily::PlayReady => Arc::new(license.with_envelope(config.envelope.clone())),
        _ => Arc::new(license),
    }
}

/// Candidate key systems in preference order
#[derive(Debug, Clone, Default)]
pub struct KeySystems(Vec<(String, RawKeySystemOptions)>);

impl KeySystems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate; re-inserting a key replaces it in place
    pub fn insert(&mut self, key_system: impl Into<String>, options: impl Into<RawKeySystemOptions>) {
        let key_system = key_system.into();
        let options = options.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key_system) {
            Some(entry) => entry.1 = options,
            None => self.0.push((key_system, options)),
        }
    }

    pub fn get(&self, key_system: &str) -> Option<&RawKeySystemOptions> {
        self.0.iter().find(|(k, _)| k == key_system).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawKeySystemOptions)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for KeySystems {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key_system, options) in &self.0 {
            map.serialize_entry(key_system, options)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for KeySystems {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeySystemsVisitor;

        impl<'de> Visitor<'de> for KeySystemsVisitor {
            type Value = KeySystems;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of key system identifiers to options")
            }

            // Map order is the caller's preference order.
            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<KeySystems, A::Error> {
                let mut systems = KeySystems::new();
                while let Some((key_system, options)) =
                    map.next_entry::<String, RawKeySystemOptions>()?
                {
                    systems.insert(key_system, options);
                }
                Ok(systems)
            }
        }

        deserializer.deserialize_map(KeySystemsVisitor)
    }
}

/// Renewal limits derived from `EmeOptions`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// Refuse renewals until playback has started
    pub limit_before_play: bool,
    /// Refuse renewals once paused for this many seconds
    pub max_pause_secs: Option<u64>,
}

/// Global options shared by every key system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmeOptions {
    /// Candidate key systems, first is preferred
    pub key_systems: KeySystems,
    /// Headers added to every license and certificate request
    pub eme_headers: HeaderOverrides,
    pub limit_renewals_before_play: bool,
    /// Seconds the player may stay paused before renewals are refused
    pub limit_renewals_max_pause_duration: Option<u64>,
}

impl EmeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn with_key_system(
        mut self,
        key_system: impl Into<String>,
        options: impl Into<RawKeySystemOptions>,
    ) -> Self {
        self.key_systems.insert(key_system, options);
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.eme_headers.insert(name.to_string(), Some(value.to_string()));
        self
    }

    pub fn with_renewal_limits(mut self, before_play: bool, max_pause_secs: Option<u64>) -> Self {
        self.limit_renewals_before_play = before_play;
        self.limit_renewals_max_pause_duration = max_pause_secs;
        self
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            limit_before_play: self.limit_renewals_before_play,
            max_pause_secs: self.limit_renewals_max_pause_duration,
        }
    }

    /// Normalize every candidate, keeping preference order
    pub fn normalize_key_systems(&self) -> Result<Vec<(String, KeySystemOptions)>> {
        self.key_systems
            .iter()
            .map(|(key_system, raw)| Ok((key_system.to_string(), normalize(key_system, raw.clone())?)))
            .collect()
    }
}
