//! Key system capability negotiation
//!
//! Candidates are tried strictly in preference order: the next platform query
//! is only issued once the previous one has been rejected. The first accepted
//! candidate wins, not the most capable one.

use crate::config::{KeySystemConfig, KeySystemOptions};
use crate::platform::{KeySystemAccess, KeySystemPlatform};
use crate::types::KeySystemFamily;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Whether a CDM feature is required, allowed or forbidden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Requirement {
    Required,
    Optional,
    NotAllowed,
}

/// One audio or video capability constraint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robustness: Option<String>,
}

impl MediaCapability {
    fn from_parts(content_type: Option<&str>, robustness: Option<&str>) -> Option<Self> {
        if content_type.is_none() && robustness.is_none() {
            return None;
        }
        Some(Self {
            content_type: content_type.map(str::to_string),
            robustness: robustness.map(str::to_string),
        })
    }
}

/// Capability query sent to the platform for one candidate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySystemConfiguration {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub audio_capabilities: Vec<MediaCapability>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub video_capabilities: Vec<MediaCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_state: Option<Requirement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_data_types: Vec<String>,
}

/// Build the capability query for a key system.
///
/// Explicit `supported_configurations` are used as-is. FairPlay gets `sinf`
/// init data and a `video/mp4` video capability unless the caller set them.
pub fn supported_configurations(
    key_system: &str,
    config: &KeySystemConfig,
) -> Vec<KeySystemConfiguration> {
    if let Some(configurations) = &config.supported_configurations {
        return configurations.clone();
    }

    let fairplay = KeySystemFamily::from_key_system(key_system) == KeySystemFamily::FairPlay;

    let init_data_types = match &config.init_data_types {
        Some(types) => types.clone(),
        None if fairplay => vec!["sinf".to_string()],
        None => Vec::new(),
    };
    let video_content_type = config
        .video_content_type
        .as_deref()
        .or(if fairplay { Some("video/mp4") } else { None });

    let configuration = KeySystemConfiguration {
        audio_capabilities: MediaCapability::from_parts(
            config.audio_content_type.as_deref(),
            config.audio_robustness.as_deref(),
        )
        .into_iter()
        .collect(),
        video_capabilities: MediaCapability::from_parts(
            video_content_type,
            config.video_robustness.as_deref(),
        )
        .into_iter()
        .collect(),
        persistent_state: config.persistent_state,
        init_data_types,
    };

    vec![configuration]
}

/// Key system accepted by the platform
#[derive(Clone)]
pub struct NegotiationResult {
    /// Identifier of the accepted candidate
    pub key_system: String,
    /// Platform access handle for that candidate
    pub access: Arc<dyn KeySystemAccess>,
}

impl std::fmt::Debug for NegotiationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationResult")
            .field("key_system", &self.key_system)
            .finish_non_exhaustive()
    }
}

/// Ask the platform for each candidate in order until one is accepted
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn negotiate(
    platform: &dyn KeySystemPlatform,
    candidates: &[(String, KeySystemOptions)],
) -> Result<NegotiationResult> {
    for (key_system, options) in candidates {
        let configurations = supported_configurations(key_system, options.config());

        match platform.request_access(key_system, &configurations).await {
            Ok(access) => {
                info!(key_system = %key_system, "Key system access granted");
                return Ok(NegotiationResult {
                    key_system: key_system.clone(),
                    access,
                });
            }
            Err(e) => {
                debug!(key_system = %key_system, error = %e, "Key system rejected, trying next candidate");
            }
        }
    }

    Err(Error::NoSupportedKeySystem {
        candidates: candidates.iter().map(|(k, _)| k.clone()).collect(),
    })
}
