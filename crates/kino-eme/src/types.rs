//! Core types for Kino EME

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Unique identifier for a key session tracked by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key system families that need special handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySystemFamily {
    Widevine,
    PlayReady,
    FairPlay,
    ClearKey,
    Other,
}

impl KeySystemFamily {
    /// Classify a key system identifier
    pub fn from_key_system(key_system: &str) -> Self {
        if key_system.starts_with("com.apple.fps") {
            KeySystemFamily::FairPlay
        } else if key_system.starts_with("com.microsoft.playready") {
            KeySystemFamily::PlayReady
        } else if key_system.starts_with("com.widevine.alpha") {
            KeySystemFamily::Widevine
        } else if key_system == "org.w3.clearkey" {
            KeySystemFamily::ClearKey
        } else {
            KeySystemFamily::Other
        }
    }

    /// FairPlay cannot play without a server certificate
    pub fn requires_certificate(&self) -> bool {
        matches!(self, KeySystemFamily::FairPlay)
    }

    /// License sources of this family receive the content id
    pub fn passes_content_id(&self) -> bool {
        matches!(self, KeySystemFamily::FairPlay)
    }
}

impl std::fmt::Display for KeySystemFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySystemFamily::Widevine => write!(f, "Widevine"),
            KeySystemFamily::PlayReady => write!(f, "PlayReady"),
            KeySystemFamily::FairPlay => write!(f, "FairPlay"),
            KeySystemFamily::ClearKey => write!(f, "ClearKey"),
            KeySystemFamily::Other => write!(f, "Other"),
        }
    }
}

/// Type of a message raised by a native session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    LicenseRequest,
    LicenseRenewal,
    LicenseRelease,
    IndividualizationRequest,
    Other(String),
}

impl MessageType {
    pub fn parse(value: &str) -> Self {
        match value {
            "license-request" => MessageType::LicenseRequest,
            "license-renewal" => MessageType::LicenseRenewal,
            "license-release" => MessageType::LicenseRelease,
            "individualization-request" => MessageType::IndividualizationRequest,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::LicenseRequest => "license-request",
            MessageType::LicenseRenewal => "license-renewal",
            MessageType::LicenseRelease => "license-release",
            MessageType::IndividualizationRequest => "individualization-request",
            MessageType::Other(other) => other,
        }
    }

    /// Only requests and renewals go to the license server
    pub fn requests_license(&self) -> bool {
        matches!(self, MessageType::LicenseRequest | MessageType::LicenseRenewal)
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(MessageType::parse(&value))
    }
}

/// Status of a single key inside a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    Usable,
    Expired,
    Released,
    OutputRestricted,
    OutputDownscaled,
    StatusPending,
    InternalError,
    Unrecognized(String),
}

impl KeyStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "usable" => KeyStatus::Usable,
            "expired" => KeyStatus::Expired,
            "released" => KeyStatus::Released,
            "output-restricted" => KeyStatus::OutputRestricted,
            "output-downscaled" => KeyStatus::OutputDownscaled,
            "status-pending" => KeyStatus::StatusPending,
            "internal-error" => KeyStatus::InternalError,
            other => KeyStatus::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyStatus::Usable => "usable",
            KeyStatus::Expired => "expired",
            KeyStatus::Released => "released",
            KeyStatus::OutputRestricted => "output-restricted",
            KeyStatus::OutputDownscaled => "output-downscaled",
            KeyStatus::StatusPending => "status-pending",
            KeyStatus::InternalError => "internal-error",
            KeyStatus::Unrecognized(other) => other,
        }
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for KeyStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A (key id, status) pair exposed by a native session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatusEntry {
    /// Key id, serialized as unpadded base64url
    #[serde(serialize_with = "serialize_base64")]
    pub key_id: Bytes,
    pub status: KeyStatus,
}

impl KeyStatusEntry {
    pub fn new(key_id: impl Into<Bytes>, status: KeyStatus) -> Self {
        Self {
            key_id: key_id.into(),
            status,
        }
    }
}

/// Bookkeeping for an init data payload a session was opened for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub init_data: Bytes,
}

impl SessionRecord {
    pub fn new(init_data: impl Into<Bytes>) -> Self {
        Self {
            init_data: init_data.into(),
        }
    }

    pub fn matches(&self, init_data: impl AsRef<[u8]>) -> bool {
        init_data_matches(&self.init_data, init_data)
    }
}

/// Two init data payloads are the same when their bytes are equal,
/// whatever container holds them.
pub fn init_data_matches(a: impl AsRef<[u8]>, b: impl AsRef<[u8]>) -> bool {
    a.as_ref() == b.as_ref()
}

pub(crate) fn serialize_base64<S: Serializer>(
    bytes: &Bytes,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
}
