//! Error types for Kino EME

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for key acquisition operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message used when the platform rejects key container creation without a reason
pub const MEDIA_KEYS_FALLBACK_MESSAGE: &str = "Failed to create and initialize a MediaKeys object";

/// A rejection raised by the platform (CDM, key container, session or video element)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct PlatformError {
    /// Exception name, e.g. `NotSupportedError`
    pub name: String,
    /// Human-readable message (may be empty)
    pub message: String,
}

impl PlatformError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new("NotSupportedError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }
}

/// Key acquisition error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Missing url/licenseUri or getLicense in {key_system} keySystem configuration")]
    MissingLicenseStrategy { key_system: String },

    #[error("Missing getCertificate or certificateUri in {key_system} keySystem configuration")]
    MissingCertificateStrategy { key_system: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Negotiation errors
    #[error("No supported key system among {candidates:?}")]
    NoSupportedKeySystem { candidates: Vec<String> },

    // Platform errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("{0}")]
    Provisioning(String),

    #[error("Unable to create or initialize key session")]
    SessionInitialization,

    // License and certificate errors
    #[error("Request failed with status {status}: {cause}")]
    HttpStatus { status: u16, cause: String },

    #[error("License acquisition failed: {0}")]
    LicenseAcquisition(String),

    #[error("Certificate request failed: {0}")]
    CertificateRequest(String),

    #[error("Invalid license message envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid init data: {0}")]
    InvalidInitData(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a license acquisition error
    pub fn license(msg: impl Into<String>) -> Self {
        Error::LicenseAcquisition(msg.into())
    }

    /// Returns true for configuration errors raised before any platform call
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::MissingLicenseStrategy { .. }
                | Error::MissingCertificateStrategy { .. }
                | Error::InvalidConfig(_)
        )
    }

    /// Returns true if retrying the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::HttpStatus { status: 500..=599, .. } | Error::Network(_)
        )
    }

    /// Returns the error code for reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::MissingLicenseStrategy { .. } => "MISSING_LICENSE_STRATEGY",
            Error::MissingCertificateStrategy { .. } => "MISSING_CERTIFICATE_STRATEGY",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::NoSupportedKeySystem { .. } => "NO_SUPPORTED_KEY_SYSTEM",
            Error::Platform(_) => "PLATFORM",
            Error::Provisioning(_) => "PROVISIONING",
            Error::SessionInitialization => "SESSION_INIT",
            Error::HttpStatus { .. } => "HTTP_STATUS",
            Error::LicenseAcquisition(_) => "LICENSE_ACQUIRE",
            Error::CertificateRequest(_) => "CERTIFICATE_REQUEST",
            Error::InvalidEnvelope(_) => "INVALID_ENVELOPE",
            Error::InvalidInitData(_) => "INVALID_INIT_DATA",
            Error::Network(_) => "NETWORK",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

/// Stage at which a reported failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    FailedToRequestMediaKeySystemAccess,
    FailedToRequestCertificate,
    FailedToCreateMediaKeys,
    FailedToAttachMediaKeys,
    FailedToSetServerCertificate,
    FailedToCreateSession,
    FailedToGenerateLicenseRequest,
    FailedToRequestLicense,
    FailedToUpdateSession,
    FailedToCloseSession,
}

impl ErrorType {
    /// Stable code consumed by host error handlers
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::FailedToRequestMediaKeySystemAccess => "EMEFailedToRequestMediaKeySystemAccess",
            ErrorType::FailedToRequestCertificate => "EMEFailedToRequestCertificate",
            ErrorType::FailedToCreateMediaKeys => "EMEFailedToCreateMediaKeys",
            ErrorType::FailedToAttachMediaKeys => "EMEFailedToAttachMediaKeysToVideoElement",
            ErrorType::FailedToSetServerCertificate => "EMEFailedToSetServerCertificate",
            ErrorType::FailedToCreateSession => "EMEFailedToCreateMediaKeySession",
            ErrorType::FailedToGenerateLicenseRequest => "EMEFailedToGenerateLicenseRequest",
            ErrorType::FailedToRequestLicense => "EMEFailedToRequestLicense",
            ErrorType::FailedToUpdateSession => "EMEFailedToUpdateSessionWithReceivedLicenseKeys",
            ErrorType::FailedToCloseSession => "EMEFailedToCloseSession",
        }
    }

    /// Returns true if the pipeline keeps going after this failure
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            ErrorType::FailedToAttachMediaKeys
                | ErrorType::FailedToSetServerCertificate
                | ErrorType::FailedToRequestLicense
                | ErrorType::FailedToUpdateSession
                | ErrorType::FailedToCloseSession
        )
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context passed to the error reporter alongside the error itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_type: ErrorType,
    pub key_system: Option<String>,
}

impl ErrorMetadata {
    pub fn new(error_type: ErrorType, key_system: Option<&str>) -> Self {
        Self {
            error_type,
            key_system: key_system.map(str::to_string),
        }
    }
}
