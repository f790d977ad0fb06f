//! Kino EME - Encrypted media key acquisition for Kino
//!
//! This crate drives the key acquisition state machine between a player and
//! a platform content decryption module:
//! - Key system configuration normalization
//! - Capability negotiation with sequential fallback
//! - Exactly-once CDM provisioning (certificate, key container, attach)
//! - Key session creation, queuing and deduplication
//! - License exchange with renewal and expiry handling
//! - Typed events and errors on a broadcast bus
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Kino EME                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   encrypted ──▶ ┌──────────────┐   ┌──────────────┐             │
//! │                 │  Controller  │──▶│    Config    │             │
//! │                 └──────┬───────┘   │  Normalizer  │             │
//! │                        │           └──────────────┘             │
//! │                 ┌──────┴───────┐                                │
//! │                 │  Capability  │                                │
//! │                 │  Negotiator  │                                │
//! │                 └──────┬───────┘                                │
//! │                        │                                        │
//! │  ┌──────────────┐  ┌───┴──────────┐  ┌──────────────┐           │
//! │  │ Provisioning │─▶│   Session    │─▶│   License    │──▶ HTTP   │
//! │  │   Pipeline   │  │   Manager    │  │   Exchange   │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                    ┌──────┴──────┐                              │
//! │                    │ Event/Error │                              │
//! │                    │     Bus     │                              │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Platform access (CDM, video element, player) goes through the traits in
//! [`platform`]; HTTP goes through [`http::HttpTransport`].

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod fairplay;
pub mod http;
pub mod license;
pub mod negotiate;
pub mod platform;
pub mod provision;
pub mod session;
pub mod types;

pub use config::{normalize, EmeOptions, KeySystemConfig, KeySystemOptions, RawKeySystemOptions};
pub use context::{ProvisioningState, Services, VideoContext};
pub use controller::EmeController;
pub use error::{Error, ErrorMetadata, ErrorType, PlatformError, Result};
pub use events::{BusErrorReporter, EmeEvent, ErrorRecord, ErrorReporter, EventBus};
pub use http::{HttpTransport, ReqwestTransport, TransportConfig};
pub use license::{certificate_fn, license_fn, LicenseExchange, LicenseSource};
pub use negotiate::{negotiate, NegotiationResult};
pub use provision::provision;
pub use session::{create_or_queue_session, SessionRequest};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log library initialization
pub fn init() {
    tracing::info!(version = VERSION, "Kino EME initialized");
}
