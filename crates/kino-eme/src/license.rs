//! License and certificate acquisition
//!
//! Sources are async traits. Hosts with callback-shaped fetch functions wrap
//! them with `license_fn` / `certificate_fn`; `LicenseExchange` gives the
//! session manager one uniform call and records every attempt on the bus.

use crate::config::{EmeOptions, KeySystemOptions};
use crate::events::{EmeEvent, EventBus};
use crate::http::{
    handle_response, merge_headers, HeaderOverrides, HttpMethod, HttpRequest, HttpTransport,
    RequestType,
};
use crate::types::KeySystemFamily;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Everything a source may need besides the request itself
pub struct FetchContext<'a> {
    pub options: &'a EmeOptions,
    pub transport: &'a dyn HttpTransport,
    pub key_system: &'a str,
}

/// Payload handed to a license source
#[derive(Debug, Clone)]
pub struct LicenseRequest {
    /// Message raised by the native session
    pub message: Bytes,
    /// Only set for families that scope licenses by content id
    pub content_id: Option<String>,
}

/// Exchanges a session message for license bytes
#[async_trait]
pub trait LicenseSource: Send + Sync {
    async fn fetch_license(&self, ctx: &FetchContext<'_>, request: LicenseRequest) -> Result<Bytes>;
}

/// Retrieves the server certificate used during provisioning
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn fetch_certificate(&self, ctx: &FetchContext<'_>) -> Result<Bytes>;
}

/// Derives a content id from init data
pub trait ContentIdResolver: Send + Sync {
    fn content_id(&self, options: &EmeOptions, init_data: &[u8]) -> Option<String>;
}

/// Headers and challenge extracted from a key system specific message envelope
#[derive(Debug, Clone, Default)]
pub struct LicenseEnvelope {
    pub headers: HeaderOverrides,
    pub challenge: Bytes,
}

/// Unwraps envelope-style session messages (PlayReady)
pub trait EnvelopeParser: Send + Sync {
    fn parse(&self, message: &[u8]) -> Result<LicenseEnvelope>;
}

/// Completion callback for callback-shaped fetch functions
pub type FetchCallback = Box<dyn FnOnce(Result<Bytes>) + Send>;

fn default_license_headers() -> HeaderOverrides {
    HeaderOverrides::from([(
        "Content-Type".to_string(),
        Some("application/octet-stream".to_string()),
    )])
}

/// Default license source: POST the message to a license server
#[derive(Clone)]
pub struct HttpLicense {
    url: String,
    license_headers: HeaderOverrides,
    envelope: Option<Arc<dyn EnvelopeParser>>,
}

impl HttpLicense {
    pub fn new(url: impl Into<String>, license_headers: HeaderOverrides) -> Self {
        Self {
            url: url.into(),
            license_headers,
            envelope: None,
        }
    }

    /// Post the envelope's challenge and add its headers last
    pub fn with_envelope(mut self, envelope: Option<Arc<dyn EnvelopeParser>>) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LicenseSource for HttpLicense {
    async fn fetch_license(&self, ctx: &FetchContext<'_>, request: LicenseRequest) -> Result<Bytes> {
        let (envelope_headers, body) = match &self.envelope {
            Some(parser) => {
                let envelope = parser
                    .parse(&request.message)
                    .map_err(|e| Error::InvalidEnvelope(e.to_string()))?;
                (envelope.headers, envelope.challenge)
            }
            None => (HeaderOverrides::new(), request.message),
        };

        let headers = merge_headers([
            &default_license_headers(),
            &ctx.options.eme_headers,
            &self.license_headers,
            &envelope_headers,
        ]);

        debug!(url = %self.url, key_system = ctx.key_system, bytes = body.len(), "Requesting license");

        let response = ctx
            .transport
            .send(HttpRequest {
                uri: self.url.clone(),
                method: HttpMethod::Post,
                headers,
                body: Some(body),
                request_type: RequestType::License,
                key_system: ctx.key_system.to_string(),
            })
            .await?;

        handle_response(response)
    }
}

/// Default certificate source: GET the certificate URI
#[derive(Debug, Clone)]
pub struct HttpCertificate {
    uri: String,
    certificate_headers: HeaderOverrides,
}

impl HttpCertificate {
    pub fn new(uri: impl Into<String>, certificate_headers: HeaderOverrides) -> Self {
        Self {
            uri: uri.into(),
            certificate_headers,
        }
    }
}

#[async_trait]
impl CertificateSource for HttpCertificate {
    async fn fetch_certificate(&self, ctx: &FetchContext<'_>) -> Result<Bytes> {
        let headers = merge_headers([&ctx.options.eme_headers, &self.certificate_headers]);

        debug!(uri = %self.uri, key_system = ctx.key_system, "Requesting server certificate");

        let response = ctx
            .transport
            .send(HttpRequest {
                uri: self.uri.clone(),
                method: HttpMethod::Get,
                headers,
                body: None,
                request_type: RequestType::Certificate,
                key_system: ctx.key_system.to_string(),
            })
            .await?;

        handle_response(response)
    }
}

struct CallbackLicense<F>(F);

#[async_trait]
impl<F> LicenseSource for CallbackLicense<F>
where
    F: Fn(&EmeOptions, LicenseRequest, FetchCallback) + Send + Sync + 'static,
{
    async fn fetch_license(&self, ctx: &FetchContext<'_>, request: LicenseRequest) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        (self.0)(
            ctx.options,
            request,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await
            .map_err(|_| Error::license("license callback dropped without a result"))?
    }
}

/// Adapt a callback-shaped license function
pub fn license_fn<F>(f: F) -> Arc<dyn LicenseSource>
where
    F: Fn(&EmeOptions, LicenseRequest, FetchCallback) + Send + Sync + 'static,
{
    Arc::new(CallbackLicense(f))
}

struct CallbackCertificate<F>(F);

#[async_trait]
impl<F> CertificateSource for CallbackCertificate<F>
where
    F: Fn(&EmeOptions, FetchCallback) + Send + Sync + 'static,
{
    async fn fetch_certificate(&self, ctx: &FetchContext<'_>) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        (self.0)(
            ctx.options,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.map_err(|_| {
            Error::CertificateRequest("certificate callback dropped without a result".to_string())
        })?
    }
}

/// Adapt a callback-shaped certificate function
pub fn certificate_fn<F>(f: F) -> Arc<dyn CertificateSource>
where
    F: Fn(&EmeOptions, FetchCallback) + Send + Sync + 'static,
{
    Arc::new(CallbackCertificate(f))
}

struct FnContentId<F>(F);

impl<F> ContentIdResolver for FnContentId<F>
where
    F: Fn(&EmeOptions, &[u8]) -> Option<String> + Send + Sync,
{
    fn content_id(&self, options: &EmeOptions, init_data: &[u8]) -> Option<String> {
        (self.0)(options, init_data)
    }
}

/// Adapt a plain function as a content id resolver
pub fn content_id_fn<F>(f: F) -> Arc<dyn ContentIdResolver>
where
    F: Fn(&EmeOptions, &[u8]) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(FnContentId(f))
}

/// Uniform license call used by sessions
#[derive(Clone)]
pub struct LicenseExchange {
    key_system: String,
    family: KeySystemFamily,
    source: Arc<dyn LicenseSource>,
    transport: Arc<dyn HttpTransport>,
    events: EventBus,
}

impl LicenseExchange {
    pub fn new(options: &KeySystemOptions, transport: Arc<dyn HttpTransport>, events: EventBus) -> Self {
        Self {
            key_system: options.key_system().to_string(),
            family: options.family(),
            source: options.license_source().clone(),
            transport,
            events,
        }
    }

    pub fn key_system(&self) -> &str {
        &self.key_system
    }

    /// Fetch a license for `message`.
    ///
    /// `licenserequestattempted` is published once the source has answered,
    /// whatever the outcome, unless the message never left as a request
    /// because its envelope could not be parsed.
    pub async fn fetch_license(
        &self,
        options: &EmeOptions,
        message: Bytes,
        content_id: Option<&str>,
    ) -> Result<Bytes> {
        let request = LicenseRequest {
            message,
            content_id: if self.family.passes_content_id() {
                content_id.map(str::to_string)
            } else {
                None
            },
        };
        let ctx = FetchContext {
            options,
            transport: self.transport.as_ref(),
            key_system: &self.key_system,
        };

        let result = self.source.fetch_license(&ctx, request).await;
        if !matches!(result, Err(Error::InvalidEnvelope(_))) {
            self.events.publish(EmeEvent::LicenseRequestAttempted {
                key_system: self.key_system.clone(),
            });
        }
        result
    }
}
