//! Key container provisioning
//!
//! Runs at most once per `VideoContext`:
//!
//! ```text
//!   Unprovisioned ─▶ certificate ─▶ create_media_keys ─▶ Ready ─▶ drain queue ─▶ attach
//!                        │                 │
//!                        └──── Failed ◀────┘   (queued requests are dropped)
//! ```
//!
//! Setting the server certificate and attaching the container to the video
//! element are reported when they fail but do not stop queued sessions.

use crate::config::{EmeOptions, KeySystemOptions};
use crate::context::{Services, VideoContext};
use crate::error::{ErrorType, MEDIA_KEYS_FALLBACK_MESSAGE};
use crate::events::EmeEvent;
use crate::license::FetchContext;
use crate::negotiate::NegotiationResult;
use crate::session::{start_session, wait_outcome};
use crate::{Error, Result};
use tracing::{debug, info, instrument, warn};

/// Provision the context unless that already started.
///
/// Re-entry while provisioning is in flight, or after it finished, is a no-op.
pub async fn provision(
    context: &VideoContext,
    negotiation: &NegotiationResult,
    key_system: &KeySystemOptions,
    options: &EmeOptions,
    services: &Services,
) -> Result<()> {
    if !context.begin_provisioning().await {
        debug!(key_system = %negotiation.key_system, "Provisioning already started");
        return Ok(());
    }
    run_pipeline(context, negotiation, key_system, options, services).await
}

/// Run the pipeline for a context already marked in progress
#[instrument(skip_all, fields(key_system = %negotiation.key_system))]
pub(crate) async fn run_pipeline(
    context: &VideoContext,
    negotiation: &NegotiationResult,
    key_system: &KeySystemOptions,
    options: &EmeOptions,
    services: &Services,
) -> Result<()> {
    let id = negotiation.key_system.as_str();
    context.set_key_system(id).await;

    let certificate = match key_system.certificate_source() {
        Some(source) => {
            let ctx = FetchContext {
                options,
                transport: services.transport.as_ref(),
                key_system: id,
            };
            match source.fetch_certificate(&ctx).await {
                Ok(certificate) => Some(certificate),
                Err(e) => {
                    services.report(&e, ErrorType::FailedToRequestCertificate, Some(id));
                    let dropped = context.fail_provisioning(e.to_string()).await;
                    warn!(dropped, "Certificate request failed, queued sessions dropped");
                    return Err(e);
                }
            }
        }
        None => None,
    };

    let media_keys = match negotiation.access.create_media_keys().await {
        Ok(media_keys) => media_keys,
        Err(e) => {
            let message = if e.message.is_empty() {
                MEDIA_KEYS_FALLBACK_MESSAGE.to_string()
            } else {
                e.message.clone()
            };
            let err = Error::Provisioning(message.clone());
            services.report(&err, ErrorType::FailedToCreateMediaKeys, Some(id));
            let dropped = context.fail_provisioning(message).await;
            warn!(dropped, "Key container creation failed, queued sessions dropped");
            return Err(err);
        }
    };

    services.events.publish(EmeEvent::KeySystemAccessComplete {
        key_system: id.to_string(),
    });

    if let Some(certificate) = certificate {
        if let Err(e) = media_keys.set_server_certificate(certificate).await {
            services.report(&e.into(), ErrorType::FailedToSetServerCertificate, Some(id));
        }
    }

    let queued = context.finish_provisioning(media_keys.clone()).await;
    let outcomes: Vec<_> = queued
        .into_iter()
        .filter_map(|request| start_session(context, &media_keys, request))
        .collect();

    if let Err(e) = context.video().set_media_keys(media_keys).await {
        services.report(&e.into(), ErrorType::FailedToAttachMediaKeys, Some(id));
    }

    info!(sessions = outcomes.len(), "Provisioning complete");

    let mut first_error = None;
    for outcome in outcomes {
        if let Err(e) = wait_outcome(outcome).await {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
