//! Entry point for "needs a key" signals
//!
//! The host calls `EmeController::handle_encrypted` whenever the platform
//! reports encrypted media. The controller normalizes the configured key
//! systems, negotiates one, deduplicates the payload against the context's
//! session records and then either runs provisioning or hands the request to
//! the session manager.

use crate::config::EmeOptions;
use crate::context::{Admission, Services, VideoContext};
use crate::error::ErrorType;
use crate::events::EventBus;
use crate::license::LicenseExchange;
use crate::negotiate::negotiate;
use crate::platform::KeySystemPlatform;
use crate::provision::run_pipeline;
use crate::session::{start_session, wait_outcome, SessionRequest};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Drives key acquisition for one set of options
#[derive(Clone)]
pub struct EmeController {
    options: Arc<EmeOptions>,
    platform: Arc<dyn KeySystemPlatform>,
    services: Services,
}

impl EmeController {
    pub fn new(options: EmeOptions, platform: Arc<dyn KeySystemPlatform>, services: Services) -> Self {
        Self {
            options: Arc::new(options),
            platform,
            services,
        }
    }

    pub fn options(&self) -> &EmeOptions {
        &self.options
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    /// Handle an encrypted media signal for `context`.
    ///
    /// The first caller for a context runs provisioning and waits for it
    /// together with every session queued meanwhile. Later callers queue or
    /// start their session without re-entering the pipeline.
    #[instrument(skip_all, fields(init_data_type = %init_data_type, bytes = init_data.len()))]
    pub async fn handle_encrypted(
        &self,
        context: &VideoContext,
        init_data_type: &str,
        init_data: Bytes,
    ) -> Result<()> {
        let source = self.services.player.current_source();
        context.sync_source(source.as_deref()).await;

        if self.options.key_systems.is_empty() {
            debug!("No key systems configured, ignoring encrypted media");
            return Ok(());
        }

        let candidates = self.options.normalize_key_systems()?;

        let negotiation = match negotiate(self.platform.as_ref(), &candidates).await {
            Ok(negotiation) => negotiation,
            Err(e) => {
                self.services
                    .report(&e, ErrorType::FailedToRequestMediaKeySystemAccess, None);
                return Err(e);
            }
        };

        let key_system = candidates
            .iter()
            .find(|(id, _)| *id == negotiation.key_system)
            .map(|(_, options)| options)
            .ok_or_else(|| Error::Internal(format!("{} is not a candidate", negotiation.key_system)))?;

        let init_data = key_system.pssh().cloned().unwrap_or(init_data);
        if init_data.is_empty() {
            debug!("Empty init data, nothing to do");
            return Ok(());
        }
        if !context.add_session(init_data.clone()).await {
            debug!("Session already exists for init data");
            return Ok(());
        }

        let content_id = key_system
            .content_id_resolver()
            .and_then(|resolver| resolver.content_id(&self.options, &init_data));

        let request = SessionRequest {
            init_data_type: init_data_type.to_string(),
            init_data: init_data.clone(),
            options: self.options.clone(),
            exchange: LicenseExchange::new(
                key_system,
                self.services.transport.clone(),
                self.services.events.clone(),
            ),
            content_id,
            key_system: negotiation.key_system.clone(),
            services: self.services.clone(),
        };

        match context.admit(request, true).await {
            Admission::Provision => {
                run_pipeline(context, &negotiation, key_system, &self.options, &self.services).await
            }
            Admission::Queued => Ok(()),
            Admission::Ready(media_keys, request) => match start_session(context, &media_keys, request) {
                Some(outcome) => wait_outcome(outcome).await,
                None => Ok(()),
            },
            Admission::Failed(message) => {
                context.remove_session(&init_data).await;
                Err(Error::Provisioning(message))
            }
        }
    }
}
