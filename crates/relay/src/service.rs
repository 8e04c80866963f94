use {bunnydrop_config::BunnydropConfig, tracing::debug};

use crate::{
    error::Result,
    pipeline::{DestinationConfig, RelayPipeline, TransferSettings, Uploaded},
    resolver::{AttachmentLocator, InboundEvent, InputResolver, MediaRules, UploadRequest},
};

/// Resolver plus pipeline: everything a bot handler needs to serve one message.
#[derive(Debug, Clone)]
pub struct RelayService {
    resolver: InputResolver,
    pipeline: RelayPipeline,
}

impl RelayService {
    #[must_use]
    pub fn new(resolver: InputResolver, pipeline: RelayPipeline) -> Self {
        Self { resolver, pipeline }
    }

    /// Build from a validated configuration.
    pub fn from_config(config: &BunnydropConfig) -> Result<Self> {
        let destination = DestinationConfig::from_config(config)?;
        let pipeline = RelayPipeline::new(destination, TransferSettings::from(config))?;
        let resolver = InputResolver::new(MediaRules::from(&config.media));
        Ok(Self::new(resolver, pipeline))
    }

    #[must_use]
    pub fn resolver(&self) -> &InputResolver {
        &self.resolver
    }

    #[must_use]
    pub fn pipeline(&self) -> &RelayPipeline {
        &self.pipeline
    }

    /// Resolve an event into an upload request without transferring anything.
    ///
    /// Attachments need a download URL from the platform; failing to get one
    /// is a fetch-stage failure.
    pub async fn resolve(
        &self,
        event: &InboundEvent,
        locator: &dyn AttachmentLocator,
    ) -> Result<UploadRequest> {
        match event {
            InboundEvent::TextLink(text) => Ok(self.resolver.resolve_text(text)?),
            InboundEvent::MediaAttachment(attachment) => {
                let source = locator.download_url(attachment).await?;
                Ok(self.resolver.resolve_attachment(attachment, source)?)
            },
        }
    }

    /// Resolve and relay one event.
    pub async fn handle(
        &self,
        event: &InboundEvent,
        locator: &dyn AttachmentLocator,
    ) -> Result<Uploaded> {
        let request = self.resolve(event, locator).await?;
        debug!(filename = request.filename(), "input resolved");
        Ok(self.pipeline.transfer(&request).await?)
    }
}
