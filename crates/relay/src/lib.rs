//! Relay core: turn an inbound message into an upload request, then stream
//! the referenced media from its source into the Bunny storage zone.
//!
//! Control flow: [`InboundEvent`] → [`InputResolver`] → [`RelayPipeline`] →
//! [`Uploaded`] or [`TransferError`].

pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod service;

pub use {
    error::{Error, Result, Stage, TransferError},
    pipeline::{DestinationConfig, RelayPipeline, TransferSettings, Uploaded},
    resolver::{
        AttachmentLocator, FormatError, FormatIssue, InboundEvent, InputResolver, MediaAttachment,
        MediaRules, UploadRequest,
    },
    retry::RetryPolicy,
    service::RelayService,
};
