pub mod approver;
pub mod envelope;
pub mod master_service;
pub mod registry;
pub mod stream;

use crate::context::{RequestContext, Verb};
use bytes::Bytes;
use edgehub_core::net::AddrParseError;
use edgehub_core::sync::cancel::CancelToken;
use futures::stream::BoxStream;
use thiserror::Error;

/// A response body as it flows through the proxy.
pub type BodyStream = BoxStream<'static, Result<Bytes, FilterError>>;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid master service address: {0}")]
    Address(#[from] AddrParseError),

    #[error("master service address is already configured")]
    AlreadyConfigured,

    #[error("master service address is not configured")]
    AddressNotConfigured,

    #[error("filter '{0}' is already registered")]
    DuplicateFilter(&'static str),

    #[error("failed to decode {shape} frame: {source}")]
    Decode {
        shape: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode rewritten object: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("upstream body failed: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FilterError {
    pub fn upstream<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Upstream(err.into())
    }
}

/// A response-rewriting plugin.
///
/// `approve` is the authorization gate: it is pure, holds no mutable state,
/// and decides whether this filter applies to a request at all. A rejection
/// is not an error, it means "leave this response alone". `filter` replaces
/// the response body with a rewritten stream; it is only invoked for
/// requests the gate approved.
pub trait ResponseFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn approve(&self, component: &str, resource: &str, verb: Verb) -> bool;

    fn filter(
        &self,
        ctx: &RequestContext,
        body: BodyStream,
        cancel: CancelToken,
    ) -> Result<BodyStream, FilterError>;
}
