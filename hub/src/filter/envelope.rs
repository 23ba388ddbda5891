use super::FilterError;
use k8s_openapi::List;
use k8s_openapi::api::core::v1::Service;
use kube::core::WatchEvent;

/// The decoded unit a transformer operates on, regardless of how it was
/// framed on the wire: a `list` response is one collection envelope, a
/// `watch` response is a sequence of independently framed events. Collapsing
/// both shapes here lets the rewrite logic be written once.
#[derive(Debug)]
pub enum ObjectEnvelope {
    Collection(List<Service>),
    Event(WatchEvent<Service>),
}

/// Rewrites one decoded envelope in place. Implementations must be
/// deterministic overwrites so that transforming an already-transformed
/// envelope is a no-op.
pub trait ObjectTransformer: Send + Sync {
    fn transform(&self, envelope: &mut ObjectEnvelope) -> Result<(), FilterError>;
}
