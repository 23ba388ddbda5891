use super::approver::Approver;
use super::envelope::{ObjectEnvelope, ObjectTransformer};
use super::registry::FilterRegistry;
use super::stream::{ResponseShape, filtered_body};
use super::{BodyStream, FilterError, ResponseFilter};
use crate::context::{RequestContext, Verb};
use crate::serializer::SerializerResolver;
use edgehub_core::net::HostPort;
use edgehub_core::sync::cancel::CancelToken;
use k8s_openapi::api::core::v1::Service;
use kube::core::WatchEvent;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub const MASTER_SERVICE_FILTER_NAME: &str = "masterservice";

const MASTER_SERVICE_NAMESPACE: &str = "default";
const MASTER_SERVICE_NAME: &str = "kubernetes";
const MASTER_SERVICE_PORT_NAME: &str = "https";

/// Registers the master service filter. `addr` is the locally reachable
/// `host:port` substituted into the master service; it is validated when the
/// registry instantiates the filter, before any traffic is admitted.
pub fn register(registry: &mut FilterRegistry, addr: String) -> Result<(), FilterError> {
    registry.register(
        MASTER_SERVICE_FILTER_NAME,
        Box::new(move || {
            let filter = MasterServiceFilter::new();
            filter.set_master_address(&addr)?;
            Ok(Arc::new(filter) as Arc<dyn ResponseFilter>)
        }),
    )
}

/// Rewrites the `default/kubernetes` Service in `list`/`watch` responses so
/// the node agent discovers a locally reachable control-plane endpoint.
pub struct MasterServiceFilter {
    approver: Approver,
    address: OnceLock<HostPort>,
}

impl MasterServiceFilter {
    pub fn new() -> Self {
        Self {
            approver: Approver::new("kubelet", "services", [Verb::List, Verb::Watch]),
            address: OnceLock::new(),
        }
    }

    /// Stores the substitute address. Must be called once before the filter
    /// serves any request; a malformed address fails without touching any
    /// previously stored value.
    pub fn set_master_address(&self, addr: &str) -> Result<(), FilterError> {
        let parsed: HostPort = addr.parse()?;
        self.address
            .set(parsed)
            .map_err(|_| FilterError::AlreadyConfigured)
    }

    pub fn master_address(&self) -> Option<&HostPort> {
        self.address.get()
    }
}

impl Default for MasterServiceFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseFilter for MasterServiceFilter {
    fn name(&self) -> &'static str {
        MASTER_SERVICE_FILTER_NAME
    }

    fn approve(&self, component: &str, resource: &str, verb: Verb) -> bool {
        self.approver.approve(component, resource, verb)
    }

    fn filter(
        &self,
        ctx: &RequestContext,
        body: BodyStream,
        cancel: CancelToken,
    ) -> Result<BodyStream, FilterError> {
        let Some(serializer) = SerializerResolver::resolve(ctx.media_type()) else {
            warn!(
                "No serializer for media type '{}', passing response through unfiltered",
                ctx.media_type()
            );
            return Ok(body);
        };

        // Refuse to emit a rewritten object with an empty address.
        let target = self
            .address
            .get()
            .cloned()
            .ok_or(FilterError::AddressNotConfigured)?;

        let shape = match ctx.verb() {
            Verb::Watch => ResponseShape::EventStream,
            Verb::List => ResponseShape::Collection,
            verb => {
                debug!("Verb '{verb}' is not filtered, passing response through");
                return Ok(body);
            }
        };

        let rewriter = Arc::new(MasterServiceRewriter::new(target));
        Ok(filtered_body(
            shape,
            body,
            rewriter,
            serializer,
            MASTER_SERVICE_FILTER_NAME,
            cancel,
        ))
    }
}

/// Overwrites the master service's advertised address with the target:
/// `spec.clusterIP` becomes the target host and the port named `https`
/// becomes the target port. A deterministic overwrite, so applying it to an
/// already rewritten object changes nothing.
pub struct MasterServiceRewriter {
    target: HostPort,
}

impl MasterServiceRewriter {
    pub fn new(target: HostPort) -> Self {
        Self { target }
    }

    fn is_master_service(service: &Service) -> bool {
        service.metadata.namespace.as_deref() == Some(MASTER_SERVICE_NAMESPACE)
            && service.metadata.name.as_deref() == Some(MASTER_SERVICE_NAME)
    }

    fn rewrite(&self, service: &mut Service) {
        let Some(spec) = service.spec.as_mut() else {
            return;
        };

        spec.cluster_ip = Some(self.target.host().to_string());

        if let Some(ports) = spec.ports.as_mut() {
            for port in ports.iter_mut() {
                if port.name.as_deref() == Some(MASTER_SERVICE_PORT_NAME) {
                    port.port = i32::from(self.target.port().value());
                    break;
                }
            }
        }

        debug!("Rewrote master service address to {}", self.target);
    }
}

impl ObjectTransformer for MasterServiceRewriter {
    fn transform(&self, envelope: &mut ObjectEnvelope) -> Result<(), FilterError> {
        match envelope {
            ObjectEnvelope::Collection(list) => {
                for service in &mut list.items {
                    if Self::is_master_service(service) {
                        self.rewrite(service);
                    }
                }
            }
            ObjectEnvelope::Event(WatchEvent::Added(service) | WatchEvent::Modified(service)) => {
                if Self::is_master_service(service) {
                    self.rewrite(service);
                }
            }
            // Deletions, bookmarks, and error frames carry no address worth
            // rewriting.
            ObjectEnvelope::Event(_) => {}
        }
        Ok(())
    }
}
