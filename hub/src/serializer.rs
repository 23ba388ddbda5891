use crate::filter::FilterError;
use crate::filter::envelope::ObjectEnvelope;
use bytes::Bytes;
use k8s_openapi::List;
use k8s_openapi::api::core::v1::Service;
use kube::core::WatchEvent;

pub const MEDIA_TYPE_JSON: &str = "application/json";
pub const MEDIA_TYPE_PROTOBUF: &str = "application/vnd.kubernetes.protobuf";

/// Maps a request's negotiated media type to a codec.
///
/// Only JSON can be transcoded; a protobuf (or otherwise unknown) response
/// resolves to `None` and the caller passes the body through untouched.
pub struct SerializerResolver;

impl SerializerResolver {
    pub fn resolve(media_type: &str) -> Option<Serializer> {
        match media_type {
            MEDIA_TYPE_JSON | "*/*" | "application/*" => Some(Serializer::json()),
            _ => None,
        }
    }
}

/// An encode/decode pair for service objects in one wire format.
#[derive(Debug, Clone, Copy)]
pub struct Serializer;

impl Serializer {
    pub fn json() -> Self {
        Self
    }

    /// Decodes a whole `list` response envelope.
    pub fn decode_collection(&self, data: &[u8]) -> Result<ObjectEnvelope, FilterError> {
        let list: List<Service> =
            serde_json::from_slice(data).map_err(|source| FilterError::Decode {
                shape: "list",
                source,
            })?;
        Ok(ObjectEnvelope::Collection(list))
    }

    /// Decodes one `watch` frame.
    pub fn decode_event(&self, frame: &[u8]) -> Result<ObjectEnvelope, FilterError> {
        let event: WatchEvent<Service> =
            serde_json::from_slice(frame).map_err(|source| FilterError::Decode {
                shape: "watch event",
                source,
            })?;
        Ok(ObjectEnvelope::Event(event))
    }

    pub fn encode(&self, envelope: &ObjectEnvelope) -> Result<Bytes, FilterError> {
        let encoded = match envelope {
            ObjectEnvelope::Collection(list) => serde_json::to_vec(list),
            ObjectEnvelope::Event(event) => serde_json::to_vec(event),
        }
        .map_err(FilterError::Encode)?;
        Ok(Bytes::from(encoded))
    }
}
