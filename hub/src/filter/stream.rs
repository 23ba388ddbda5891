use super::envelope::ObjectTransformer;
use super::{BodyStream, FilterError};
use crate::serializer::Serializer;
use bytes::{Bytes, BytesMut};
use edgehub_core::sync::cancel::CancelToken;
use futures::StreamExt;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// How a response body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// One envelope object enumerating items (`list`).
    Collection,
    /// Newline-delimited event frames (`watch`).
    EventStream,
}

/// Drives a response body through a transformer, yielding the rewritten
/// stream. The driver owns the framing; the transformer only ever sees one
/// decoded envelope at a time. Cancellation is checked between frames:
/// frames already emitted stay emitted, and the upstream source is released
/// promptly.
pub fn filtered_body(
    shape: ResponseShape,
    upstream: BodyStream,
    transformer: Arc<dyn ObjectTransformer>,
    serializer: Serializer,
    filter_name: &'static str,
    cancel: CancelToken,
) -> BodyStream {
    match shape {
        ResponseShape::Collection => {
            collection_body(upstream, transformer, serializer, filter_name, cancel)
        }
        ResponseShape::EventStream => {
            event_stream_body(upstream, transformer, serializer, filter_name, cancel)
        }
    }
}

/// Aggregates the whole envelope, transforms it, and re-encodes it exactly
/// once. A `list` response is a single object; there is no frame boundary to
/// flush at before it is complete.
fn collection_body(
    mut upstream: BodyStream,
    transformer: Arc<dyn ObjectTransformer>,
    serializer: Serializer,
    filter_name: &'static str,
    cancel: CancelToken,
) -> BodyStream {
    stream::once(async move {
        let mut buffer = BytesMut::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Cancelled while '{filter_name}' was reading a collection response");
                    return None;
                }
                chunk = upstream.next() => match chunk {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(err)) => return Some(Err(err)),
                    None => break,
                }
            }
        }

        let result = serializer.decode_collection(&buffer).and_then(|mut envelope| {
            transformer.transform(&mut envelope)?;
            serializer.encode(&envelope)
        });
        Some(result)
    })
    .filter_map(std::future::ready)
    .boxed()
}

struct EventStreamState {
    upstream: BodyStream,
    transformer: Arc<dyn ObjectTransformer>,
    serializer: Serializer,
    filter_name: &'static str,
    cancel: CancelToken,
    buffer: BytesMut,
    ready: VecDeque<Bytes>,
    done: bool,
}

impl EventStreamState {
    /// Decodes, transforms, and re-encodes one frame, restoring the newline
    /// terminator.
    fn process_frame(&self, line: &[u8]) -> Result<Bytes, FilterError> {
        let mut envelope = self.serializer.decode_event(line)?;
        self.transformer.transform(&mut envelope)?;
        let encoded = self.serializer.encode(&envelope)?;

        let mut frame = BytesMut::with_capacity(encoded.len() + 1);
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(b"\n");
        Ok(frame.freeze())
    }

    /// Processes every complete frame sitting in the buffer, in order.
    fn drain_complete_frames(&mut self) -> Result<(), FilterError> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let line = &raw[..raw.len() - 1];
            if line.is_empty() {
                continue;
            }
            let frame = self.process_frame(line)?;
            trace!("'{}' emitting a {} byte watch frame", self.filter_name, frame.len());
            self.ready.push_back(frame);
        }
        Ok(())
    }
}

/// Transforms a watch stream one frame at a time: decode one, transform one,
/// emit one, in input order, with a working set bounded by a single frame.
/// A frame that fails to decode surfaces as a stream error; frames flushed
/// before it are unaffected, and the stream terminates afterwards so the
/// client observes a broken stream rather than silently corrupted data.
fn event_stream_body(
    upstream: BodyStream,
    transformer: Arc<dyn ObjectTransformer>,
    serializer: Serializer,
    filter_name: &'static str,
    cancel: CancelToken,
) -> BodyStream {
    let state = EventStreamState {
        upstream,
        transformer,
        serializer,
        filter_name,
        cancel,
        buffer: BytesMut::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }

            tokio::select! {
                () = state.cancel.cancelled() => {
                    debug!("Cancelled '{}' watch pipeline, releasing upstream", state.filter_name);
                    state.done = true;
                }
                chunk = state.upstream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        state.buffer.extend_from_slice(&bytes);
                        if let Err(err) = state.drain_complete_frames() {
                            state.done = true;
                            return Some((Err(err), state));
                        }
                    }
                    Some(Err(err)) => {
                        state.done = true;
                        return Some((Err(err), state));
                    }
                    None => {
                        state.done = true;
                        // The source may end without a final newline; what
                        // remains is either one last frame or a truncation.
                        if !state.buffer.is_empty() {
                            let rest = state.buffer.split_off(0);
                            match state.process_frame(&rest) {
                                Ok(frame) => state.ready.push_back(frame),
                                Err(err) => return Some((Err(err), state)),
                            }
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::envelope::ObjectEnvelope;
    use crate::filter::master_service::MasterServiceRewriter;
    use edgehub_core::net::{HostPort, Hostname, Port};
    use edgehub_core::sync::cancel::cancellation;
    use k8s_openapi::List;
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::WatchEvent;

    fn service(namespace: &str, name: &str, cluster_ip: &str, port_name: &str, port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some(cluster_ip.to_string()),
                ports: Some(vec![ServicePort {
                    name: Some(port_name.to_string()),
                    port,
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    fn master_service() -> Service {
        service("default", "kubernetes", "10.0.0.1", "https", 443)
    }

    fn rewriter() -> Arc<MasterServiceRewriter> {
        Arc::new(MasterServiceRewriter::new(HostPort::new(
            Hostname::new("192.168.1.1"),
            Port::new(6443),
        )))
    }

    fn body_of(chunks: Vec<Bytes>) -> BodyStream {
        stream::iter(chunks.into_iter().map(Ok)).boxed()
    }

    fn chunked(data: &str, at: usize) -> Vec<Bytes> {
        let (a, b) = data.as_bytes().split_at(at);
        vec![Bytes::copy_from_slice(a), Bytes::copy_from_slice(b)]
    }

    fn event_line(event: &WatchEvent<Service>) -> String {
        let mut line = serde_json::to_string(event).unwrap();
        line.push('\n');
        line
    }

    fn addr_of(service: &Service) -> (Option<String>, Option<i32>) {
        let spec = service.spec.as_ref().unwrap();
        (
            spec.cluster_ip.clone(),
            spec.ports.as_ref().and_then(|p| p.first()).map(|p| p.port),
        )
    }

    async fn collect(mut body: BodyStream) -> Vec<Result<Bytes, FilterError>> {
        let mut out = Vec::new();
        while let Some(item) = body.next().await {
            out.push(item);
        }
        out
    }

    fn run_watch(chunks: Vec<Bytes>) -> BodyStream {
        let (handle, token) = cancellation("test");
        // Leak the handle so dropping it does not cancel the pipeline.
        std::mem::forget(handle);
        filtered_body(
            ResponseShape::EventStream,
            body_of(chunks),
            rewriter(),
            Serializer::json(),
            "test",
            token,
        )
    }

    #[tokio::test]
    async fn test_collection_rewrites_across_chunk_boundaries() {
        let list = List {
            items: vec![
                master_service(),
                service("kube-system", "dns", "10.0.0.2", "dns", 53),
            ],
            metadata: Default::default(),
        };
        let encoded = serde_json::to_string(&list).unwrap();

        let (handle, token) = cancellation("test");
        std::mem::forget(handle);
        let out = collect(filtered_body(
            ResponseShape::Collection,
            body_of(chunked(&encoded, encoded.len() / 2)),
            rewriter(),
            Serializer::json(),
            "test",
            token,
        ))
        .await;

        assert_eq!(out.len(), 1);
        let rewritten: List<Service> =
            serde_json::from_slice(out[0].as_ref().unwrap()).unwrap();
        assert_eq!(
            addr_of(&rewritten.items[0]),
            (Some("192.168.1.1".to_string()), Some(6443))
        );
        assert_eq!(
            addr_of(&rewritten.items[1]),
            (Some("10.0.0.2".to_string()), Some(53))
        );
    }

    #[tokio::test]
    async fn test_collection_cancellation_emits_nothing() {
        let pending = stream::pending();
        let first = stream::iter(vec![Ok(Bytes::from_static(b"{\"items\":["))]);
        let upstream = first.chain(pending).boxed();

        let (handle, token) = cancellation("test");
        let mut body = filtered_body(
            ResponseShape::Collection,
            upstream,
            rewriter(),
            Serializer::json(),
            "test",
            token,
        );

        handle.cancel();
        assert!(body.next().await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_watch_preserves_order_and_count() {
        let events = [
            WatchEvent::Added(master_service()),
            WatchEvent::Modified(service("kube-system", "dns", "10.0.0.2", "dns", 53)),
            WatchEvent::Deleted(master_service()),
        ];
        let input: String = events.iter().map(event_line).collect();

        let out = collect(run_watch(vec![Bytes::from(input)])).await;
        assert_eq!(out.len(), 3);

        let decoded: Vec<WatchEvent<Service>> = out
            .into_iter()
            .map(|frame| serde_json::from_slice(&frame.unwrap()).unwrap())
            .collect();

        let WatchEvent::Added(added) = &decoded[0] else {
            panic!("expected ADDED first");
        };
        assert_eq!(
            addr_of(added),
            (Some("192.168.1.1".to_string()), Some(6443))
        );

        let WatchEvent::Modified(modified) = &decoded[1] else {
            panic!("expected MODIFIED second");
        };
        assert_eq!(
            addr_of(modified),
            (Some("10.0.0.2".to_string()), Some(53))
        );

        let WatchEvent::Deleted(deleted) = &decoded[2] else {
            panic!("expected DELETED third");
        };
        assert_eq!(addr_of(deleted), (Some("10.0.0.1".to_string()), Some(443)));
    }

    #[tokio::test]
    async fn test_watch_frames_split_across_chunks() {
        let line = event_line(&WatchEvent::Added(master_service()));
        let chunks = chunked(&line, line.len() / 3);

        let out = collect(run_watch(chunks)).await;
        assert_eq!(out.len(), 1);

        let event: WatchEvent<Service> =
            serde_json::from_slice(out[0].as_ref().unwrap()).unwrap();
        let WatchEvent::Added(added) = event else {
            panic!("expected an ADDED event");
        };
        assert_eq!(
            addr_of(&added),
            (Some("192.168.1.1".to_string()), Some(6443))
        );
    }

    #[tokio::test]
    async fn test_watch_frames_are_newline_terminated_and_unbatched() {
        let input = event_line(&WatchEvent::Added(master_service()))
            + &event_line(&WatchEvent::Deleted(master_service()));

        let out = collect(run_watch(vec![Bytes::from(input)])).await;
        assert_eq!(out.len(), 2);
        for frame in out {
            let frame = frame.unwrap();
            assert_eq!(frame.last(), Some(&b'\n'));
            // One JSON value per frame.
            assert_eq!(frame.iter().filter(|&&b| b == b'\n').count(), 1);
        }
    }

    #[tokio::test]
    async fn test_watch_blank_lines_are_tolerated() {
        let input = format!("\n{}\n", event_line(&WatchEvent::Added(master_service())).trim_end());
        let out = collect(run_watch(vec![Bytes::from(input)])).await;
        assert_eq!(out.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_watch_decode_error_surfaces_after_flushed_frames() {
        let input = event_line(&WatchEvent::Added(master_service())) + "not json\n";

        let out = collect(run_watch(vec![Bytes::from(input)])).await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(
            out[1],
            Err(FilterError::Decode {
                shape: "watch event",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_watch_truncated_final_frame_is_an_error() {
        let line = event_line(&WatchEvent::Added(master_service()));
        let truncated = &line[..line.len() / 2];

        let out = collect(run_watch(vec![Bytes::copy_from_slice(
            truncated.as_bytes(),
        )]))
        .await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(FilterError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_watch_final_frame_without_newline_is_processed() {
        let line = event_line(&WatchEvent::Added(master_service()));
        let unterminated = line.trim_end().to_string();

        let out = collect(run_watch(vec![Bytes::from(unterminated)])).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
    }

    #[tokio::test]
    async fn test_watch_cancellation_stops_between_frames() {
        let line = event_line(&WatchEvent::Added(master_service()));
        let first = stream::iter(vec![Ok(Bytes::from(line))]);
        let upstream = first.chain(stream::pending()).boxed();

        let (handle, token) = cancellation("test");
        let mut body = filtered_body(
            ResponseShape::EventStream,
            upstream,
            rewriter(),
            Serializer::json(),
            "test",
            token,
        );

        // The frame that was already available is flushed.
        assert!(body.next().await.unwrap().is_ok());

        // After cancellation the pipeline stops reading the (pending)
        // upstream and ends.
        handle.cancel();
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_upstream_error_is_surfaced() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from(event_line(&WatchEvent::Added(master_service())))),
            Err(FilterError::upstream("connection reset")),
        ])
        .boxed();

        let (handle, token) = cancellation("test");
        std::mem::forget(handle);
        let out = collect(filtered_body(
            ResponseShape::EventStream,
            upstream,
            rewriter(),
            Serializer::json(),
            "test",
            token,
        ))
        .await;

        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(FilterError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_passthrough_objects_round_trip_unchanged() {
        let other = service("kube-system", "dns", "10.0.0.2", "dns", 53);
        let mut envelope = ObjectEnvelope::Collection(List {
            items: vec![other.clone()],
            metadata: Default::default(),
        });
        rewriter().transform(&mut envelope).unwrap();

        let encoded = Serializer::json().encode(&envelope).unwrap();
        let decoded: List<Service> = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            serde_json::to_value(&decoded.items[0]).unwrap(),
            serde_json::to_value(&other).unwrap()
        );
    }
}
