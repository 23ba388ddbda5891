use crate::context::RequestContext;
use crate::filter::registry::FilterChain;
use crate::filter::{BodyStream, FilterError};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use edgehub_core::sync::cancel::CancelToken;
use futures::{StreamExt, TryStreamExt};
use http::header::{
    CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};
use typed_builder::TypedBuilder;
use url::Url;

#[derive(Clone, TypedBuilder)]
pub struct ProxyState {
    client: reqwest::Client,
    upstream: Url,
    chain: FilterChain,
    cancel: CancelToken,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream url: {0}")]
    UpstreamUrl(#[source] url::ParseError),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    #[error("response filter failed: {0}")]
    Filter(#[from] FilterError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        error!("Proxy error: {self}");
        (StatusCode::BAD_GATEWAY, self.to_string()).into_response()
    }
}

/// Forwards a request to the upstream API server and pipes the response
/// back, routing the body through a response filter when one approves the
/// request. Requests no filter claims are proxied byte-for-byte.
pub async fn forward(
    State(state): State<Arc<ProxyState>>,
    req: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();

    let ctx = RequestContext::from_request(
        &parts.method,
        parts.uri.path(),
        parts.uri.query(),
        &parts.headers,
    );

    let url = upstream_url(&state.upstream, &parts.uri)?;

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);

    let builder = state
        .client
        .request(parts.method.clone(), url)
        .headers(headers);
    let builder = if parts.method == Method::GET || parts.method == Method::HEAD {
        builder
    } else {
        builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
    };

    let upstream_response = builder.send().await.map_err(ProxyError::Upstream)?;

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let body_stream: BodyStream = upstream_response
        .bytes_stream()
        .map_err(FilterError::upstream)
        .boxed();

    let selected = ctx
        .as_ref()
        .and_then(|ctx| state.chain.select(ctx).map(|filter| (ctx, filter)));

    let body_stream = match selected {
        Some((ctx, filter)) if status.is_success() => {
            debug!(
                "Applying response filter '{}' to {} {} for '{}'",
                filter.name(),
                ctx.verb(),
                ctx.resource(),
                ctx.component(),
            );
            // The rewrite changes the body length.
            response_headers.remove(CONTENT_LENGTH);
            filter.filter(ctx, body_stream, state.cancel.clone())?
        }
        _ => body_stream,
    };

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn upstream_url(base: &Url, uri: &Uri) -> Result<Url, ProxyError> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    base.join(path_and_query).map_err(ProxyError::UpstreamUrl)
}

/// Hop-by-hop headers describe the client-to-proxy connection and must not
/// be forwarded on either leg.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();
    for name in connection_listed {
        headers.remove(name);
    }

    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove(HeaderName::from_static("keep-alive"));
    headers.remove(HeaderName::from_static("proxy-connection"));
}
