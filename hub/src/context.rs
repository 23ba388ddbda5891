use getset::{CopyGetters, Getters};
use http::header::{ACCEPT, USER_AGENT};
use http::{HeaderMap, Method};
use strum::{Display, EnumString};
use typed_builder::TypedBuilder;

pub const DEFAULT_MEDIA_TYPE: &str = "application/json";

/// The API verb implied by a request, matching the apiserver's vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Get,
    List,
    Watch,
    Create,
    Update,
    Patch,
    Delete,
    DeleteCollection,
}

/// Read-only, per-request view of who is asking for what. Derived from the
/// inbound request and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, TypedBuilder)]
pub struct RequestContext {
    /// Client component, the first token of the User-Agent.
    #[getset(get = "pub")]
    #[builder(setter(into))]
    component: String,

    #[getset(get = "pub")]
    #[builder(setter(into))]
    resource: String,

    #[getset(get = "pub")]
    #[builder(default)]
    namespace: Option<String>,

    #[getset(get = "pub")]
    #[builder(default)]
    name: Option<String>,

    #[getset(get_copy = "pub")]
    verb: Verb,

    /// Negotiated wire format, from the Accept header.
    #[getset(get = "pub")]
    #[builder(default = DEFAULT_MEDIA_TYPE.to_string(), setter(into))]
    media_type: String,
}

impl RequestContext {
    /// Derives a context from request head data. Returns `None` for anything
    /// that does not look like a Kubernetes API request; such requests are
    /// proxied untouched.
    pub fn from_request(method: &Method, path: &str, query: Option<&str>, headers: &HeaderMap) -> Option<Self> {
        let component = headers
            .get(USER_AGENT)
            .and_then(|ua| ua.to_str().ok())
            .map(component_from_user_agent)?;

        let media_type = headers
            .get(ACCEPT)
            .and_then(|a| a.to_str().ok())
            .map_or(DEFAULT_MEDIA_TYPE, first_accept_item)
            .to_string();

        let info = parse_api_path(path)?;
        let watch = info.watch_prefix || query.is_some_and(has_watch_param);

        let verb = match (method.as_str(), watch, info.name.is_some()) {
            ("GET", true, _) => Verb::Watch,
            ("GET", false, true) => Verb::Get,
            ("GET", false, false) => Verb::List,
            ("POST", ..) => Verb::Create,
            ("PUT", ..) => Verb::Update,
            ("PATCH", ..) => Verb::Patch,
            ("DELETE", _, true) => Verb::Delete,
            ("DELETE", _, false) => Verb::DeleteCollection,
            _ => return None,
        };

        Some(
            Self::builder()
                .component(component)
                .resource(info.resource)
                .namespace(info.namespace)
                .name(info.name)
                .verb(verb)
                .media_type(media_type)
                .build(),
        )
    }
}

fn component_from_user_agent(user_agent: &str) -> String {
    user_agent
        .split('/')
        .next()
        .unwrap_or(user_agent)
        .to_string()
}

fn first_accept_item(accept: &str) -> &str {
    accept
        .split(',')
        .next()
        .unwrap_or(accept)
        .split(';')
        .next()
        .unwrap_or(accept)
        .trim()
}

fn has_watch_param(query: &str) -> bool {
    query.split('&').any(|param| {
        matches!(
            param.split_once('=').map_or((param, ""), |(k, v)| (k, v)),
            ("watch", "true" | "1" | "")
        )
    })
}

struct ApiPathInfo {
    resource: String,
    namespace: Option<String>,
    name: Option<String>,
    watch_prefix: bool,
}

/// Parses `/api/<version>/...` and `/apis/<group>/<version>/...` paths,
/// including the legacy `/watch/` prefix and `namespaces/<ns>` scoping.
fn parse_api_path(path: &str) -> Option<ApiPathInfo> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    match segments.next()? {
        "api" => {
            segments.next()?;
        }
        "apis" => {
            segments.next()?;
            segments.next()?;
        }
        _ => return None,
    }

    let mut rest: Vec<&str> = segments.collect();

    let watch_prefix = rest.first() == Some(&"watch");
    if watch_prefix {
        rest.remove(0);
    }

    // `namespaces/<ns>` scopes the resource that follows it; a two-segment
    // `namespaces/<ns>` tail is a request for the namespace object itself.
    let (namespace, scoped) = if rest.len() >= 3 && rest[0] == "namespaces" {
        (Some(rest[1].to_string()), &rest[2..])
    } else {
        (None, &rest[..])
    };

    let resource = (*scoped.first()?).to_string();
    let name = scoped.get(1).map(|s| (*s).to_string());

    Some(ApiPathInfo {
        resource,
        namespace,
        name,
        watch_prefix,
    })
}
