//! URL hook routing.
//!
//! [`UrlHook`]/[`UrlMapping`]/[`UrlResolver`] make up a standalone "which handler serves this
//! request" layer, independent from [`crate::server::App`]: a [`UrlResolver`] itself implements
//! `App`, so it can be handed straight to [`crate::server::Server::serve`], but nothing stops an
//! embedder from routing by hand instead.
use std::cmp::Ordering;
use std::sync::RwLock;

use http::{request::Parts, Request, Response, StatusCode};

use crate::Body;

/// A match predicate over a request's host and path, plus the specificity needed to give the
/// set of all hooks a total order.
///
/// `None` in `domain`/`port`/`path` matches anything. A non-specific domain also matches
/// subdomains of it; a non-specific path also matches anything nested under it.
#[derive(Debug, Clone, Default)]
pub struct UrlHook {
    domain: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    specific_domain: bool,
    specific_path: bool,
}

impl UrlHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches `domain` and, unless `specific` is set, any of its subdomains.
    pub fn domain(mut self, domain: impl Into<String>, specific: bool) -> Self {
        self.domain = Some(domain.into().to_ascii_lowercase());
        self.specific_domain = specific;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Matches `path` and, unless `specific` is set, anything nested under it. `path` must start
    /// with `/` and, other than the root, must not end with one.
    pub fn path(mut self, path: impl Into<String>, specific: bool) -> Self {
        self.path = Some(path.into());
        self.specific_path = specific;
        self
    }

    fn matches_domain(&self, host: Option<&str>) -> bool {
        let Some(hook_domain) = &self.domain else {
            return true;
        };
        let Some(host) = host else { return false };
        let host = host.to_ascii_lowercase();

        if self.specific_domain {
            host == *hook_domain
        } else {
            host == *hook_domain || host.ends_with(&format!(".{hook_domain}"))
        }
    }

    fn matches_port(&self, port: Option<u16>) -> bool {
        match self.port {
            Some(hook_port) => port == Some(hook_port),
            None => true,
        }
    }

    fn matches_path(&self, path: &str) -> bool {
        let Some(hook_path) = &self.path else {
            return true;
        };

        if self.specific_path {
            path == hook_path
        } else if hook_path == "/" {
            true
        } else {
            path == hook_path || path.starts_with(&format!("{hook_path}/"))
        }
    }

    pub fn matches(&self, host: Option<&str>, port: Option<u16>, path: &str) -> bool {
        self.matches_domain(host) && self.matches_port(port) && self.matches_path(path)
    }

    /// The part of `path` that remains after stripping this hook's path prefix, keeping the
    /// leading `/`.
    pub fn rest_path<'a>(&self, path: &'a str) -> &'a str {
        match &self.path {
            Some(hook_path) if hook_path != "/" => {
                let rest = path.strip_prefix(hook_path.as_str()).unwrap_or(path);
                if rest.is_empty() {
                    "/"
                } else {
                    rest
                }
            }
            _ => path,
        }
    }

    /// `(has_domain, domain_len, specific_domain, has_port, has_path, path_len, specific_path)`.
    /// Larger tuples are more specific.
    fn specificity(&self) -> (bool, usize, bool, bool, bool, usize, bool) {
        (
            self.domain.is_some(),
            self.domain.as_ref().map_or(0, |d| d.len()),
            self.specific_domain,
            self.port.is_some(),
            self.path.is_some(),
            self.path.as_ref().map_or(0, |p| p.len()),
            self.specific_path,
        )
    }
}

impl PartialEq for UrlHook {
    fn eq(&self, other: &Self) -> bool {
        self.specificity() == other.specificity()
    }
}

impl Eq for UrlHook {}

impl PartialOrd for UrlHook {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UrlHook {
    /// More specific hooks rank first (`Ordering::Less`).
    fn cmp(&self, other: &Self) -> Ordering {
        other.specificity().cmp(&self.specificity())
    }
}

/// A routable endpoint: a [`UrlHook`] paired with the handler that serves requests matching it.
///
/// A skippable mapping gets a cheap `probe` called with only the request's headers/URI (no
/// body access) to decide, without consuming anything, whether it actually wants this request;
/// `resolve` only ever moves the request's body into the one `handler` that ends up serving it.
pub struct UrlMapping {
    hook: UrlHook,
    skippable: bool,
    probe: Box<dyn Fn(&Parts, &str) -> bool + Send + Sync>,
    handler: Box<dyn Fn(Request<Body>, &str) -> Response<Body> + Send + Sync>,
}

impl UrlMapping {
    /// A mapping that always serves a matching request.
    pub fn new<F>(hook: UrlHook, handler: F) -> Self
    where
        F: Fn(Request<Body>, &str) -> Response<Body> + Send + Sync + 'static,
    {
        Self {
            hook,
            skippable: false,
            probe: Box::new(|_, _| true),
            handler: Box::new(handler),
        }
    }

    /// A mapping that may defer to the next matching mapping. `probe` decides eligibility
    /// (e.g. "does this file exist?") without touching the request body; `handler` runs only
    /// once `probe` (and every earlier mapping) has already said yes.
    pub fn skippable<P, F>(hook: UrlHook, probe: P, handler: F) -> Self
    where
        P: Fn(&Parts, &str) -> bool + Send + Sync + 'static,
        F: Fn(Request<Body>, &str) -> Response<Body> + Send + Sync + 'static,
    {
        Self {
            hook,
            skippable: true,
            probe: Box::new(probe),
            handler: Box::new(handler),
        }
    }
}

/// An ordered, mutable collection of [`UrlMapping`]s that resolves requests by trying the most
/// specific matching hook first.
///
/// Mutations take a write lock and re-sort; [`resolve`](Self::resolve) takes a read lock for the
/// whole dispatch pass so concurrent readers never observe a partially-reordered list.
#[derive(Default)]
pub struct UrlResolver {
    mappings: RwLock<Vec<UrlMapping>>,
}

impl UrlResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapping, keeping the collection sorted by specificity. At equal specificity,
    /// skippable mappings are tried before non-skippable ones (so they get a chance to defer).
    pub fn push(&self, mapping: UrlMapping) {
        let mut mappings = self.mappings.write().unwrap();
        mappings.push(mapping);
        mappings.sort_by(|a, b| {
            a.hook
                .cmp(&b.hook)
                .then_with(|| b.skippable.cmp(&a.skippable))
        });
    }

    pub fn resolve(&self, req: Request<Body>) -> Response<Body> {
        let mappings = self.mappings.read().unwrap();

        let (parts, body) = req.into_parts();
        let host = request_host(&parts);
        let port = request_port(&parts);
        let path = parts.uri.path().to_string();

        for mapping in mappings.iter() {
            if !mapping.hook.matches(host.as_deref(), port, &path) {
                continue;
            }

            let rest = mapping.hook.rest_path(&path).to_string();

            if mapping.skippable && !(mapping.probe)(&parts, &rest) {
                continue;
            }

            let req = Request::from_parts(parts, body);
            return (mapping.handler)(req, &rest);
        }

        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap()
    }
}

#[cfg(feature = "server")]
impl crate::server::App for UrlResolver {
    type Body = Body;
    type Error = std::convert::Infallible;

    fn call(&self, req: Request<Body>) -> Result<Response<Body>, Self::Error> {
        Ok(self.resolve(req))
    }
}

fn request_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| host.split(':').next().unwrap_or(host).to_string())
        .or_else(|| parts.uri.host().map(str::to_string))
}

fn request_port(parts: &Parts) -> Option<u16> {
    parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|host| host.split_once(':'))
        .and_then(|(_, port)| port.parse().ok())
        .or_else(|| parts.uri.port_u16())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn more_specific_hooks_rank_first() {
        let generic = UrlHook::new().path("/api", false);
        let specific = UrlHook::new().path("/api/v1", false);
        assert!(specific < generic);
    }

    #[test]
    fn resolves_to_the_more_specific_matching_mapping() {
        let resolver = UrlResolver::new();
        resolver.push(UrlMapping::new(UrlHook::new().path("/api", false), |_, _| {
            Response::builder().body(Body::from("generic")).unwrap()
        }));
        resolver.push(UrlMapping::new(
            UrlHook::new().path("/api/v1", false),
            |_, _| Response::builder().body(Body::from("v1")).unwrap(),
        ));

        let res = resolver.resolve(get("/api/v1/users"));
        assert_eq!(res.into_body().into_bytes().unwrap(), b"v1");
    }

    #[test]
    fn non_skippable_mapping_serves_when_it_matches() {
        let resolver = UrlResolver::new();
        resolver.push(UrlMapping::skippable(
            UrlHook::new().path("/", false),
            |_, _| false,
            |_, _| Response::builder().body(Body::empty()).unwrap(),
        ));
        resolver.push(UrlMapping::new(UrlHook::new().path("/", false), |_, _| {
            Response::builder().body(Body::from("fallback")).unwrap()
        }));

        let res = resolver.resolve(get("/anything"));
        assert_eq!(res.into_body().into_bytes().unwrap(), b"fallback");
    }

    #[test]
    fn skippable_mapping_serves_when_it_decides_to() {
        let resolver = UrlResolver::new();
        resolver.push(UrlMapping::skippable(
            UrlHook::new().path("/", false),
            |_, _| true,
            |_, _| Response::builder().body(Body::from("handled")).unwrap(),
        ));

        let res = resolver.resolve(get("/anything"));
        assert_eq!(res.into_body().into_bytes().unwrap(), b"handled");
    }

    #[test]
    fn returns_404_when_nothing_matches() {
        let resolver = UrlResolver::new();
        resolver.push(UrlMapping::new(
            UrlHook::new().path("/only-this", true),
            |_, _| Response::builder().body(Body::empty()).unwrap(),
        ));

        let res = resolver.resolve(get("/elsewhere"));
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rest_path_strips_the_matched_prefix() {
        let hook = UrlHook::new().path("/api", false);
        assert_eq!(hook.rest_path("/api/v1/users"), "/v1/users");
        assert_eq!(hook.rest_path("/api"), "/");
    }
}
