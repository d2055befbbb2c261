use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use spa_pack_rs::{BuildEnvironment, ProxyRule};

/// Connection-scoped headers that must not be forwarded in either direction.
/// `host` and `content-length` are recomputed for the upstream request.
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn forwarded(name: &str) -> bool {
    !SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Per-request proxy failures. They turn into gateway responses and never
/// stop the server.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream `{url}` did not answer within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("upstream `{url}` failed: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not forward request: {0}")]
    Request(String),

    #[error("invalid upstream response: {0}")]
    Response(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } | Self::Response(_) => StatusCode::BAD_GATEWAY,
            Self::Request(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(status = status.as_u16(), "{self}");
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug)]
pub struct Route {
    pub rule: ProxyRule,
    pub verify_certificates: bool,
    client: reqwest::Client,
}

/// Forwards requests matching the configured rules, first match wins.
#[derive(Debug, Clone)]
pub struct Proxy {
    routes: Arc<Vec<Route>>,
    timeout: Duration,
}

fn client(timeout: Duration, verify_certificates: bool) -> reqwest::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(!verify_certificates)
        .build()
}

impl Proxy {
    pub fn new(rules: &[ProxyRule], environment: BuildEnvironment, timeout: Duration) -> reqwest::Result<Self> {
        let verifying = client(timeout, true)?;
        let mut lenient: Option<reqwest::Client> = None;

        let mut routes = Vec::with_capacity(rules.len());
        for rule in rules {
            let verify_certificates = rule.secure || environment.is_production();
            if !rule.secure && environment.is_production() {
                tracing::warn!(path = %rule.path, "Ignoring `secure: false` in a production build");
            }
            let client = if verify_certificates {
                verifying.clone()
            } else {
                match &lenient {
                    Some(client) => client.clone(),
                    None => lenient.insert(client(timeout, false)?).clone(),
                }
            };
            tracing::debug!(path = %rule.path, target = %rule.target, verify_certificates, "Proxy rule");
            routes.push(Route {
                rule: rule.clone(),
                verify_certificates,
                client,
            });
        }
        Ok(Self {
            routes: Arc::new(routes),
            timeout,
        })
    }

    pub fn route(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.rule.matches(path))
    }

    fn failure(&self, url: &str, source: reqwest::Error) -> ProxyError {
        if source.is_timeout() {
            ProxyError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            ProxyError::Upstream {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Sends `request` to the route's target, keeping its method, path,
    /// query, headers and body, and relays the answer as is.
    pub async fn forward(&self, route: &Route, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = format!("{}{}", route.rule.target, path_and_query);

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|err| ProxyError::Request(err.to_string()))?;
        let body = to_bytes(body, usize::MAX)
            .await
            .map_err(|err| ProxyError::Request(err.to_string()))?;

        let mut upstream = route.client.request(method, &url).body(body.to_vec());
        for (name, value) in parts.headers.iter().filter(|(name, _)| forwarded(name.as_str())) {
            upstream = upstream.header(name.as_str(), value.as_bytes());
        }

        let response = upstream.send().await.map_err(|err| self.failure(&url, err))?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|err| ProxyError::Response(err.to_string()))?;
        let mut headers = HeaderMap::new();
        for (name, value) in response.headers().iter().filter(|(name, _)| forwarded(name.as_str())) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }
        let bytes = response.bytes().await.map_err(|err| self.failure(&url, err))?;
        tracing::debug!(method = %parts.method, %url, status = status.as_u16(), "Proxied");

        let mut relayed = Response::new(Body::from(bytes));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }
}

/// Routes matching requests through the proxy and lets everything else fall
/// through to the static files.
pub async fn proxy_requests(State(proxy): State<Proxy>, request: Request, next: Next) -> Response {
    let Some(route) = proxy.route(request.uri().path()) else {
        return next.run(request).await;
    };
    match proxy.forward(route, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use spa_pack_rs::config::RawProxyRule;

    fn rule(path: &str, secure: bool) -> ProxyRule {
        ProxyRule::parse(&RawProxyRule {
            path: path.to_string(),
            target: "https://upstream.example.com".to_string(),
            secure,
        })
        .unwrap()
    }

    #[rstest]
    #[case(true, BuildEnvironment::Development, true)]
    #[case(false, BuildEnvironment::Development, false)]
    #[case(true, BuildEnvironment::Production, true)]
    #[case(false, BuildEnvironment::Production, true)]
    fn test_insecure_only_in_development(
        #[case] secure: bool,
        #[case] environment: BuildEnvironment,
        #[case] verify: bool,
    ) {
        let proxy = Proxy::new(&[rule("/api", secure)], environment, Duration::from_secs(1)).unwrap();
        assert_eq!(proxy.route("/api/x").unwrap().verify_certificates, verify);
    }

    #[test]
    fn test_routes_in_declared_order() {
        let rules = [rule("/api/v2*", true), rule("/api", true)];
        let proxy = Proxy::new(&rules, BuildEnvironment::Development, Duration::from_secs(1)).unwrap();
        assert_eq!(proxy.route("/api/v2/users").unwrap().rule.path, "/api/v2*");
        assert_eq!(proxy.route("/api/v1").unwrap().rule.path, "/api");
        assert!(proxy.route("/app.bundle.js").is_none());
    }

    #[rstest]
    #[case("Connection", false)]
    #[case("transfer-encoding", false)]
    #[case("host", false)]
    #[case("accept", true)]
    #[case("x-token", true)]
    fn test_forwarded_headers(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(forwarded(name), expected);
    }
}
