use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use spa_pack_rs::config::RawProxyRule;
use spa_pack_rs::{BuildEnvironment, ProxyRule};
use spa_pack_server::{router, DevServerOptions};
use tokio::net::TcpListener;

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> impl IntoResponse {
    let token = headers.get("x-token").and_then(|v| v.to_str().ok()).unwrap_or("-");
    ([("x-upstream", "echo")], format!("{method} {uri} {token} {body}"))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn upstream() -> SocketAddr {
    spawn(
        Router::new()
            .route("/api/*rest", any(echo))
            .route("/teapot", get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }))
            .route("/slow", get(slow)),
    )
    .await
}

fn rule(path: &str, target: String) -> ProxyRule {
    ProxyRule::parse(&RawProxyRule {
        path: path.to_string(),
        target,
        secure: true,
    })
    .unwrap()
}

struct Server {
    addr: SocketAddr,
    _output: tempfile::TempDir,
}

impl Server {
    async fn start(rules: Vec<ProxyRule>) -> Self {
        let output = tempfile::tempdir().unwrap();
        fs::write(output.path().join("index.html"), "<h1>shell</h1>").unwrap();
        fs::write(output.path().join("app.bundle.js"), "console.log(1);").unwrap();
        let options = DevServerOptions {
            output_root: output.path().to_path_buf(),
            environment: BuildEnvironment::Development,
            proxy_rules: rules,
            proxy_timeout: Duration::from_millis(300),
        };
        let addr = spawn(router(&options).unwrap()).await;
        Self { addr, _output: output }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

#[tokio::test]
async fn test_serves_static_output() {
    let server = Server::start(Vec::new()).await;
    let client = reqwest::Client::new();

    let index = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(index.status().as_u16(), 200);
    assert_eq!(index.text().await.unwrap(), "<h1>shell</h1>");

    let script = client.get(server.url("/app.bundle.js?abc12345")).send().await.unwrap();
    assert_eq!(script.text().await.unwrap(), "console.log(1);");

    let missing = client.get(server.url("/missing.js")).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn test_proxies_matching_paths() {
    let upstream = upstream().await;
    let server = Server::start(vec![
        rule("/api", format!("http://{upstream}")),
        rule("/teapot*", format!("http://{upstream}/")),
    ])
    .await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/users?page=2"))
        .header("x-token", "abc")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["x-upstream"], "echo");
    assert_eq!(response.text().await.unwrap(), "POST /api/users?page=2 abc payload");

    // upstream statuses are relayed verbatim
    let teapot = client.get(server.url("/teapot")).send().await.unwrap();
    assert_eq!(teapot.status().as_u16(), 418);
    assert_eq!(teapot.text().await.unwrap(), "short and stout");

    // non-matching paths still come from the output root
    let index = client.get(server.url("/index.html")).send().await.unwrap();
    assert_eq!(index.text().await.unwrap(), "<h1>shell</h1>");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let server = Server::start(vec![rule("/api", format!("http://{closed}"))]).await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/api/users")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 502);

    // the server keeps answering other requests
    let index = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(index.status().as_u16(), 200);
}

#[tokio::test]
async fn test_slow_upstream_is_gateway_timeout() {
    let upstream = upstream().await;
    let server = Server::start(vec![rule("/slow", format!("http://{upstream}"))]).await;

    let response = reqwest::Client::new().get(server.url("/slow")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 504);
}
