#![allow(dead_code)]

use hyper::header::COOKIE;
use hyper::header::SET_COOKIE;
use hyper::Body;
use hyper::Client;
use hyper::Request;
use hyper::Response;
use mission_vis::app::notifier;
use mission_vis::app::Worker;
use mission_vis::config::ServerConfig;
use mission_vis::providers::hash::HashImpl;
use std::collections::HashMap;
use std::fs::File;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;
use std::time::SystemTime;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;

pub(crate) const POLL_MS: u64 = 100;

pub(crate) struct TestServer {
    pub dir: TempDir,
    pub config: ServerConfig,
    pub base_url: String,
}

impl TestServer {
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn path(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }
}

pub(crate) fn users_document(users: &[(&str, &str)]) -> String {
    users
        .iter()
        .map(|(name, password)| {
            format!(
                "{}:\n  password: \"{}\"\n",
                name,
                HashImpl::hash(password).expect("expected hash to be produced")
            )
        })
        .collect()
}

/// Moves the mtime well past anything a previous write could have left.
pub(crate) fn touch(path: &Path, seconds_from_now: u64) {
    let file = File::options()
        .append(true)
        .open(path)
        .expect("expected file to exist");
    file.set_modified(SystemTime::now() + Duration::from_secs(seconds_from_now))
        .expect("expected mtime to be set");
}

/// Notifier, worker and config synchronizer in this process, on sockets
/// inside a fresh temp dir.
pub(crate) async fn start_server(mode: &str, missions: &str, users: &str) -> TestServer {
    let dir = tempfile::tempdir().expect("expected temp dir");
    std::fs::write(dir.path().join("missions.yml"), missions).unwrap();
    std::fs::write(dir.path().join("users.yml"), users).unwrap();
    for glider in ["sg012", "sg237"] {
        std::fs::create_dir_all(dir.path().join(glider)).unwrap();
    }

    let vars: HashMap<&str, String> = HashMap::from([
        ("VIS_ROLE", "worker".to_string()),
        ("VIS_MODE", mode.to_string()),
        ("VIS_ROOT", dir.path().display().to_string()),
        ("VIS_SECRET", "e2e-secret".to_string()),
        ("VIS_BIND", "127.0.0.1:0".to_string()),
        ("VIS_POLL_MS", POLL_MS.to_string()),
        ("VIS_NOTIFY_IPC", dir.path().join("notify.ipc").display().to_string()),
        ("VIS_WATCH_IPC", dir.path().join("watch.ipc").display().to_string()),
    ]);
    let config = ServerConfig::from_lookup(|key| vars.get(key).cloned())
        .expect("expected valid test configuration");

    let notifier = notifier(&config).expect("expected notifier to start");
    tokio::spawn(notifier.run());

    let worker = Worker::new(&config).expect("expected worker to start");
    let synchronizer = worker.synchronizer;
    tokio::spawn(async move { synchronizer.sync_events_to_state().await });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(worker.router.into_make_service());
    tokio::spawn(server);

    // let the notifier record initial mtimes and the synchronizer subscribe
    tokio::time::sleep(Duration::from_millis(POLL_MS * 5)).await;

    TestServer {
        dir,
        config,
        base_url,
    }
}

pub(crate) async fn body_text(res: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(res.into_body())
        .await
        .expect("expected body");
    String::from_utf8_lossy(&bytes).to_string()
}

/// Logs in and returns the `token=...` cookie pair, or the failure body.
pub(crate) async fn login(server: &TestServer, username: &str, password: &str) -> Result<String, String> {
    let req = Request::post(server.url("/auth"))
        .header("Content-Type", "application/json")
        .body(Body::from(format!(
            r#"{{"username": "{}", "password": "{}"}}"#,
            username, password
        )))
        .expect("issue creating request");
    let res = Client::new().request(req).await.expect("error in response");

    let cookie = res
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|pair| pair.to_string());
    let status = res.status();
    let body = body_text(res).await;

    match cookie {
        Some(cookie) if status == 200 && body == "authorization ok" => Ok(cookie),
        _ => Err(body),
    }
}

pub(crate) async fn post_json(
    server: &TestServer,
    path: &str,
    cookie: Option<&str>,
    json: &str,
) -> (u16, String) {
    let mut req = Request::post(server.url(path)).header("Content-Type", "application/json");
    if let Some(cookie) = cookie {
        req = req.header(COOKIE, cookie);
    }
    let req = req
        .body(Body::from(json.to_string()))
        .expect("issue creating request");
    let res = Client::new().request(req).await.expect("error in response");
    let status = res.status().as_u16();
    (status, body_text(res).await)
}

pub(crate) async fn get(server: &TestServer, path: &str, cookie: Option<&str>) -> (u16, String) {
    let mut req = Request::get(server.url(path));
    if let Some(cookie) = cookie {
        req = req.header(COOKIE, cookie);
    }
    let req = req.body(Body::empty()).expect("issue creating request");
    let res = Client::new().request(req).await.expect("error in response");
    let status = res.status().as_u16();
    (status, body_text(res).await)
}

pub(crate) type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a websocket through the running server. A refused upgrade comes
/// back as the HTTP status the guard answered with.
pub(crate) async fn ws_connect(
    server: &TestServer,
    path: &str,
    cookie: Option<&str>,
) -> Result<WsClient, u16> {
    let url = format!("{}{}", server.base_url.replacen("http://", "ws://", 1), path);
    let mut req = url.into_client_request().expect("issue creating request");
    if let Some(cookie) = cookie {
        req.headers_mut()
            .insert(COOKIE, cookie.parse().expect("expected valid cookie header"));
    }

    match tokio_tungstenite::connect_async(req).await {
        Ok((socket, _)) => Ok(socket),
        Err(tungstenite::Error::Http(res)) => Err(res.status().as_u16()),
        Err(err) => panic!("websocket handshake failed: {}", err),
    }
}

/// Next text frame within `wait`, skipping control frames. `None` on
/// timeout or close.
pub(crate) async fn next_text(socket: &mut WsClient, wait: Duration) -> Option<String> {
    let reading = async {
        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    };

    tokio::time::timeout(wait, reading).await.ok().flatten()
}
