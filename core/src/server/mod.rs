//! Control plane: the proxy engine exposed over a Unix domain socket.
//!
//! Routes:
//!
//! | method | path       | action                      | success |
//! |--------|------------|-----------------------------|---------|
//! | GET    | any        | query current settings      | 200 JSON |
//! | POST   | `/proxy`   | set a fixed proxy server    | 204     |
//! | POST   | `/pac`     | set a PAC URL               | 204     |
//! | POST   | `/disable` | turn every proxy mode off   | 204     |
//!
//! Failures answer `500` with `{"status":"error","message":...}`.

pub mod http;

use crate::config::ServerConfig;
use crate::engine::SysProxy;
use crate::models::{ControlRequest, ErrorResponse};
use anyhow::{Context, Result};
use http::{Request, Response};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Entry point for binding the control socket
pub struct ControlServer;

impl ControlServer {
    /// Bind the socket and start serving.
    ///
    /// A file left at the socket path by an earlier run is removed first.
    pub async fn start(config: ServerConfig, proxy: Arc<SysProxy>) -> Result<ControlServerHandle> {
        let socket_path = config.socket_path;
        if let Some(dir) = socket_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("directory creation error: {}", dir.display()))?;
            }
        }
        match fs::remove_file(&socket_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("unlink error: {}", socket_path.display()))
            }
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("unix listen error: {}", socket_path.display()))?;
        if let Err(err) = fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o666)) {
            tracing::warn!("Failed to chmod {}: {err}", socket_path.display());
        }
        tracing::info!("unix listening at: {}", socket_path.display());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, proxy, shutdown_rx));

        Ok(ControlServerHandle {
            task,
            shutdown: Some(shutdown_tx),
            socket_path,
        })
    }
}

/// A running control server. Dropping it without [`shutdown`] leaves the
/// accept loop running until the runtime stops.
///
/// [`shutdown`]: ControlServerHandle::shutdown
pub struct ControlServerHandle {
    task: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
    socket_path: PathBuf,
}

impl ControlServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, wait for the loop to exit and unlink the socket.
    pub async fn shutdown(mut self) -> Result<()> {
        tracing::info!("Stopping control server (socket={})", self.socket_path.display());
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            tracing::warn!("Failed to await control server task: {err}");
        }
        match fs::remove_file(&self.socket_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("unlink error: {}", self.socket_path.display())),
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    proxy: Arc<SysProxy>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("control server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let proxy = Arc::clone(&proxy);
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(stream, &proxy).await {
                            tracing::warn!("control connection failed: {err:#}");
                        }
                    });
                }
                Err(err) => {
                    tracing::error!("control listener error: {err}");
                    break;
                }
            }
        }
    }
}

async fn serve_connection(mut stream: UnixStream, proxy: &SysProxy) -> Result<()> {
    let response = match http::read_request(&mut stream).await {
        Ok(request) => handle(proxy, &request).await,
        Err(err) => error_response(400, format!("{err:#}")),
    };
    http::write_response(&mut stream, &response).await
}

/// Route one request to the engine.
pub async fn handle(proxy: &SysProxy, request: &Request) -> Response {
    let path = request.path.split('?').next().unwrap_or("/");
    match (request.method.as_str(), path) {
        ("GET", _) => match proxy.query(None, false).await {
            Ok(config) => match serde_json::to_string(&config) {
                Ok(body) => Response::json(200, body),
                Err(err) => error_response(500, err.to_string()),
            },
            Err(err) => error_response(500, err.to_string()),
        },
        ("POST", "/proxy") | ("POST", "/pac") | ("POST", "/disable") => {
            let body = match decode(&request.body) {
                Ok(body) => body,
                Err(err) => return error_response(500, err.to_string()),
            };
            let device = body.device.as_deref();
            let result = match path {
                "/proxy" => {
                    proxy
                        .set_proxy(&body.server, &body.bypass, device, body.only_with_device)
                        .await
                }
                "/pac" => proxy.set_pac(&body.url, device, body.only_with_device).await,
                _ => proxy.disable(device, body.only_with_device).await,
            };
            match result {
                Ok(()) => Response::no_content(),
                Err(err) => error_response(500, err.to_string()),
            }
        }
        (method, path) => error_response(404, format!("no route for {method} {path}")),
    }
}

fn decode(body: &[u8]) -> serde_json::Result<ControlRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ControlRequest::default());
    }
    serde_json::from_slice(body)
}

fn error_response(status: u16, message: String) -> Response {
    let body = serde_json::to_string(&ErrorResponse::new(message))
        .unwrap_or_else(|_| r#"{"status":"error","message":""}"#.to_string());
    Response::json(status, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DesktopFlavor, Engine};
    use crate::platform::desktop::DesktopBackend;
    use crate::platform::fake::ScriptedRunner;

    fn kde_proxy(runner: Arc<ScriptedRunner>) -> SysProxy {
        SysProxy::Desktop(Engine::new(DesktopBackend::new(
            DesktopFlavor::Kde { plasma6: false },
            runner,
        )))
    }

    fn post(path: &str, body: &str) -> Request {
        Request {
            method: "POST".to_string(),
            path: path.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn post_proxy_returns_no_content() {
        let runner = Arc::new(ScriptedRunner::new());
        let proxy = kde_proxy(runner.clone());

        let response = handle(
            &proxy,
            &post("/proxy", r#"{"server":"127.0.0.1:7890","bypass":"localhost"}"#),
        )
        .await;

        assert_eq!(response, Response::no_content());
        assert!(runner
            .calls()
            .iter()
            .any(|call| call.last().map(String::as_str) == Some("http://127.0.0.1 7890")));
    }

    #[tokio::test]
    async fn invalid_server_is_reported_as_error_body() {
        let runner = Arc::new(ScriptedRunner::new());
        let proxy = kde_proxy(runner.clone());

        let response = handle(
            &proxy,
            &post("/proxy", r#"{"server":"nope","bypass":"localhost"}"#),
        )
        .await;

        assert_eq!(response.status, 500);
        let body: serde_json::Value =
            serde_json::from_str(response.body.as_deref().expect("body")).expect("json");
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().expect("message").contains("nope"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_server_with_empty_bypass_reads_but_never_writes() {
        let runner = Arc::new(ScriptedRunner::new());
        let proxy = kde_proxy(runner.clone());

        let response = handle(&proxy, &post("/proxy", r#"{"server":"nope"}"#)).await;

        assert_eq!(response.status, 500);
        let calls = runner.calls();
        assert!(calls.iter().any(|call| call[0] == "kreadconfig5"), "{calls:?}");
        assert!(
            calls.iter().all(|call| !call[0].starts_with("kwriteconfig")),
            "{calls:?}"
        );
    }

    #[tokio::test]
    async fn empty_disable_body_uses_defaults() {
        let runner = Arc::new(ScriptedRunner::new());
        let proxy = kde_proxy(runner.clone());

        let response = handle(&proxy, &post("/disable", "")).await;

        assert_eq!(response.status, 204);
        assert!(!runner.calls().is_empty());
    }

    #[tokio::test]
    async fn any_get_path_queries_settings() {
        let runner = Arc::new(ScriptedRunner::new());
        let proxy = kde_proxy(runner);
        let request = Request {
            method: "GET".to_string(),
            path: "/status/anything".to_string(),
            body: Vec::new(),
        };

        let response = handle(&proxy, &request).await;

        assert_eq!(response.status, 200);
        let body: serde_json::Value =
            serde_json::from_str(response.body.as_deref().expect("body")).expect("json");
        assert_eq!(body["proxy"]["enable"], false);
        assert_eq!(body["pac"]["enable"], false);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let proxy = kde_proxy(Arc::new(ScriptedRunner::new()));
        let response = handle(&proxy, &post("/reset", "")).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn shutdown_unlinks_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("nested").join("control.sock");
        let proxy = Arc::new(kde_proxy(Arc::new(ScriptedRunner::new())));

        let handle = ControlServer::start(
            ServerConfig::default().with_socket_path(&socket_path),
            Arc::clone(&proxy),
        )
        .await
        .expect("start");
        assert!(socket_path.exists());

        handle.shutdown().await.expect("shutdown");
        assert!(!socket_path.exists());

        let again = ControlServer::start(
            ServerConfig::default().with_socket_path(&socket_path),
            proxy,
        )
        .await
        .expect("restart");
        again.shutdown().await.expect("shutdown again");
    }
}
