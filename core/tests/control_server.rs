#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{RecordingRunner, SERVICE_ORDER};
use rust_lib_sysproxy::config::ServerConfig;
use rust_lib_sysproxy::engine::Engine;
use rust_lib_sysproxy::platform::networksetup::NetworkSetupBackend;
use rust_lib_sysproxy::server::ControlServer;
use rust_lib_sysproxy::SysProxy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

async fn exchange(socket: &Path, request: &str) -> String {
    let mut stream = UnixStream::connect(socket).await.expect("connect");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    response
}

fn post(path: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn control_socket_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("helper.sock");
    std::fs::write(&socket, b"stale").expect("stale file");

    let runner = Arc::new(
        RecordingRunner::new()
            .reply("networksetup -listnetworkserviceorder", SERVICE_ORDER)
            .reply(
                "networksetup -getwebproxy Wi-Fi",
                "Enabled: Yes\nServer: 127.0.0.1\nPort: 7890\n",
            ),
    );
    let proxy = SysProxy::NetworkSetup(Engine::new(NetworkSetupBackend::new(runner.clone())));
    let handle = ControlServer::start(
        ServerConfig::default().with_socket_path(&socket),
        Arc::new(proxy),
    )
    .await
    .expect("server starts over a stale socket file");

    let status = exchange(&socket, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(status.starts_with("HTTP/1.1 200 OK"), "{status}");
    let body = status.split("\r\n\r\n").nth(1).expect("body");
    let config: serde_json::Value = serde_json::from_str(body).expect("json");
    assert_eq!(config["proxy"]["enable"], true);
    assert_eq!(config["proxy"]["servers"]["http_server"], "127.0.0.1:7890");

    let set = exchange(
        &socket,
        &post(
            "/proxy",
            r#"{"server":"10.0.0.1:8080","bypass":"localhost","device":"Wi-Fi"}"#,
        ),
    )
    .await;
    assert!(set.starts_with("HTTP/1.1 204"), "{set}");
    assert_eq!(runner.service_calls("Ethernet").len(), 0);
    assert!(runner
        .service_calls("Wi-Fi")
        .contains(&"-setwebproxy 10.0.0.1 8080".to_string()));

    let rejected = exchange(&socket, &post("/proxy", r#"{"server":"10.0.0.1"}"#)).await;
    assert!(rejected.starts_with("HTTP/1.1 500"), "{rejected}");
    assert!(rejected.contains(r#""status":"error""#), "{rejected}");

    handle.shutdown().await.expect("shutdown");
    assert!(!socket.exists());
}
