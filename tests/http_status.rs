use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use esp32_bridge::server::http::StatusHttpListener;
use esp32_bridge::state::telemetry::{TelemetrySample, TelemetryState};

async fn get(address: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(address).await.unwrap();
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

async fn serve(state: TelemetryState) -> SocketAddr {
    let listener = StatusHttpListener::new(state, SocketAddr::from(([127, 0, 0, 1], 0)));
    let (address, server) = listener.bind().unwrap();
    tokio::spawn(server);
    address
}

#[tokio::test]
async fn liveness_over_tcp() {
    let address = serve(TelemetryState::new()).await;

    let response = get(address, "/").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert_eq!(body(&response), "ESP32 Bridge Server is running");
}

#[tokio::test]
async fn status_over_tcp() {
    let state = TelemetryState::new();
    let address = serve(state.clone()).await;

    let response = get(address, "/status").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.to_ascii_lowercase().contains("content-type: application/json"));
    assert_eq!(
        body(&response),
        r#"{"lastReceivedData":"No data","timestamp":0,"connectionStatus":"Disconnected"}"#
    );

    state.update(TelemetrySample::new("98.6F", 42));
    state.update_status("Connected to 24:6F:28:00:00:01");

    let response = get(address, "/status").await;
    assert_eq!(
        body(&response),
        r#"{"lastReceivedData":"98.6F","timestamp":42,"connectionStatus":"Connected to 24:6F:28:00:00:01"}"#
    );
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let address = serve(TelemetryState::new()).await;

    let response = get(address, "/profiles").await;
    assert!(response.starts_with("HTTP/1.1 404"));
}
