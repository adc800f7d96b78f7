// Copyright 2020 Joyent, Inc.

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use slog::{o, Discard, Logger};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, connect_async};

use facade_rpc::transport::WsTransport;
use facade_rpc::{Config, Conn, JsonBody, JsonCodec, RequestError, Server};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Life {
    #[serde(rename = "Life")]
    life: String,
}

fn machiner() -> Server<JsonBody> {
    let mut server = Server::new();
    server.register("Machiner", "Life", |id: String, _: ()| async move {
        match id.as_str() {
            "machine-0" => Ok(Life {
                life: "alive".to_string(),
            }),
            _ => Err(RequestError::new(
                format!("machine {} not found", id),
                "not found",
            )),
        }
    });
    server
}

#[tokio::test]
async fn calls_over_websocket() {
    let config = Config::new(Some(&Logger::root(Discard, o!()))).with_message_logging(true);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_config = config.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let codec = JsonCodec::new(WsTransport::new(ws), &server_config);
        let conn = Conn::start(codec, Some(machiner()), &server_config);
        conn.dead().await
    });

    let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let conn = Conn::start(JsonCodec::new(WsTransport::new(ws), &config), None, &config);

    let life: Life = conn.call("Machiner", "machine-0", "Life", &()).await.unwrap();
    assert_eq!(life.life, "alive");

    let missing: Result<Life, _> = conn.call("Machiner", "machine-9", "Life", &()).await;
    let err = missing.unwrap_err();
    assert_eq!(err.code(), Some("not found"));
    assert_eq!(err.to_string(), "machine machine-9 not found");

    conn.close().await.unwrap();
    // The server saw the close frame as an unexpected end of its stream.
    let outcome = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(outcome.unwrap_err().is_connection_lost());
}
