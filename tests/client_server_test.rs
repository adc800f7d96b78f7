// Copyright 2020 Joyent, Inc.

use std::net::SocketAddr;
use std::sync::Mutex;

use serde_json::Value;
use slog::{debug, info, o, Drain, Level, LevelFilter, Logger};
use tokio::net::{TcpListener, TcpStream};

use facade_rpc::transport::StreamTransport;
use facade_rpc::{Config, Conn, JsonBody, JsonCodec, RequestError, Server};

fn test_log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            Level::Info,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}

fn echo_server(log: &Logger) -> Server<JsonBody> {
    let log = log.clone();
    let mut server = Server::new();
    server.register("Echo", "Echo", move |_id, args: Vec<String>| {
        debug!(log, "handling echo function request");
        async move { Ok::<_, RequestError>(args) }
    });
    server
}

async fn run_server(listener: TcpListener, log: Logger) {
    let addr = listener.local_addr().expect("no local address");
    info!(log, "listening for rpc requests"; "address" => addr);

    while let Ok((stream, _)) = listener.accept().await {
        let config = Config::new(Some(&log));
        let codec = JsonCodec::new(StreamTransport::from_config(stream, &config), &config);
        let conn = Conn::start(codec, Some(echo_server(&log)), &config);
        tokio::spawn(async move {
            let _ = conn.dead().await;
        });
    }
}

async fn run_client(addr: SocketAddr, log: Logger) {
    let stream = TcpStream::connect(&addr)
        .await
        .expect("failed to connect to server");
    let config = Config::new(Some(&log));
    let conn = Conn::start(
        JsonCodec::new(StreamTransport::from_config(stream, &config), &config),
        None,
        &config,
    );

    for i in 1..100 {
        let data_size = i * 1000;
        let args = vec!["a".repeat(data_size)];
        let data: Vec<String> = conn
            .call("Echo", "", "Echo", &args)
            .await
            .expect("echo call failed");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].len(), data_size);
    }

    let missing: Result<Value, _> = conn.call("Echo", "", "Shout", &()).await;
    assert_eq!(
        missing.unwrap_err().code(),
        Some(facade_rpc::error::codes::NOT_IMPLEMENTED)
    );

    assert!(conn.close().await.is_ok());
    assert!(conn.dead().await.is_ok());
}

#[tokio::test]
async fn client_server_comms() {
    let log = test_log();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no local address");

    tokio::spawn(run_server(listener, log.clone()));
    run_client(addr, log).await;
}
