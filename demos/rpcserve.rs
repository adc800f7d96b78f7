// Copyright 2020 Joyent, Inc.

use std::env;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::prelude::*;
use clap::{crate_version, value_t, App, Arg, ArgMatches};
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Value};
use slog::{debug, error, info, o, Drain, Logger};
use tokio::net::TcpListener;

use facade_rpc::transport::StreamTransport;
use facade_rpc::{Config, Conn, JsonBody, JsonCodec, RequestError, Server};

static APP: &'static str = "rpcserve";
static DEFAULT_ADDR: &'static str = "127.0.0.1:2030";

#[derive(Default, Serialize, Deserialize)]
struct RepeatArgs {
    value: Value,
    count: u32,
}

#[derive(Default, Serialize, Deserialize)]
struct SleepArgs {
    echo: Value,
    delay: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct DatePayload {
    timestamp: u64,
    iso8601: DateTime<Utc>,
}

impl DatePayload {
    fn new() -> DatePayload {
        let now = Utc::now();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        DatePayload {
            timestamp: millis,
            iso8601: now,
        }
    }
}

pub fn parse_opts<'a, 'b>(app: String) -> ArgMatches<'a> {
    App::new(app)
        .about("Serve the demo facades over TCP")
        .version(crate_version!())
        .arg(
            Arg::with_name("address")
                .help("Address to listen on (Default: 127.0.0.1:2030)")
                .long("address")
                .short("a")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log_messages")
                .help("Log every envelope sent and received")
                .long("log-messages")
                .short("l")
                .takes_value(false),
        )
        .get_matches()
}

fn facades(log: &Logger) -> Server<JsonBody> {
    let mut server = Server::new();

    let echo_log = log.clone();
    server.register("Echo", "Echo", move |_id, args: Value| {
        debug!(echo_log, "handling echo request");
        async move { Ok::<_, RequestError>(args) }
    });

    let date_log = log.clone();
    server.register("Clock", "Now", move |_id, _: ()| {
        debug!(date_log, "handling date request");
        async move { Ok::<_, RequestError>(DatePayload::new()) }
    });

    server.register("Yes", "Repeat", |_id, args: RepeatArgs| async move {
        if args.count > 10_000 {
            return Err(RequestError::bad_request("count must be at most 10000"));
        }
        Ok(vec![args.value; args.count as usize])
    });

    server.register("Sleeper", "Sleep", |_id, args: SleepArgs| async move {
        if let Some(delay) = args.delay {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let echoed: Vec<Value> = match args.echo {
            Value::Array(items) => items.into_iter().map(|v| json!({ "value": v })).collect(),
            other => vec![json!({ "value": other })],
        };
        Ok::<_, RequestError>(echoed)
    });

    server
}

#[tokio::main]
async fn main() {
    let matches = parse_opts(APP.to_string());
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let root_log = Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => crate_version!()),
    );

    let addr = value_t!(matches, "address", SocketAddr).unwrap_or_else(|_| {
        env::var("RPCSERVE_ADDR")
            .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .unwrap_or_else(|e| {
                eprintln!("Failed to parse listen address: {}", e);
                std::process::exit(1)
            })
    });
    let config = Config::new(Some(&root_log))
        .with_message_logging(matches.is_present("log_messages"));

    let listener = TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind {}: {}", addr, e);
        std::process::exit(1)
    });
    info!(root_log, "listening for rpc requests"; "address" => addr);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let log = root_log.new(o!("peer" => peer));
                let codec = JsonCodec::new(StreamTransport::from_config(socket, &config), &config);
                let conn = Conn::start(codec, Some(facades(&log)), &config);
                tokio::spawn(async move {
                    match conn.dead().await {
                        Ok(()) => debug!(log, "connection closed"),
                        Err(e) => debug!(log, "connection ended"; "err" => %e),
                    }
                });
            }
            Err(e) => error!(root_log, "failed to accept socket"; "err" => %e),
        }
    }
}
