// Copyright 2020 Joyent, Inc.

use std::net::SocketAddr;
use std::process;
use std::sync::Mutex;
use std::time::Duration;

use clap::{crate_version, value_t, App, Arg, ArgMatches};
use serde_json::Value;
use slog::{o, Drain, Level, LevelFilter, Logger};
use tokio::net::TcpStream;

use facade_rpc::transport::StreamTransport;
use facade_rpc::{Config, Conn, JsonCodec};

static APP: &'static str = "rpccall";
static DEFAULT_HOST: &'static str = "127.0.0.1";
const DEFAULT_PORT: u32 = 2030;

pub fn parse_opts<'a, 'b>(app: String) -> ArgMatches<'a> {
    App::new(app)
        .about("Command-line tool for making a single RPC call")
        .version(crate_version!())
        .arg(
            Arg::with_name("host")
                .help("DNS name or IP address for remote server")
                .long("host")
                .short("h")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("port")
                .help("TCP port for remote server (Default: 2030)")
                .long("port")
                .short("p")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("type")
                .help("Facade type the request is addressed to")
                .long("type")
                .short("t")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("id")
                .help("Facade instance id")
                .long("id")
                .short("i")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("method")
                .help("Name of remote RPC method call")
                .long("method")
                .short("m")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("args")
                .help("JSON-encoded arguments for RPC method call")
                .long("args")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("timeout")
                .help("Seconds to wait for the reply before abandoning the call")
                .long("timeout")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .help("Log every envelope sent and received")
                .long("verbose")
                .short("v")
                .takes_value(false),
        )
        .get_matches()
}

#[tokio::main]
async fn main() {
    let matches = parse_opts(APP.to_string());
    let host = String::from(matches.value_of("host").unwrap_or(DEFAULT_HOST));
    let port = value_t!(matches, "port", u32).unwrap_or(DEFAULT_PORT);
    let addr = [host, String::from(":"), port.to_string()]
        .concat()
        .parse::<SocketAddr>()
        .unwrap_or_else(|e| {
            eprintln!(
                "Failed to parse host and port as valid socket address: \
                 {}",
                e
            );
            process::exit(1)
        });
    let facade = matches.value_of("type").unwrap_or_default().to_string();
    let id = matches.value_of("id").unwrap_or("").to_string();
    let method = matches.value_of("method").unwrap_or_default().to_string();
    let args = if matches.is_present("args") {
        value_t!(matches, "args", Value).unwrap_or_else(|e| e.exit())
    } else {
        Value::Null
    };
    let wait = value_t!(matches, "timeout", u64).unwrap_or(30);

    let level = if matches.is_present("verbose") {
        Level::Debug
    } else {
        Level::Warning
    };
    let plain = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let log = Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            level,
        ))
        .fuse(),
        o!(),
    );
    let config = Config::new(Some(&log)).with_message_logging(matches.is_present("verbose"));

    let stream = TcpStream::connect(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to connect to server: {}", e);
        process::exit(1)
    });
    let conn = Conn::start(
        JsonCodec::new(StreamTransport::from_config(stream, &config), &config),
        None,
        &config,
    );

    let call = conn.call::<_, Value>(&facade, &id, &method, &args);
    let result = match tokio::time::timeout(Duration::from_secs(wait), call).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("Error: no reply within {} seconds", wait);
            process::exit(1)
        }
    };
    let _ = conn.close().await;

    match result {
        Ok(response) => println!("{}", response),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1)
        }
    }
}
