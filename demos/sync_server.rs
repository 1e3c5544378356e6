//! Group watch server
//!
//! Run with: cargo run --example sync_server [BIND_ADDR] [--turn URL USER CREDENTIAL]
//!
//! Examples:
//!   cargo run --example sync_server                  # binds to 0.0.0.0:8080
//!   cargo run --example sync_server localhost        # binds to 127.0.0.1:8080
//!   cargo run --example sync_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Browsers connect to ws://HOST:PORT, negotiate a peer connection and send
//! `{"type":"start_stream","file_path":"/path/to/movie.mp4"}` to start the
//! shared stream. ffmpeg and ffprobe must be on PATH.

use std::net::SocketAddr;
use std::time::Duration;

use syncwatch::rtc::RtcConfig;
use syncwatch::{ServerConfig, SyncServer};

const DEFAULT_PORT: u16 = 8080;

/// Parse a bind address argument
///
/// Accepts:
/// - "127.0.0.1:9000"
/// - "127.0.0.1" -> 127.0.0.1:8080
/// - "localhost" -> 127.0.0.1:8080
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: sync_server [BIND_ADDR] [--turn URL USER CREDENTIAL]");
    eprintln!();
    eprintln!("  sync_server                        # binds to 0.0.0.0:8080");
    eprintln!("  sync_server localhost              # binds to 127.0.0.1:8080");
    eprintln!("  sync_server 0.0.0.0:9000 --turn turn:relay.example.org:3478 user secret");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = ServerConfig::default();
    let mut rtc = RtcConfig::default();
    let mut rest = args.iter();

    while let Some(arg) = rest.next() {
        if arg == "--turn" {
            match (rest.next(), rest.next(), rest.next()) {
                (Some(url), Some(user), Some(credential)) => {
                    rtc = rtc.turn(url.as_str(), user.as_str(), credential.as_str());
                }
                _ => {
                    print_usage();
                    std::process::exit(1);
                }
            }
            continue;
        }

        match parse_bind_addr(arg) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("syncwatch=info".parse()?)
                .add_directive("sync_server=info".parse()?),
        )
        .init();

    let config = config.rtc(rtc).sync_interval(Duration::from_millis(100));
    println!("Starting group watch server on ws://{}", config.bind_addr);

    let server = SyncServer::with_webrtc(config)?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = server.stats();
    println!(
        "Served {} connections in {:?}",
        stats.total_connections, stats.uptime
    );

    Ok(())
}
