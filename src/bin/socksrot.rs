//! socksrot daemon binary

use anyhow::{Context, Result};
use socksrot::proxy::{RotationPool, Upstream, parse_proxy_list};
use socksrot::server::{Server, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "socksrot";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let mut config = ServerConfig::default();
    let mut upstreams: Vec<Upstream> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-a" | "--addr" => {
                config.listen_host = args.next().context("Expected bind address after -a")?;
            }
            "-p" | "--port" => {
                let value = args.next().context("Expected port after -p")?;
                config.listen_port = value
                    .parse()
                    .with_context(|| format!("-p expects a port number, got `{value}`"))?;
            }
            "-P" | "--proxies" => {
                let path = args.next().context("Expected file after -P")?;
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read proxy list {path}"))?;
                let mut parsed = parse_proxy_list(text.lines())
                    .with_context(|| format!("Failed to parse proxy list {path}"))?;
                upstreams.append(&mut parsed);
            }
            "-n" | "--no-auth" => {
                config.auth.allow_no_auth = true;
            }
            "-u" | "--userpass" => {
                let value = args.next().context("Expected USER:PASS after -u")?;
                config.auth.allow_userpass = true;
                match value.split_once(':') {
                    Some((user, pass)) => {
                        config.auth.user = Some(user.to_string());
                        config.auth.pass = Some(pass.to_string());
                    }
                    // Without `:PASS` only the username is checked.
                    None => config.auth.user = Some(value),
                }
            }
            "-w" | "--workers" => {
                let value = args.next().context("Expected count after -w")?;
                config.workers = parse_positive(&value, "-w")?;
            }
            "-t" | "--timeout" => {
                let value = args.next().context("Expected seconds after -t")?;
                config.io_timeout = Duration::from_secs(parse_positive(&value, "-t")? as u64);
            }
            "-r" | "--retry" => {
                config.retry_on_upstream_failure = true;
            }
            "-v" | "--version" => {
                println!("{APP_NAME} {VERSION}");
                return Ok(());
            }
            "-h" | "--help" => {
                usage();
                return Ok(());
            }
            _ => {
                error!("Unknown argument: {}", arg);
                anyhow::bail!("Unknown argument: {arg} ({APP_NAME} -h for help)");
            }
        }
    }

    if upstreams.is_empty() {
        anyhow::bail!("no proxies loaded (use -P FILE; {APP_NAME} -h for help)");
    }
    if !config.auth.allow_no_auth && !config.auth.allow_userpass {
        anyhow::bail!("no auth method enabled (use -n and/or -u; {APP_NAME} -h for help)");
    }

    if config.auth.allow_no_auth {
        info!("accepting no auth");
    }
    if config.auth.allow_userpass {
        info!("accepting userpass auth");
    }

    let pool = RotationPool::new(upstreams)?;
    info!("[{APP_NAME}] v{VERSION}, {} upstream(s) in rotation", pool.len());

    let server = Arc::new(
        Server::bind(config, pool)
            .await
            .context("Failed to bind listener")?,
    );

    // SIGINT requests a graceful stop; in-flight sessions finish naturally.
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

fn parse_positive(value: &str, flag: &str) -> Result<usize> {
    let parsed = value
        .parse::<usize>()
        .map_err(|err| anyhow::anyhow!("{flag} expects a positive integer: {err}"))?;
    if parsed == 0 {
        anyhow::bail!("{flag} expects a value greater than 0");
    }
    Ok(parsed)
}

fn usage() {
    println!("Usage: {APP_NAME} [OPTIONS]");
    println!("Options:");
    println!("  -a, --addr ADDR           Bind address (default: 127.0.0.1)");
    println!("  -p, --port PORT           Listen port (default: 1080)");
    println!("  -P, --proxies FILE        Add proxies from FILE (repeatable)");
    println!("  -n, --no-auth             Accept clients with no auth");
    println!("  -u, --userpass USER:PASS  Accept clients with these credentials");
    println!("                            (without :PASS the password is unchecked)");
    println!("  -w, --workers N           Number of workers (default: 8)");
    println!("  -t, --timeout S           Negotiation I/O timeout in seconds (default: 10)");
    println!("  -r, --retry               Retry the next upstream on failure");
    println!("  -v, --version             Show version information");
    println!("  -h, --help                Show this help message");
}
