//! NetExtender Client Binary
//!
//! Logs in to a NetExtender gateway, brings up the pppd tunnel and keeps it
//! running until interrupted.

use log::{debug, error, info};
use nxvpn::{
    client::VpnClient,
    config::Config,
    error::{Result, VpnError},
};
use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

struct Args {
    config_path: String,
    max_duration: Option<Duration>,
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            process::exit(2);
        }
    };

    let config = match Config::from_file(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config_path);
            process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    info!("Starting NetExtender client v{}", nxvpn::VERSION);
    debug!("Gateway: {}:{}", config.server.hostname, config.server.port);

    if let Err(e) = run(config, args.max_duration).await {
        error!("{e}");
        process::exit(1);
    }
}

async fn run(config: Config, max_duration: Option<Duration>) -> Result<()> {
    let username = config
        .auth
        .username
        .clone()
        .ok_or_else(|| VpnError::Config("auth.username is required".to_string()))?;
    let password = config
        .auth
        .password
        .clone()
        .ok_or_else(|| VpnError::Config("auth.password is required".to_string()))?;
    let domain = config.auth.domain.clone();

    let client = Arc::new(VpnClient::new(config)?);

    let stopper = Arc::clone(&client);
    tokio::spawn(async move {
        wait_for_shutdown(max_duration).await;
        let _ = stopper.disconnect();
    });

    info!("Press Ctrl+C to disconnect.");
    client.connect(&username, &password, &domain).await
}

/// Resolve on the first termination signal or when the deadline passes
async fn wait_for_shutdown(max_duration: Option<Duration>) {
    let deadline = async {
        match max_duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received Ctrl+C"),
        _ = unix_signals() => {}
        _ = deadline => info!("Maximum session duration reached"),
    }
}

#[cfg(unix)]
async fn unix_signals() {
    use signal::unix::{signal, SignalKind};

    let (Ok(mut term), Ok(mut hup)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) else {
        log::warn!("Failed to install SIGTERM/SIGHUP handlers");
        return std::future::pending().await;
    };
    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = hup.recv() => info!("Received SIGHUP"),
    }
}

#[cfg(not(unix))]
async fn unix_signals() {
    std::future::pending().await
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut config_path = None;
    let mut max_duration = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "--max-duration" => {
                let secs = args
                    .next()
                    .and_then(|value| value.parse::<u64>().ok())
                    .ok_or("--max-duration expects a number of seconds")?;
                max_duration = Some(Duration::from_secs(secs));
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown option {flag}")),
            path if config_path.is_none() => config_path = Some(path.to_string()),
            extra => return Err(format!("Unexpected argument {extra}")),
        }
    }

    Ok(Args {
        config_path: config_path.unwrap_or_else(|| "config.toml".to_string()),
        max_duration,
    })
}

fn print_usage() {
    println!("NetExtender Client v{}", nxvpn::VERSION);
    println!();
    println!("USAGE:");
    println!("    netextender-client [CONFIG_FILE] [--max-duration SECS]");
    println!();
    println!("ARGS:");
    println!("    CONFIG_FILE          Path to configuration file (default: config.toml)");
    println!("    --max-duration SECS  Disconnect after SECS seconds");
    println!();
    println!("PRIVILEGES:");
    println!("    pppd needs root to configure the ppp interface.");
}
