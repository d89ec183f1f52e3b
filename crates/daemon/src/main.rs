/// onionpay - lightning address behind a Tor onion service
///
/// This daemon:
/// - Registers (or restores) an onion service through the Tor control port
/// - Persists the onion key so the address survives restarts
/// - Answers LNURL-pay requests with invoices from an LND node

use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use onionpay_common::{AppConfig, Settings};
use onionpay_daemon::api::{AppState, PayEndpoint};
use onionpay_daemon::lnurl::PayLink;
use onionpay_daemon::{qr, startup, ApiServer, LightningHandle, LndRestClient};

const DEFAULT_CONFIG_PATH: &str = "onionpay.toml";

/// Parsed command line
#[derive(Debug)]
struct Cli {
    command: Option<String>,
    config_path: PathBuf,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut cli = Cli {
        command: None,
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        verbose: false,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config needs a path"))?;
                cli.config_path = PathBuf::from(path);
            }
            "--verbose" => cli.verbose = true,
            "--help" | "-h" => cli.command = Some("help".to_string()),
            "--version" => cli.command = Some("version".to_string()),
            other if cli.command.is_none() && !other.starts_with("--") => {
                cli.command = Some(other.to_string());
            }
            other => return Err(anyhow!("Unexpected argument: {}", other)),
        }
    }

    Ok(cli)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Run with 'help' to see available commands");
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let detach = match cli.command.as_deref() {
        Some("help") => {
            print_help();
            return Ok(());
        }
        Some("version" | "-v") => {
            println!("onionpay v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("attached") => Some(false),
        Some("detached") => Some(true),
        // Mode from the config file
        None => None,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Run with 'help' to see available commands");
            std::process::exit(1);
        }
    };

    info!("Starting onionpay v{}", env!("CARGO_PKG_VERSION"));
    run(&cli.config_path, detach).await
}

/// Load or create default configuration
fn load_config(path: &PathBuf) -> Result<AppConfig> {
    if path.exists() {
        info!("Loading configuration from {:?}", path);
        return AppConfig::from_file(path).with_context(|| format!("Invalid config {:?}", path));
    }

    info!("No configuration file found, using defaults");
    let config = AppConfig::default();

    // Save default config for next time
    if let Err(e) = config.to_file(path) {
        warn!("Failed to save default config: {}", e);
    } else {
        info!("Saved default configuration to {:?}", path);
    }

    Ok(config)
}

async fn run(config_path: &PathBuf, detach: Option<bool>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(detach) = detach {
        config = config.with_detach(detach);
    }
    info!(
        "Running in {} mode",
        if config.provisioning.detach { "detached" } else { "attached" }
    );

    let settings_path = config.settings_path();
    let mut settings = Settings::load(&settings_path).with_context(|| {
        format!(
            "Failed to load {} (it must contain at least controlPassword)",
            settings_path.display()
        )
    })?;

    // Fail on a bad pay or lightning setup before touching the daemon
    let pay = PayEndpoint::from_config(&config.server, &config.lnurl)?;
    let lightning = LndRestClient::from_config(&config.lightning)?;
    let listen_addr: SocketAddr = config
        .server
        .forward_target()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.forward_target()))?;

    let request = startup::provision_request(&config, &settings)?;
    let outcome = startup::provisioner(&config).provision(&request).await;

    if startup::record_outcome(&mut settings, &outcome) {
        settings
            .save(&settings_path)
            .context("Failed to persist onion identity")?;
        info!("Saved onion identity to {}", settings_path.display());
    }
    let mut provisioned = outcome.context("Onion service provisioning failed")?;

    let link = PayLink::new(&config.server.username, provisioned.record().onion_host());
    print_banner(&link)?;

    let state = AppState {
        pay: Arc::new(pay),
        lightning: Arc::new(LightningHandle::new(Box::new(lightning))),
        info_html: Arc::new(link.info_html()?),
    };
    let server = ApiServer::new(listen_addr, state);

    info!("Service is running. Press Ctrl+C to stop.");

    let result = tokio::select! {
        served = server.start() => served,
        signal = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            signal.map_err(anyhow::Error::from)
        }
        closed = provisioned.wait_closed() => {
            closed?;
            Err(anyhow!("Tor closed the control connection; the onion service is gone"))
        }
    };

    provisioned.release().await;
    info!("Stopped");
    result
}

/// Print where the service can be reached
fn print_banner(link: &PayLink) -> Result<()> {
    let lnurl = link.lnurl()?;

    println!("\n========================================");
    println!("         onionpay is listening");
    println!("========================================");
    println!("URL:               {}", link.url());
    println!("LNURL:             {}", lnurl);
    println!("Lightning address: {}", link.lightning_address());
    println!("========================================\n");

    match qr::render_lines(&lnurl) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            println!();
        }
        Err(e) => warn!("Failed to render QR code: {}", e),
    }

    Ok(())
}

/// Print help message
fn print_help() {
    println!("onionpay - lightning address behind a Tor onion service");
    println!();
    println!("USAGE:");
    println!("    onionpay [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    attached    Keep the control connection open; Tor drops the service when we exit");
    println!("    detached    Register a detached service that outlives this process");
    println!("    help        Show this help message");
    println!("    version     Show version information");
    println!();
    println!("    Without a command the mode comes from [provisioning] detach in the config.");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config PATH   Config file (default: onionpay.toml)");
    println!("    --verbose           Debug logging");
    println!();
    println!("FILES:");
    println!("    onionpay.toml       Control port, listen address, LNURL limits, LND access");
    println!("    settings.json       {{\"controlPassword\", \"hsPrivateKey\", \"serviceId\"}}");
    println!();
    println!("EXAMPLES:");
    println!("    # Attached service, lives as long as this process");
    println!("    onionpay attached");
    println!();
    println!("    # Detached service restored from settings.json on every start");
    println!("    onionpay detached --config /etc/onionpay.toml");
}
