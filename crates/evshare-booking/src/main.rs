use anyhow::Result;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use evshare_booking::config::BookingConfig;
use evshare_booking::server::BookingServer;
use evshare_common::logging;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

const DEFAULT_LOG_FILTER: &str = "evshare_booking=info,evshare_common=info";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "evshare-booking")]
#[command(about = "EV-Share booking engine - reservation lifecycle, pricing and completion sweeps")]
struct Args {
    #[arg(short, long, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Print the default configuration as TOML and exit")]
    gen_config: bool,

    #[arg(long, help = "Dry run mode (validate config without starting)")]
    dry_run: bool,

    #[arg(long, env = "EVSHARE_LOG_JSON", help = "Emit logs as JSON")]
    log_json: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.gen_config {
        println!("{}", BookingConfig::generate_example()?);
        return Ok(());
    }

    if args.log_json {
        logging::init_json_logging(&args.verbosity, DEFAULT_LOG_FILTER)?;
    } else {
        logging::init_logging(&args.verbosity, DEFAULT_LOG_FILTER)?;
    }

    let config = BookingConfig::load(args.config)?;

    info!("Starting EV-Share booking engine");
    info!("Environment: {}", config.service.environment);
    info!("Service ID: {}", config.service.service_id);

    if args.dry_run {
        info!("Configuration validated successfully (dry-run mode)");
        return Ok(());
    }

    let server = BookingServer::new_with_config(config).await?;

    server.run_migrations().await?;

    if let Err(e) = server.serve(shutdown_signal()).await {
        error!("Server error: {}", e);
        return Err(e);
    }

    info!("EV-Share booking engine stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
