use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use onedrivecheck::comms::local_api::{serve, AppState};
use onedrivecheck::host::offline::OfflineHost;
use onedrivecheck::probe::correlator::ReplyRouter;
use onedrivecheck::settings::SettingsStore;
use onedrivecheck::utils;

#[derive(Parser)]
#[command(name = "onedrivecheck", version, about = "OneDriveCheck service monitor")]
struct AppCli {
    /// Run in daemon mode (background)
    #[arg(long)]
    daemon: bool,

    /// Settings file path
    #[arg(short, long, default_value = "settings.json", global = true)]
    settings: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the local HTTP API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Serve admin page from tera templates and static webui assets
        #[arg(long, default_value_t = false)]
        with_ui: bool,
    },
}

fn run_daemon() -> Result<()> {
    use daemonize::Daemonize;
    let daemonize = Daemonize::new()
        .pid_file("onedrivecheck.pid")
        .working_directory(".")
        .umask(0o027);
    daemonize.start().map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    if args.daemon {
        run_daemon()?;
    }

    let (port, with_ui) = match args.command {
        Some(Commands::Serve { port, with_ui }) => (port, with_ui),
        None => (8080, false),
    };

    // The binary runs without a host process attached; probes resolve as
    // no-route until the crate is embedded with a real HostServer.
    warn!("standalone mode: no host attached, agents are unreachable");

    let settings = Arc::new(SettingsStore::open(&args.settings));
    let router = Arc::new(ReplyRouter::new());
    let state = Arc::new(AppState::new(
        Arc::new(OfflineHost),
        router,
        settings,
        with_ui,
    ));

    info!(port, with_ui, "starting local API server");
    serve(state, port).await
}
