use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use syncd_daemon::connectivity::{AlwaysOpenNetwork, StaticConnectivity, StaticPowerMonitor};
use syncd_daemon::{start_daemon, Collaborators, DaemonConfig, WakeBackendKind};
use syncd_plugin::PluginRegistry;
use syncd_profile::InMemoryProfileStore;

#[derive(Parser)]
#[command(name = "syncd", about = "Sync session orchestration daemon")]
struct Args {
    /// Path to the persistent wake-up alarm database.
    #[arg(long, default_value = "alarms.sqlite")]
    alarm_db: PathBuf,

    /// Wake-up timer backend.
    #[arg(long, value_enum, default_value = "alarm-store")]
    wake_backend: WakeBackendKind,

    /// Seconds to wait after a storage change before syncing.
    #[arg(long, default_value_t = 30)]
    change_debounce_secs: u64,
}

#[tokio::main]
async fn main() -> syncd_daemon::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = DaemonConfig {
        alarm_db_path: args.alarm_db,
        wake_backend: args.wake_backend,
        change_debounce: Duration::from_secs(args.change_debounce_secs),
        ..DaemonConfig::default()
    };

    // Profile persistence and plugin discovery live outside the engine;
    // deployments register their plugins and store here.
    let store = Arc::new(InMemoryProfileStore::new());
    let registry = Arc::new(PluginRegistry::new());
    let collaborators = Collaborators {
        connectivity: StaticConnectivity::new(true),
        network: Arc::new(AlwaysOpenNetwork),
        power: StaticPowerMonitor::new(false),
    };

    let handle = start_daemon(store, registry, collaborators, config)?;
    info!("syncd running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await?;
    Ok(())
}
