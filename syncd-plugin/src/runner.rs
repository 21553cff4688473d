//! Common plugin runner interface.

use async_trait::async_trait;

use syncd_profile::SyncResults;

use crate::errors::Result;
use crate::plugin::AbortStatus;

/// Drives one vendor plugin on a dedicated worker.
///
/// At most one worker runs per runner instance. If `init` or `start`
/// fails, the runner is unusable and must be discarded. Side effects are
/// observable only through [`PluginEvent`](crate::events::PluginEvent)
/// emission.
#[async_trait]
pub trait PluginRunner: Send + Sync {
    /// Sub-profile (plugin) name this runner drives.
    fn plugin_name(&self) -> &str;

    /// Construct the vendor plugin instance. Fails when called twice.
    fn init(&mut self) -> Result<()>;

    /// Hand the plugin to the worker and begin execution. Fails when not
    /// initialized or when a worker already ran.
    fn start(&mut self) -> Result<()>;

    /// Request cooperative termination and wait, bounded by the runner's
    /// stop timeout, for the worker to exit. Must not be called from the
    /// worker itself.
    async fn stop(&mut self) -> Result<()>;

    /// Forward a cancellation request to the plugin. Distinct from
    /// `stop`: the plugin decides when to give up and which terminal
    /// event to emit.
    fn abort(&self, status: AbortStatus);

    /// Snapshot of the results reported by the plugin.
    fn results(&self) -> SyncResults;

    /// Whether the worker is currently executing.
    fn is_running(&self) -> bool;

    /// Run the plugin's profile-deletion cleanup. Only valid while no
    /// worker runs.
    fn clean_up(&mut self) -> Result<()>;
}
