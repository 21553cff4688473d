//! Connectivity, network-session and power collaborators.
//!
//! Transport detection lives outside the orchestration engine; it only
//! consumes the narrow contracts below. The static implementations back
//! the default daemon configuration and the test suites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

/// Transport currently carrying traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    None,
    Usb,
    Bluetooth,
    Network,
}

/// Read-only connectivity state.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    fn connection_type(&self) -> ConnectionType;
}

/// Opens a network path for online destinations. Opening is asynchronous;
/// the session stays un-started until the outcome is known.
#[async_trait]
pub trait NetworkSession: Send + Sync {
    /// `background` hints that the request comes from a scheduled sync
    /// and should not bring up user-visible connection dialogs.
    async fn open(&self, background: bool) -> bool;
}

/// Device power state; scheduled syncs are refused in power-save mode.
pub trait PowerMonitor: Send + Sync {
    fn in_power_save(&self) -> bool;
}

/// Flag-backed connectivity, togglable at runtime.
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn connection_type(&self) -> ConnectionType {
        if self.is_online() {
            ConnectionType::Network
        } else {
            ConnectionType::None
        }
    }
}

/// Network session that opens instantly and always succeeds.
pub struct AlwaysOpenNetwork;

#[async_trait]
impl NetworkSession for AlwaysOpenNetwork {
    async fn open(&self, _background: bool) -> bool {
        true
    }
}

/// Network session with a fixed outcome, for tests and dry runs.
pub struct FixedNetwork {
    pub succeeds: bool,
}

#[async_trait]
impl NetworkSession for FixedNetwork {
    async fn open(&self, _background: bool) -> bool {
        self.succeeds
    }
}

/// Flag-backed power monitor.
pub struct StaticPowerMonitor {
    power_save: AtomicBool,
}

impl StaticPowerMonitor {
    pub fn new(power_save: bool) -> Arc<Self> {
        Arc::new(Self {
            power_save: AtomicBool::new(power_save),
        })
    }

    pub fn set_power_save(&self, power_save: bool) {
        self.power_save.store(power_save, Ordering::SeqCst);
    }
}

impl PowerMonitor for StaticPowerMonitor {
    fn in_power_save(&self) -> bool {
        self.power_save.load(Ordering::SeqCst)
    }
}
