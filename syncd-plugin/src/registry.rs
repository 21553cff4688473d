//! Plugin factory registry.
//!
//! Dynamic library loading is out of scope; plugins are registered at
//! process start as factory closures keyed by sub-profile name.

use std::collections::HashMap;
use std::fmt;

use syncd_profile::SyncProfile;

use crate::plugin::{ClientPlugin, ServerPlugin};

type ClientFactory = Box<dyn Fn(&SyncProfile) -> Box<dyn ClientPlugin> + Send + Sync>;
type ServerFactory = Box<dyn Fn(&SyncProfile) -> Box<dyn ServerPlugin> + Send + Sync>;

/// Registry of plugin factories, built once at startup.
#[derive(Default)]
pub struct PluginRegistry {
    clients: HashMap<String, ClientFactory>,
    servers: HashMap<String, ServerFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&SyncProfile) -> Box<dyn ClientPlugin> + Send + Sync + 'static,
    {
        self.clients.insert(name.into(), Box::new(factory));
    }

    pub fn register_server<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&SyncProfile) -> Box<dyn ServerPlugin> + Send + Sync + 'static,
    {
        self.servers.insert(name.into(), Box::new(factory));
    }

    pub fn has_client(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn has_server(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn create_client(&self, name: &str, profile: &SyncProfile) -> Option<Box<dyn ClientPlugin>> {
        self.clients.get(name).map(|f| f(profile))
    }

    pub fn create_server(&self, name: &str, profile: &SyncProfile) -> Option<Box<dyn ServerPlugin>> {
        self.servers.get(name).map(|f| f(profile))
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("clients", &self.clients.keys().collect::<Vec<_>>())
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .finish()
    }
}
