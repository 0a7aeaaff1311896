//! Configuration data types for the launcher.
//!
//! Every field has a default, so an empty file yields the stock device setup.

use core::time::Duration;
use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    advertiser::{
        DEFAULT_HOST_NAME, DEFAULT_SERVICE_PORT, ServiceAdvertisement, default_advertisements,
    },
    app::RuntimeSettings,
    catalog::{AllowList, AppRecord, DEFAULT_ALLOWED, DEFAULT_GATE, IconHandle, StaticDirectory},
    health::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, DEFAULT_READ_TIMEOUT, ProbeTimeouts},
    launch::{self, LaunchStep},
    status::DEFAULT_BRAND,
};

/// Root of `quine_launcher.toml`.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct LauncherConfig {
    #[serde(default)]
    pub title: TitleConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub advertise: AdvertiseConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Installed applications, standing in for the OS package directory.
    #[serde(default)]
    pub apps: Vec<AppEntry>,
    /// Commands used to start launch targets, keyed by identifier.
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,
}

/// Title bar decoration.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TitleConfig {
    #[serde(default = "default_brand")]
    pub brand: String,
    /// Rendered as the `u0_a<id>` prefix of the address.
    #[serde(default)]
    pub account_id: u32,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            brand: default_brand(),
            account_id: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    #[serde(default = "default_ip_refresh_secs")]
    pub ip_refresh_secs: u64,
    #[serde(default = "default_health_poll_secs")]
    pub health_poll_secs: u64,
    /// Upper bound for withdrawing advertisements and draining jobs on shutdown.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ip_refresh_secs: default_ip_refresh_secs(),
            health_poll_secs: default_health_poll_secs(),
            teardown_grace_ms: default_teardown_grace_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AdvertiseConfig {
    /// When false no advertisement is registered and no responder is started.
    #[serde(default = "do_enable")]
    pub enable: bool,
    /// Host name the mDNS responder answers for; must end in `.local.`.
    #[serde(default = "default_host_name")]
    pub host_name: String,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceEntry>,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            enable: do_enable(),
            host_name: default_host_name(),
            services: default_services(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    pub service_type: String,
    #[serde(default = "default_service_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    #[serde(default = "do_enable")]
    pub enable: bool,
    #[serde(default = "default_steps")]
    pub steps: Vec<StepEntry>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            enable: do_enable(),
            steps: default_steps(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StepEntry {
    pub target: String,
    /// Wait after launching before the next step starts.
    #[serde(default)]
    pub settle_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    #[serde(default = "default_allowed")]
    pub allowed: Vec<String>,
    /// App that must be installed for the catalog to be shown. Empty disables the check.
    #[serde(default = "default_required")]
    pub required: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed(),
            required: default_required(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

fn default_brand() -> String {
    DEFAULT_BRAND.to_string()
}

const fn default_ip_refresh_secs() -> u64 {
    60
}

const fn default_health_poll_secs() -> u64 {
    5
}

const fn default_teardown_grace_ms() -> u64 {
    2000
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

const fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

const fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT.as_secs()
}

const fn do_enable() -> bool {
    true
}

fn default_host_name() -> String {
    DEFAULT_HOST_NAME.to_string()
}

const fn default_service_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

fn default_services() -> Vec<ServiceEntry> {
    default_advertisements(DEFAULT_SERVICE_PORT)
        .into_iter()
        .map(|ad| ServiceEntry {
            name: ad.name,
            service_type: ad.service_type,
            port: ad.port,
        })
        .collect()
}

fn default_steps() -> Vec<StepEntry> {
    launch::default_steps()
        .into_iter()
        .map(|step| StepEntry {
            target: step.target,
            settle_ms: u64::try_from(step.post_launch_delay.as_millis()).unwrap_or(u64::MAX),
        })
        .collect()
}

fn default_allowed() -> Vec<String> {
    DEFAULT_ALLOWED.iter().map(ToString::to_string).collect()
}

fn default_required() -> String {
    DEFAULT_GATE.to_string()
}

impl LauncherConfig {
    #[must_use]
    pub fn allow_list(&self) -> AllowList {
        AllowList::new(&self.catalog.allowed)
    }

    #[must_use]
    pub fn required_app(&self) -> Option<&str> {
        Some(self.catalog.required.as_str()).filter(|id| !id.is_empty())
    }

    #[must_use]
    pub fn directory(&self) -> StaticDirectory {
        StaticDirectory(
            self.apps
                .iter()
                .map(|app| AppRecord {
                    display_name: app.name.clone(),
                    identifier: app.identifier.clone(),
                    icon: IconHandle(app.icon.clone()),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn probe_timeouts(&self) -> ProbeTimeouts {
        ProbeTimeouts {
            connect: Duration::from_secs(self.health.connect_timeout_secs),
            read: Duration::from_secs(self.health.read_timeout_secs),
        }
    }

    #[must_use]
    pub fn target_commands(&self) -> HashMap<String, Vec<String>> {
        self.targets
            .iter()
            .map(|(id, target)| (id.clone(), target.command.clone()))
            .collect()
    }

    /// Rejects values that parse but cannot drive the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first monitor interval that is zero.
    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(
            self.monitor.ip_refresh_secs > 0,
            "monitor.ip_refresh_secs must be at least 1"
        );
        eyre::ensure!(
            self.monitor.health_poll_secs > 0,
            "monitor.health_poll_secs must be at least 1"
        );
        Ok(())
    }

    /// Runtime parameters derived from this file.
    #[must_use]
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            brand: self.title.brand.clone(),
            account_id: self.title.account_id,
            ip_refresh_interval: Duration::from_secs(self.monitor.ip_refresh_secs),
            health_poll_interval: Duration::from_secs(self.monitor.health_poll_secs),
            teardown_grace: Duration::from_millis(self.monitor.teardown_grace_ms),
            health_endpoint: self.health.endpoint.clone(),
            probe_timeouts: self.probe_timeouts(),
            advertisements: if self.advertise.enable {
                self.advertise
                    .services
                    .iter()
                    .map(|s| ServiceAdvertisement::new(&s.name, &s.service_type, s.port))
                    .collect()
            } else {
                Vec::new()
            },
            launch_steps: if self.launch.enable {
                self.launch
                    .steps
                    .iter()
                    .map(|s| LaunchStep::new(&s.target, Duration::from_millis(s.settle_ms)))
                    .collect()
            } else {
                Vec::new()
            },
        }
    }
}
