//! Configuration for the bridge and its factory registry

use rtc_engine::{IceServer, PriorityType};
use serde::{Deserialize, Serialize};

use callback_queue::DEFAULT_WARN_THRESHOLD;

use crate::error::{BridgeError, Result};

/// Default name of the engine worker thread
pub const DEFAULT_WORKER_THREAD_NAME: &str = "rtc-bridge-worker";

/// Configuration for [`RtcBridge`](crate::RtcBridge) and
/// [`ConnectionFactoryRegistry`](crate::ConnectionFactoryRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Name given to the engine worker thread
    /// Default: "rtc-bridge-worker"
    pub worker_thread_name: String,

    /// Create an audio device module alongside the factory
    /// Default: true
    pub use_audio_device: bool,

    /// Pending callback count at which the queue logs a warning
    /// Default: 10000
    pub queue_warn_threshold: usize,

    /// ICE servers used when a peer connection is created without any
    /// Default: none
    pub default_ice_servers: Vec<IceServer>,

    /// Priority of data channels created without an explicit init
    /// Default: low
    pub default_data_channel_priority: PriorityType,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
            use_audio_device: true,
            queue_warn_threshold: DEFAULT_WARN_THRESHOLD,
            default_ice_servers: Vec::new(),
            default_data_channel_priority: PriorityType::Low,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for hosts without audio hardware
    pub fn headless() -> Self {
        Self {
            use_audio_device: false,
            ..Default::default()
        }
    }

    /// Configuration using a public STUN server for every connection
    pub fn with_public_stun() -> Self {
        Self {
            default_ice_servers: vec![IceServer::new(vec![
                "stun:stun.l.google.com:19302".to_string(),
            ])],
            ..Default::default()
        }
    }

    /// Parse a JSON configuration and validate it
    ///
    /// Missing fields take their default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.worker_thread_name.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "Worker thread name must not be empty".to_string(),
            ));
        }

        if self.worker_thread_name.contains('\0') {
            return Err(BridgeError::Configuration(
                "Worker thread name must not contain NUL bytes".to_string(),
            ));
        }

        if self.queue_warn_threshold == 0 {
            return Err(BridgeError::Configuration(
                "Queue warning threshold must be greater than 0".to_string(),
            ));
        }

        for server in &self.default_ice_servers {
            if server.urls.is_empty() {
                return Err(BridgeError::Configuration(
                    "Default ICE server has no urls".to_string(),
                ));
            }
            if let Some(url) = server.urls.iter().find(|url| !is_ice_url(url)) {
                return Err(BridgeError::Configuration(format!(
                    "Unsupported ICE server url: {url}"
                )));
            }
        }

        Ok(())
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    pub fn with_audio_device(mut self, enabled: bool) -> Self {
        self.use_audio_device = enabled;
        self
    }

    pub fn with_queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.queue_warn_threshold = threshold;
        self
    }

    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.default_ice_servers.push(server);
        self
    }

    pub fn with_data_channel_priority(mut self, priority: PriorityType) -> Self {
        self.default_data_channel_priority = priority;
        self
    }
}

fn is_ice_url(url: &str) -> bool {
    ["stun:", "stuns:", "turn:", "turns:"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}
