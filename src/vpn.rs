//! VPN lifecycle and egress rotation.
//!
//! The controller owns the last-action instant; rotation is throttled by
//! the configured cooldown. Command failures are logged and never fatal,
//! so a broken VPN setup degrades to scraping over the current egress.

use std::time::Instant;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::VpnConfig;

/// Rotation controller holding the cooldown state for one run.
pub struct RotationController {
    config: Option<VpnConfig>,
    last_action: Option<Instant>,
}

impl RotationController {
    pub fn new(config: Option<VpnConfig>) -> Self {
        Self {
            config,
            last_action: None,
        }
    }

    fn enabled(&self) -> Option<&VpnConfig> {
        self.config.as_ref().filter(|c| c.enabled)
    }

    /// Run the configured start command, if any.
    pub async fn start(&mut self) {
        if let Some(config) = self.enabled() {
            let cmd = config.start_cmd.clone();
            let bin = config.vpn_bin.clone();
            self.run_action("start", &cmd, &bin).await;
        }
    }

    /// Run the configured stop command, if any.
    pub async fn stop(&mut self) {
        if let Some(config) = self.enabled() {
            let cmd = config.stop_cmd.clone();
            let bin = config.vpn_bin.clone();
            self.run_action("stop", &cmd, &bin).await;
        }
    }

    /// Rotate to a new egress node when the cooldown has elapsed.
    /// Rotation failure is logged; the caller proceeds regardless.
    pub async fn rotate_if_due(&mut self) {
        let Some(config) = self.enabled() else {
            return;
        };
        let cooldown = config.cooldown();
        let due = self
            .last_action
            .map_or(true, |at| at.elapsed() > cooldown);
        if !due {
            return;
        }
        let cmd = config.new_node_cmd.clone();
        let bin = config.vpn_bin.clone();
        self.run_action("new_node", &cmd, &bin).await;
    }

    async fn run_action(&mut self, action: &str, template: &str, vpn_bin: &str) {
        if template.is_empty() {
            return;
        }
        let command = template.replace("{vpn_bin}", vpn_bin);
        match Command::new("sh").arg("-c").arg(&command).status().await {
            Ok(status) if status.success() => {
                self.last_action = Some(Instant::now());
                info!(action, "VPN action executed");
            }
            Ok(status) => {
                warn!(action, %status, "VPN action failed");
            }
            Err(err) => {
                warn!(action, %err, "failed to spawn VPN command");
            }
        }
    }
}
