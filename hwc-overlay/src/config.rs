//! HAL configuration
//!
//! Tunables that a platform sets once at startup. Every field has a default,
//! so an empty JSON object is a valid configuration.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use hwc_api::geometry::ActionSafe;
use hwc_api::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Largest action-safe margin, in percent of an axis
pub const MAX_ACTION_SAFE_PERCENT: u32 = 50;
/// Smallest and largest framebuffer ring
pub const MIN_FRAMEBUFFERS: u32 = 2;
pub const MAX_FRAMEBUFFERS: u32 = 3;
/// Largest rotator intermediate ring
pub const MAX_ROTATOR_BUFFERS: u32 = 4;
/// Largest pipe bank a display can have
pub const MAX_BANK_PIPES: u32 = 8;

/// Pipe bank sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Pipes the primary panel may use
    pub primary: u32,
    /// Pipes shared by the external and virtual displays
    pub external: u32,
    /// Pipes in use across all displays at once
    pub max_total: u32,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self { primary: 2, external: 4, max_total: 4 }
    }
}

/// Configuration of the composition HAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    pub action_safe_width: u32,
    pub action_safe_height: u32,
    pub framebuffer_count: u32,
    pub swap_interval: u32,
    /// Forces the swap interval whatever the caller asks for
    pub swap_interval_override: Option<u32>,
    pub use_panel_3d: bool,
    pub true_mirroring: bool,
    pub pipes: PipeConfig,
    pub rotator_buffers: u32,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            action_safe_width: 0,
            action_safe_height: 0,
            framebuffer_count: MAX_FRAMEBUFFERS,
            swap_interval: 1,
            swap_interval_override: None,
            use_panel_3d: false,
            true_mirroring: false,
            pipes: PipeConfig::default(),
            rotator_buffers: 2,
        }
    }
}

impl HalConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HalConfig =
            serde_json::from_str(json).map_err(|e| Error::ConfigError(format!("invalid configuration: {}", e)))?;
        config.validated()
    }

    /// Load a configuration file, falling back to defaults when it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("config {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::ConfigError(format!("cannot read {}: {}", path.display(), e))),
        }
    }

    fn validated(mut self) -> Result<Self> {
        if self.action_safe_width > MAX_ACTION_SAFE_PERCENT || self.action_safe_height > MAX_ACTION_SAFE_PERCENT {
            return Err(Error::ConfigError(format!(
                "action safe margins {}x{} exceed {}%",
                self.action_safe_width, self.action_safe_height, MAX_ACTION_SAFE_PERCENT
            )));
        }
        if self.swap_interval > 1 {
            return Err(Error::ConfigError(format!("swap interval {} out of range", self.swap_interval)));
        }
        if let Some(forced) = self.swap_interval_override {
            if forced > 1 {
                return Err(Error::ConfigError(format!("swap interval override {} out of range", forced)));
            }
        }
        let pipes = self.pipes;
        if pipes.primary == 0 || pipes.primary > MAX_BANK_PIPES || pipes.external > MAX_BANK_PIPES {
            return Err(Error::ConfigError(format!("pipe banks {}/{} out of range", pipes.primary, pipes.external)));
        }
        if pipes.max_total < pipes.primary {
            return Err(Error::ConfigError(format!(
                "pipe total {} below the primary bank {}",
                pipes.max_total, pipes.primary
            )));
        }
        if self.rotator_buffers == 0 || self.rotator_buffers > MAX_ROTATOR_BUFFERS {
            return Err(Error::ConfigError(format!("rotator ring of {} buffers", self.rotator_buffers)));
        }

        let clamped = self.framebuffer_count.clamp(MIN_FRAMEBUFFERS, MAX_FRAMEBUFFERS);
        if clamped != self.framebuffer_count {
            debug!("framebuffer count {} clamped to {}", self.framebuffer_count, clamped);
            self.framebuffer_count = clamped;
        }
        Ok(self)
    }

    /// Action-safe margins for secondary display placement
    pub fn action_safe(&self) -> ActionSafe {
        ActionSafe::new(self.action_safe_width as f32, self.action_safe_height as f32)
    }
}
