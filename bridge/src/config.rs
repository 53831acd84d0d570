use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::RendererVariant;
use crate::error::{BridgeError, BridgeResult};
use crate::notifier::NotifyStrategy;

/// Bridge configuration loaded from `lumen.toml`.
///
/// Every field has a default, so an empty file is valid.
///
/// ```toml
/// [session]
/// persistent_data = true
/// notifier = "callback"
///
/// [timing]
/// stats_interval_ms = 100
/// refresh_interval_ms = 10
///
/// [license]
/// renderer_variant = "gpu"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub session: SessionSettings,
    pub timing: TimingSettings,
    pub license: LicenseSettings,
}

/// Session behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Keep the scene graph alive between frames.
    pub persistent_data: bool,
    /// `"poll"` (default) or `"callback"`.
    pub notifier: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            persistent_data: false,
            notifier: "poll".into(),
        }
    }
}

/// Poll intervals and timeouts, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub stats_interval_ms: u64,
    pub refresh_interval_ms: u64,
    pub render_poll_interval_ms: u64,
    pub stop_lock_timeout_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            stats_interval_ms: 100,
            refresh_interval_ms: 10,
            render_poll_interval_ms: 20,
            stop_lock_timeout_ms: 3000,
            join_timeout_ms: 2000,
        }
    }
}

/// What preflight asks the license service for.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicenseSettings {
    pub required_feature: String,
    /// `"cpu"`, `"gpu"` or `"xpu"`.
    pub renderer_variant: String,
}

impl Default for LicenseSettings {
    fn default() -> Self {
        Self {
            required_feature: "render".into(),
            renderer_variant: "cpu".into(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml(content: &str) -> BridgeResult<Self> {
        let config: BridgeConfig =
            toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> BridgeResult<()> {
        if RendererVariant::parse(&self.license.renderer_variant).is_none() {
            return Err(BridgeError::Config(format!(
                "unknown renderer variant \"{}\"",
                self.license.renderer_variant
            )));
        }
        if !matches!(self.session.notifier.as_str(), "poll" | "callback") {
            return Err(BridgeError::Config(format!(
                "unknown notifier \"{}\" (expected \"poll\" or \"callback\")",
                self.session.notifier
            )));
        }
        if self.timing.refresh_interval_ms == 0 || self.timing.render_poll_interval_ms == 0 {
            return Err(BridgeError::Config("poll intervals must be non-zero".into()));
        }
        Ok(())
    }

    pub fn renderer_variant(&self) -> RendererVariant {
        RendererVariant::parse(&self.license.renderer_variant).unwrap_or(RendererVariant::Cpu)
    }

    pub fn notify_strategy(&self) -> NotifyStrategy {
        match self.session.notifier.as_str() {
            "callback" => NotifyStrategy::Callback,
            _ => NotifyStrategy::Poll {
                refresh: self.refresh_interval(),
            },
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.timing.stats_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.timing.refresh_interval_ms)
    }

    pub fn render_poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.render_poll_interval_ms)
    }

    pub fn stop_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.stop_lock_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.join_timeout_ms)
    }
}

/// Load a bridge config from a TOML file.
pub fn load_config(path: &Path) -> BridgeResult<BridgeConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    BridgeConfig::from_toml(&content).map_err(|e| match e {
        BridgeError::Config(msg) => {
            BridgeError::Config(format!("failed to parse {}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Load the config, falling back to defaults if the file is missing or
/// invalid.
pub fn load_or_default(path: &Path) -> BridgeConfig {
    match load_config(path) {
        Ok(config) => {
            log::info!("Loaded bridge config from {}", path.display());
            config
        }
        Err(e) => {
            log::warn!("No usable bridge config ({e}), using defaults");
            BridgeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BridgeConfig::from_toml("").unwrap();
        assert!(!config.session.persistent_data);
        assert_eq!(config.stats_interval(), Duration::from_millis(100));
        assert_eq!(
            config.notify_strategy(),
            NotifyStrategy::Poll {
                refresh: Duration::from_millis(10)
            }
        );
        assert_eq!(config.renderer_variant(), RendererVariant::Cpu);
    }

    #[test]
    fn test_partial_config() {
        let config = BridgeConfig::from_toml(
            r#"
            [session]
            persistent_data = true
            notifier = "callback"

            [timing]
            stop_lock_timeout_ms = 500

            [license]
            renderer_variant = "gpu"
            "#,
        )
        .unwrap();

        assert!(config.session.persistent_data);
        assert_eq!(config.notify_strategy(), NotifyStrategy::Callback);
        assert_eq!(config.stop_lock_timeout(), Duration::from_millis(500));
        assert_eq!(config.join_timeout(), Duration::from_millis(2000));
        assert_eq!(config.renderer_variant(), RendererVariant::Gpu);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(BridgeConfig::from_toml("[session]\nnotifier = \"vsync\"").is_err());
        assert!(BridgeConfig::from_toml("[license]\nrenderer_variant = \"tpu\"").is_err());
        assert!(BridgeConfig::from_toml("[timing]\nrefresh_interval_ms = 0").is_err());
        assert!(BridgeConfig::from_toml("timing = 3").is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = load_or_default(Path::new("/nonexistent/lumen.toml"));
        assert_eq!(config.timing.join_timeout_ms, 2000);
    }
}
