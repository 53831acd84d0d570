//! Command line arguments.
//!
//! Uses clap for parsing with:
//! - Help text (`--help`)
//! - Validation and clear error messages
//! - Warnings for options that have no effect in the selected mode

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lumen_bridge::{NotifyStrategy, RenderMode};

/// Render mode selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliMode {
    /// Final frame render (blocking).
    #[default]
    Batch,
    /// Texture bake (blocking).
    Bake,
    /// Material preview swatch (blocking).
    Swatch,
    /// Render for an external display driver (blocking).
    External,
    /// Interactive render in a render window.
    Live,
    /// Interactive render inside the viewport.
    Viewport,
}

impl From<CliMode> for RenderMode {
    fn from(cli: CliMode) -> Self {
        match cli {
            CliMode::Batch => RenderMode::Batch,
            CliMode::Bake => RenderMode::Bake,
            CliMode::Swatch => RenderMode::Swatch,
            CliMode::External => RenderMode::External,
            CliMode::Live => RenderMode::Live,
            CliMode::Viewport => RenderMode::Viewport,
        }
    }
}

/// Redraw notification strategy for interactive renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliNotifier {
    /// Poll the engine's buffer-updated flag at the configured refresh rate.
    Poll,
    /// Let the engine call back on every redraw.
    Callback,
}

/// Lumen render bridge host.
#[derive(Parser, Debug)]
#[command(
    name = "lumen-render",
    about = "Drive render sessions against the Lumen bridge",
    long_about = "Runs render sessions through the Lumen bridge using the in-process \
        dummy engine.\n\n\
        EXAMPLES:\n\
          # Render three frames keeping the scene graph between them\n\
          lumen-render --mode batch --frames 3 --persistent\n\
        \n\
          # Run a live render for two seconds with engine redraw callbacks\n\
          lumen-render --mode live --live-ms 2000 --notifier callback",
    version
)]
struct ClapArgs {
    /// Bridge configuration file.
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,

    /// Render mode.
    #[arg(long, default_value = "batch", value_enum)]
    mode: CliMode,

    /// Number of frames to render (blocking modes).
    #[arg(long, default_value = "1")]
    frames: u32,

    /// Keep the scene graph alive between frames (batch only).
    #[arg(long)]
    persistent: bool,

    /// Output width in pixels.
    #[arg(long, default_value = "320")]
    width: u32,

    /// Output height in pixels.
    #[arg(long, default_value = "180")]
    height: u32,

    /// How long an interactive render runs before it is stopped.
    #[arg(long, default_value = "1000")]
    live_ms: u64,

    /// Override the configured notifier (interactive modes).
    #[arg(long, value_enum)]
    notifier: Option<CliNotifier>,
}

/// Parsed and checked command line.
#[derive(Debug, Clone)]
pub struct RenderArgs {
    pub config: PathBuf,
    pub mode: RenderMode,
    pub frames: u32,
    pub persistent: bool,
    pub width: u32,
    pub height: u32,
    pub live_duration: Duration,
    pub notifier: Option<CliNotifier>,
}

impl RenderArgs {
    pub fn parse() -> Self {
        ClapArgs::parse().into()
    }

    /// Notifier override resolved against the configured refresh interval.
    pub fn notify_strategy(&self, refresh: Duration) -> Option<NotifyStrategy> {
        self.notifier.map(|notifier| match notifier {
            CliNotifier::Poll => NotifyStrategy::Poll { refresh },
            CliNotifier::Callback => NotifyStrategy::Callback,
        })
    }
}

impl From<ClapArgs> for RenderArgs {
    fn from(args: ClapArgs) -> Self {
        let mode = RenderMode::from(args.mode);

        if args.persistent && mode != RenderMode::Batch {
            log::warn!("--persistent has no effect when --mode is '{:?}'", args.mode);
        }
        if args.notifier.is_some() && !mode.is_interactive() {
            log::warn!(
                "--notifier only applies to live and viewport renders, not '{:?}'",
                args.mode
            );
        }
        if args.frames > 1 && mode.is_interactive() {
            log::warn!("--frames is ignored for interactive renders");
        }

        Self {
            config: args.config,
            mode,
            frames: args.frames.max(1),
            persistent: args.persistent,
            width: args.width,
            height: args.height,
            live_duration: Duration::from_millis(args.live_ms),
            notifier: args.notifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RenderArgs {
        let mut argv = vec!["lumen-render"];
        argv.extend_from_slice(args);
        ClapArgs::parse_from(argv).into()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.mode, RenderMode::Batch);
        assert_eq!(args.frames, 1);
        assert!(!args.persistent);
        assert_eq!(args.config, PathBuf::from("lumen.toml"));
        assert!(args.notify_strategy(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_live_with_callback_notifier() {
        let args = parse(&["--mode", "live", "--notifier", "callback", "--live-ms", "250"]);
        assert_eq!(args.mode, RenderMode::Live);
        assert_eq!(args.live_duration, Duration::from_millis(250));
        assert_eq!(
            args.notify_strategy(Duration::from_millis(10)),
            Some(NotifyStrategy::Callback)
        );
    }

    #[test]
    fn test_zero_frames_clamped() {
        assert_eq!(parse(&["--frames", "0"]).frames, 1);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(ClapArgs::try_parse_from(["lumen-render", "--mode", "preview"]).is_err());
    }
}
