//! Marionette Viewer - Main entry point
//!
//! Connects to the robot's telemetry stream and renders the live avatar.

mod controls;

use anyhow::Result;
use bevy::asset::AssetMetaCheck;
use bevy::pbr::wireframe::WireframePlugin;
use bevy::prelude::*;
use bevy::render::settings::{RenderCreation, WgpuFeatures, WgpuSettings};
use bevy::render::RenderPlugin;
use clap::{Parser, ValueEnum};
use marionette_core::config::{self, CameraMode, RenderMode};
use marionette_scene::{MarionetteScenePlugin, PoseFeed, SurfaceShadingPlugin};
use marionette_stream::{PoseStreamClient, StreamSettings};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use controls::{ControlsPlugin, StreamHandle};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Shaded,
    Xray,
    Wireframe,
}

impl From<ModeArg> for RenderMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Shaded => RenderMode::Shaded,
            ModeArg::Xray => RenderMode::XRay,
            ModeArg::Wireframe => RenderMode::Wireframe,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CameraArg {
    Free,
    Cinematic,
    HeadLocked,
}

impl From<CameraArg> for CameraMode {
    fn from(arg: CameraArg) -> Self {
        match arg {
            CameraArg::Free => CameraMode::Free,
            CameraArg::Cinematic => CameraMode::Cinematic,
            CameraArg::HeadLocked => CameraMode::HeadLocked,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "marionette")]
#[command(about = "Live robot avatar viewer driven by joint telemetry")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "marionette.toml")]
    config: PathBuf,

    /// Telemetry WebSocket URL
    #[arg(short, long)]
    url: Option<String>,

    /// Robot description, relative to the asset directory
    #[arg(short, long)]
    model: Option<String>,

    /// Asset directory holding the description and meshes
    #[arg(long)]
    asset_dir: Option<String>,

    /// Initial render mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Initial camera behavior
    #[arg(long, value_enum)]
    camera: Option<CameraArg>,

    /// Do not run the scan reveal when the model is ready
    #[arg(long)]
    no_scan: bool,

    /// Surface to show as faulted at startup
    #[arg(long)]
    fault: Option<String>,

    /// Start with the telemetry stream disconnected
    #[arg(long)]
    offline: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    write_default_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Marionette v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Default configuration written");
        return Ok(());
    }

    // Load configuration, then apply command line overrides
    let mut config = config::load_config(&args.config)?;
    if let Some(url) = args.url {
        config.stream.url = url;
    }
    if let Some(model) = args.model {
        config.model.path = model;
    }
    if let Some(asset_dir) = args.asset_dir {
        config.model.asset_dir = asset_dir;
    }
    if let Some(mode) = args.mode {
        config.appearance.mode = mode.into();
    }
    if let Some(camera) = args.camera {
        config.camera.mode = camera.into();
    }
    if args.no_scan {
        config.scan.enabled = false;
    }
    if args.fault.is_some() {
        config.fault_surface = args.fault;
    }
    if args.offline {
        config.stream.active = false;
    }

    // Asset paths resolve against the working directory, not the binary
    let asset_dir = PathBuf::from(&config.model.asset_dir);
    if asset_dir.is_relative() {
        config.model.asset_dir = std::env::current_dir()?
            .join(asset_dir)
            .to_string_lossy()
            .into_owned();
    }

    info!(
        url = %config.stream.url,
        model = %config.model.path,
        mode = ?config.appearance.mode,
        camera = ?config.camera.mode,
        "Configuration loaded"
    );

    // The stream runs on its own runtime; Bevy owns the main thread
    let runtime = tokio::runtime::Runtime::new()?;
    let client = PoseStreamClient::new(StreamSettings::from_config(&config.stream));
    client.spawn_on(runtime.handle());
    client.connect(config.stream.active);
    let feed = PoseFeed::new(client.slot(), config.stream.apply_interval);

    let exit = App::new()
        .insert_resource(ClearColor(Color::srgb(0.08, 0.08, 0.1)))
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "Marionette".to_string(),
                        ..default()
                    }),
                    ..default()
                })
                .set(AssetPlugin {
                    file_path: config.model.asset_dir.clone(),
                    meta_check: AssetMetaCheck::Never,
                    ..default()
                })
                .set(RenderPlugin {
                    // Wireframe mode draws polygon lines
                    render_creation: RenderCreation::Automatic(WgpuSettings {
                        features: WgpuFeatures::POLYGON_MODE_LINE,
                        ..default()
                    }),
                    ..default()
                })
                .disable::<bevy::log::LogPlugin>(),
        )
        .add_plugins((WireframePlugin::default(), SurfaceShadingPlugin))
        .add_plugins(MarionetteScenePlugin::new(config))
        .insert_resource(feed)
        .insert_resource(StreamHandle(client))
        .add_plugins(ControlsPlugin)
        .run();

    info!(?exit, "Viewer closed");
    runtime.shutdown_background();
    Ok(())
}
