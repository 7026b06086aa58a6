//! Viewer configuration file model and loading

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::surface::{default_family_rules, FamilyRule};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Surface (visual) name to flag as faulted at startup
    #[serde(default)]
    pub fault_surface: Option<String>,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub joints: JointNames,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub appearance: AppearanceConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    /// Named anatomical groups used to expand a faulted surface
    #[serde(default, rename = "fault_group")]
    pub fault_groups: Vec<FaultGroupConfig>,
    /// Family rules; empty means the built-in rules
    #[serde(default, rename = "family_rule")]
    pub family_rules: Vec<FamilyRule>,
}

impl Config {
    pub fn family_rules(&self) -> Vec<FamilyRule> {
        if self.family_rules.is_empty() {
            default_family_rules()
        } else {
            self.family_rules.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Telemetry WebSocket URL
    #[serde(default = "default_stream_url")]
    pub url: String,
    /// Delay before reconnecting after the connection drops
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Per-element tolerance for change suppression (radians)
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Apply network state every Nth render frame
    #[serde(default = "default_apply_interval")]
    pub apply_interval: u32,
    /// Start streaming immediately
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            tolerance: default_tolerance(),
            apply_interval: default_apply_interval(),
            active: true,
        }
    }
}

fn default_stream_url() -> String {
    "ws://127.0.0.1:8000/api/state/ws/full".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_tolerance() -> f32 {
    crate::telemetry::POSE_TOLERANCE
}

fn default_apply_interval() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the robot description, relative to the asset directory
    #[serde(default = "default_model_path")]
    pub path: String,
    /// Asset directory the description and its meshes are loaded from
    #[serde(default = "default_asset_dir")]
    pub asset_dir: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            asset_dir: default_asset_dir(),
        }
    }
}

fn default_model_path() -> String {
    "robot/robot.urdf".to_string()
}

fn default_asset_dir() -> String {
    "assets".to_string()
}

/// Joint names the telemetry channels are written to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointNames {
    #[serde(default = "default_body_yaw")]
    pub body_yaw: String,
    #[serde(default = "default_stewart")]
    pub stewart: Vec<String>,
    #[serde(default = "default_passive")]
    pub passive: Vec<String>,
    #[serde(default = "default_left_antenna")]
    pub left_antenna: String,
    #[serde(default = "default_right_antenna")]
    pub right_antenna: String,
    /// Link the head-locked camera follows
    #[serde(default = "default_head_link")]
    pub head_link: String,
}

impl Default for JointNames {
    fn default() -> Self {
        Self {
            body_yaw: default_body_yaw(),
            stewart: default_stewart(),
            passive: default_passive(),
            left_antenna: default_left_antenna(),
            right_antenna: default_right_antenna(),
            head_link: default_head_link(),
        }
    }
}

fn default_body_yaw() -> String {
    "yaw_body".to_string()
}

fn default_stewart() -> Vec<String> {
    (1..=6).map(|i| format!("stewart_{}", i)).collect()
}

fn default_passive() -> Vec<String> {
    (1..=7)
        .flat_map(|i| ["x", "y", "z"].map(|axis| format!("passive_{}_{}", i, axis)))
        .collect()
}

fn default_left_antenna() -> String {
    "left_antenna".to_string()
}

fn default_right_antenna() -> String {
    "right_antenna".to_string()
}

fn default_head_link() -> String {
    "head".to_string()
}

/// Which camera behavior drives the view when no fault is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    #[default]
    Free,
    Cinematic,
    HeadLocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraPreset {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub fov_degrees: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for CameraPreset {
    fn default() -> Self {
        Self {
            position: [0.35, -0.35, 0.3],
            target: [0.0, 0.0, 0.18],
            fov_degrees: 50.0,
            min_distance: 0.2,
            max_distance: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CinematicVariant {
    /// Slow single-axis rotation at fixed radius and height
    #[default]
    Orbit,
    /// Eased sweep between two (radius, angle, height) points
    Sweep,
}

/// Point on a cylinder around the look-at target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArcPoint {
    pub radius: f32,
    /// Angle around the vertical axis (radians)
    pub angle: f32,
    /// Height above the ground plane
    pub height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CinematicConfig {
    pub variant: CinematicVariant,
    pub duration_secs: f32,
    pub radius: f32,
    pub height: f32,
    pub start_angle: f32,
    /// Total rotation over the duration for the orbit variant (radians)
    pub sweep_angle: f32,
    pub from: ArcPoint,
    pub to: ArcPoint,
    pub target: [f32; 3],
}

impl Default for CinematicConfig {
    fn default() -> Self {
        Self {
            variant: CinematicVariant::Orbit,
            duration_secs: 8.0,
            radius: 0.45,
            height: 0.25,
            start_angle: -std::f32::consts::FRAC_PI_4,
            sweep_angle: std::f32::consts::FRAC_PI_2,
            from: ArcPoint {
                radius: 0.6,
                angle: -1.2,
                height: 0.4,
            },
            to: ArcPoint {
                radius: 0.4,
                angle: -0.6,
                height: 0.22,
            },
            target: [0.0, 0.0, 0.18],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadLockedConfig {
    /// Follow the head link; when false the camera holds the fixed pose
    pub locked: bool,
    /// Camera offset from the head link origin, expressed in the head frame
    pub offset: [f32; 3],
    /// Per-frame lerp factor toward the followed pose (0..1)
    pub smoothing: f32,
    pub fixed_position: [f32; 3],
    pub fixed_target: [f32; 3],
}

impl Default for HeadLockedConfig {
    fn default() -> Self {
        Self {
            locked: true,
            offset: [0.3, 0.0, 0.05],
            smoothing: 0.1,
            fixed_position: [0.4, 0.0, 0.25],
            fixed_target: [0.0, 0.0, 0.2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusFraming {
    /// Fixed offset from the fault target
    Offset,
    /// Position on the current orbit circle facing the fault
    #[default]
    Orbit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub duration_secs: f32,
    pub framing: FocusFraming,
    pub offset: [f32; 3],
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            duration_secs: 1.5,
            framing: FocusFraming::Orbit,
            offset: [0.25, -0.25, 0.15],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub mode: CameraMode,
    #[serde(default)]
    pub preset: CameraPreset,
    #[serde(default)]
    pub cinematic: CinematicConfig,
    #[serde(default)]
    pub head_locked: HeadLockedConfig,
    #[serde(default)]
    pub focus: FocusConfig,
}

/// Surface presentation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Shaded,
    #[serde(rename = "xray", alias = "x_ray")]
    XRay,
    Wireframe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineParams {
    pub color: [f32; 3],
    /// Width of the silhouette band, 0..1 of the grazing angle range
    pub thickness: f32,
}

/// Banded lighting parameters for the shaded mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadedParams {
    pub bands: u32,
    /// Softness of the band edges (0 = hard steps)
    pub smoothing: f32,
    pub rim_intensity: f32,
    pub ambient_intensity: f32,
    pub specular_intensity: f32,
    #[serde(default)]
    pub outline: Option<OutlineParams>,
}

impl Default for ShadedParams {
    fn default() -> Self {
        Self {
            bands: 3,
            smoothing: 0.08,
            rim_intensity: 0.35,
            ambient_intensity: 0.4,
            specular_intensity: 0.15,
            outline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XRayParams {
    pub opacity: f32,
    pub rim_intensity: f32,
    /// Exponent of the Fresnel falloff
    pub rim_power: f32,
}

impl Default for XRayParams {
    fn default() -> Self {
        Self {
            opacity: 0.25,
            rim_intensity: 0.6,
            rim_power: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppearanceConfig {
    #[serde(default)]
    pub mode: RenderMode,
    #[serde(default)]
    pub shaded: ShadedParams,
    #[serde(default)]
    pub xray: XRayParams,
    #[serde(default = "default_wireframe_color")]
    pub wireframe_color: [f32; 3],
}

fn default_wireframe_color() -> [f32; 3] {
    [0.55, 0.8, 1.0]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Nominal duration of a whole run
    #[serde(default = "default_scan_total")]
    pub total_duration_secs: f32,
    /// Highlight-then-fade duration of one surface
    #[serde(default = "default_scan_per_surface")]
    pub per_surface_secs: f32,
    /// Share of the per-surface duration spent in the pulsing highlight
    #[serde(default = "default_scan_ratio")]
    pub scan_ratio: f32,
    #[serde(default = "default_pulse_hz")]
    pub pulse_hz: f32,
    #[serde(default = "default_highlight_color")]
    pub highlight_color: [f32; 3],
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            total_duration_secs: default_scan_total(),
            per_surface_secs: default_scan_per_surface(),
            scan_ratio: default_scan_ratio(),
            pulse_hz: default_pulse_hz(),
            highlight_color: default_highlight_color(),
        }
    }
}

fn default_scan_total() -> f32 {
    6.0
}

fn default_scan_per_surface() -> f32 {
    0.8
}

fn default_scan_ratio() -> f32 {
    0.45
}

fn default_pulse_hz() -> f32 {
    6.0
}

fn default_highlight_color() -> [f32; 3] {
    [0.2, 1.0, 0.6]
}

/// Named anatomical group for fault expansion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultGroupConfig {
    pub name: String,
    /// Links whose descendants belong to the group
    #[serde(default)]
    pub anchors: Vec<String>,
    /// Explicit surface (visual) names in the group
    #[serde(default)]
    pub members: Vec<String>,
}

/// Load configuration from file, falling back to defaults when it is absent
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<(), ConfigError> {
    let config = Config {
        fault_groups: vec![
            FaultGroupConfig {
                name: "head_assembly".to_string(),
                anchors: vec!["head".to_string()],
                members: Vec::new(),
            },
            FaultGroupConfig {
                name: "camera_module".to_string(),
                anchors: vec!["camera".to_string()],
                members: Vec::new(),
            },
        ],
        family_rules: default_family_rules(),
        ..Config::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
