//! Marionette Scene - robot avatar rendering
//!
//! Poses a kinematic robot model from streamed joint telemetry and renders
//! it in shaded, x-ray or wireframe mode, with a scan reveal, fault
//! highlighting and several camera behaviors.
//!
//! Surfaces draw with the [`shading::SurfaceShader`] material; windowed apps
//! add [`SurfaceShadingPlugin`] to get its render pipeline.
//!
//! The pure state machines (`kinematics`, `appearance`, `scan`, `camera`,
//! `focus`) carry no ECS state; `models`, `scene` and `presentation` wire
//! them into Bevy.

pub mod appearance;
pub mod camera;
pub mod focus;
pub mod kinematics;
pub mod models;
pub mod presentation;
pub mod scan;
pub mod scene;
pub mod shading;

use bevy::prelude::*;
use marionette_core::Config;

/// Every surface mesh of a model has loaded or failed
#[derive(Message, Debug, Clone)]
pub struct MeshesReady {
    pub model: Entity,
    pub surfaces: Vec<String>,
}

/// A model is posed, textured and bounded
#[derive(Message, Debug, Clone)]
pub struct ModelReady {
    pub model: Entity,
    pub surfaces: usize,
}

/// The scan reached a new surface (`index` is 1-based)
#[derive(Message, Debug, Clone)]
pub struct ScanSurface {
    pub surface: SurfaceId,
    pub name: String,
    pub index: usize,
    pub total: usize,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct ScanComplete;

/// Plugin that sets up the robot scene from a loaded configuration
pub struct MarionetteScenePlugin {
    pub config: Config,
}

impl MarionetteScenePlugin {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Plugin for MarionetteScenePlugin {
    fn build(&self, app: &mut App) {
        let config = &self.config;
        app.insert_resource(ModelSettings {
            asset_dir: config.model.asset_dir.clone().into(),
            description: config.model.path.clone(),
            joint_names: config.joints.clone(),
            family_rules: config.family_rules(),
            tolerance: config.stream.tolerance,
        })
        .insert_resource(RenderSettings::new(config.appearance.clone()))
        .insert_resource(CameraRig::new(config.camera.clone()))
        .insert_resource(ScanDriver::new(
            ScanSequencer::new(ScanSettings::from_config(&config.scan)),
            config.scan.enabled,
        ))
        .insert_resource(FaultedSurface(config.fault_surface.clone()))
        .insert_resource(FaultGroups(config.fault_groups.clone()))
        .add_message::<MeshesReady>()
        .add_message::<ModelReady>()
        .add_message::<ScanSurface>()
        .add_message::<ScanComplete>()
        .add_plugins(scene::SceneSetupPlugin)
        .add_plugins(models::ModelsPlugin)
        .add_plugins(presentation::PresentationPlugin);
    }
}

// Re-export commonly used types
pub use appearance::{MaterialCache, SurfaceMaterial, XRayVariant};
pub use camera::{CameraController, CameraPose};
pub use kinematics::{KinematicModel, SurfaceId, SurfaceInfo};
pub use models::{DespawnModel, ModelSettings, PoseFeed, RobotModel, Surface};
pub use presentation::{FaultGroups, FaultState, FaultedSurface, RenderSettings, ScanCommand, ScanDriver};
pub use scan::{ScanSequencer, ScanSettings};
pub use scene::{CameraRig, MainCamera};
pub use shading::{SurfaceShader, SurfaceShadingPlugin};
