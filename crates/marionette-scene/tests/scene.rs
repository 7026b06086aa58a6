//! Headless app tests for the robot scene plugin, using the bundled desk robot

use bevy::pbr::wireframe::Wireframe;
use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use marionette_core::config::{FaultGroupConfig, RenderMode};
use marionette_core::{Config, PoseFrame};
use marionette_scene::appearance::{DIMMED_OPACITY, WARNING_COLOR};
use marionette_scene::models::ModelStatus;
use marionette_scene::{
    FaultState, FaultedSurface, MarionetteScenePlugin, PoseFeed, RenderSettings, RobotModel, ScanDriver, Surface,
    SurfaceShader,
};
use marionette_stream::PoseSlot;
use std::collections::HashMap;
use std::time::Duration;

/// Surfaces of the fault group anchored at the head
const HEAD_GROUP: [&str; 5] = [
    "head_frame",
    "head_shell",
    "camera_lens",
    "left_antenna_visual",
    "right_antenna_visual",
];

fn config() -> Config {
    let mut config = Config::default();
    config.model.asset_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../assets").to_string();
    config.model.path = "robot/robot.urdf".to_string();
    config.scan.enabled = false;
    config.fault_groups = vec![FaultGroupConfig {
        name: "head_assembly".to_string(),
        anchors: vec!["head".to_string()],
        members: Vec::new(),
    }];
    config
}

fn app(config: Config) -> App {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, AssetPlugin::default()))
        .init_asset::<Mesh>()
        .init_asset::<SurfaceShader>()
        .add_plugins(MarionetteScenePlugin::new(config));
    app
}

fn model_status(app: &mut App) -> Vec<ModelStatus> {
    let mut query = app.world_mut().query::<&ModelStatus>();
    query.iter(app.world()).copied().collect()
}

fn surface_materials(app: &mut App) -> HashMap<String, Handle<SurfaceShader>> {
    let mut query = app
        .world_mut()
        .query_filtered::<(&Name, &MeshMaterial3d<SurfaceShader>), With<Surface>>();
    query
        .iter(app.world())
        .map(|(name, material)| (name.to_string(), material.0.clone()))
        .collect()
}

fn material(app: &App, handle: &Handle<SurfaceShader>) -> SurfaceShader {
    app.world()
        .resource::<Assets<SurfaceShader>>()
        .get(handle)
        .cloned()
        .unwrap()
}

/// Names of surfaces currently drawn as wireframes, sorted
fn wireframed(app: &mut App) -> Vec<String> {
    let mut query = app
        .world_mut()
        .query_filtered::<(&Name, Has<Wireframe>), With<Surface>>();
    let mut names: Vec<String> = query
        .iter(app.world())
        .filter(|(_, edged)| *edged)
        .map(|(name, _)| name.to_string())
        .collect();
    names.sort();
    names
}

fn set_fault(app: &mut App, surface: Option<&str>) {
    app.world_mut().resource_mut::<FaultedSurface>().0 = surface.map(str::to_string);
    app.update();
}

#[test]
fn test_model_spawns_ready() {
    let mut app = app(config());
    app.update();

    assert_eq!(model_status(&mut app), vec![ModelStatus::Ready]);
    let mut surfaces = app.world_mut().query::<&Surface>();
    assert_eq!(surfaces.iter(app.world()).count(), 12);
}

#[test]
fn test_scan_starts_when_ready() {
    let mut config = config();
    config.scan.enabled = true;
    let mut app = app(config);
    app.update();

    assert!(app.world().resource::<ScanDriver>().sequencer.is_active());
    assert_eq!(app.world().resource::<RenderSettings>().mode, RenderMode::XRay);
}

#[test]
fn test_pose_feed_moves_body() {
    let mut app = app(config());
    let slot = PoseSlot::default();
    app.insert_resource(PoseFeed::new(slot.clone(), 1));
    app.update();

    let torso = |app: &mut App| {
        let mut query = app.world_mut().query::<(&Name, &Transform)>();
        query
            .iter(app.world())
            .find(|(name, _)| name.as_str() == "torso")
            .map(|(_, t)| *t)
            .unwrap()
    };
    let before = torso(&mut app);

    assert!(slot.publish(PoseFrame::new(Some([0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]), None, [0.1, -0.1])));
    app.update();

    let mut models = app.world_mut().query::<&RobotModel>();
    let model = models.single(app.world()).unwrap();
    assert!((model.kinematics.joint_value("yaw_body").unwrap() - 0.5).abs() < 1e-6);
    let after = torso(&mut app);
    assert!(before.rotation.angle_between(after.rotation) > 0.4);
}

#[test]
fn test_fault_highlight_and_clear() {
    let mut app = app(config());
    app.update();
    let before = surface_materials(&mut app);
    assert_eq!(before.len(), 12);

    set_fault(&mut app, Some("camera_lens"));

    let state = app.world().resource::<FaultState>();
    assert!(state.is_active());
    assert_eq!(state.group().len(), HEAD_GROUP.len());
    assert!(app.world().resource::<marionette_scene::CameraRig>().controller.fault().is_some());

    let during = surface_materials(&mut app);
    let warning = Color::srgb(WARNING_COLOR[0], WARNING_COLOR[1], WARNING_COLOR[2]);
    for (name, handle) in &during {
        assert_ne!(handle, &before[name], "{name} kept its material");
        let shown = material(&app, handle);
        if HEAD_GROUP.contains(&name.as_str()) {
            assert_eq!(shown.base.base_color, warning, "{name} not highlighted");
        } else {
            assert_eq!(shown.base.base_color.alpha(), DIMMED_OPACITY, "{name} not dimmed");
        }
    }

    set_fault(&mut app, None);

    assert!(!app.world().resource::<FaultState>().is_active());
    assert!(app.world().resource::<marionette_scene::CameraRig>().controller.fault().is_none());
    assert_eq!(surface_materials(&mut app), before);
}

#[test]
fn test_fault_in_wireframe_mode_hides_and_restores_edges() {
    let mut config = config();
    config.appearance.mode = RenderMode::Wireframe;
    let mut app = app(config);
    app.update();

    // Antennas stay flat in every mode
    let edged = wireframed(&mut app);
    assert_eq!(edged.len(), 10);
    assert!(!edged.contains(&"left_antenna_visual".to_string()));

    set_fault(&mut app, Some("camera_lens"));
    assert!(wireframed(&mut app).is_empty());

    set_fault(&mut app, None);
    assert_eq!(wireframed(&mut app), edged);
}

#[test]
fn test_mode_switch_during_fault_waits_for_clear() {
    let mut app = app(config());
    app.update();
    set_fault(&mut app, Some("camera_lens"));
    let during = surface_materials(&mut app);

    app.world_mut().resource_mut::<RenderSettings>().mode = RenderMode::Wireframe;
    app.update();

    // The fault look and its solid fills stay until the fault clears
    assert!(wireframed(&mut app).is_empty());
    assert_eq!(surface_materials(&mut app), during);

    set_fault(&mut app, None);
    assert_eq!(wireframed(&mut app).len(), 10);
    let after = surface_materials(&mut app);
    assert_eq!(material(&app, &after["torso"]).base.base_color.alpha(), 0.0);
}

#[test]
fn test_unknown_fault_is_ignored() {
    let mut config = config();
    config.fault_surface = Some("no_such_surface".to_string());
    let mut app = app(config);
    app.update();

    assert!(!app.world().resource::<FaultState>().is_active());
    assert!(app.world().resource::<marionette_scene::CameraRig>().controller.fault().is_none());
}

fn scanning_app(mode: RenderMode) -> App {
    let mut config = config();
    config.appearance.mode = mode;
    config.scan.enabled = true;
    config.scan.total_duration_secs = 0.5;
    config.scan.per_surface_secs = 0.2;
    let mut app = app(config);
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(50)));
    app
}

fn run_scan_to_end(app: &mut App) {
    for _ in 0..100 {
        app.update();
        if !app.world().resource::<ScanDriver>().sequencer.is_active() {
            return;
        }
    }
    panic!("scan never finished");
}

#[test]
fn test_scan_restores_previous_mode() {
    let mut app = scanning_app(RenderMode::Shaded);
    app.update();
    assert!(app.world().resource::<ScanDriver>().sequencer.is_active());
    assert_eq!(app.world().resource::<RenderSettings>().mode, RenderMode::XRay);

    run_scan_to_end(&mut app);
    assert_eq!(app.world().resource::<RenderSettings>().mode, RenderMode::Shaded);

    // The mode pass runs on the next frame and puts shaded materials back
    app.update();
    let torso = surface_materials(&mut app)["torso"].clone();
    assert!(!material(&app, &torso).base.unlit);
}

#[test]
fn test_mode_chosen_during_scan_wins() {
    let mut app = scanning_app(RenderMode::Shaded);
    app.update();
    app.world_mut().resource_mut::<RenderSettings>().mode = RenderMode::Wireframe;

    run_scan_to_end(&mut app);
    assert_eq!(app.world().resource::<RenderSettings>().mode, RenderMode::Wireframe);
}
