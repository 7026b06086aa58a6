//! Keyboard controls and progress logging

use bevy::prelude::*;
use marionette_core::config::{CameraMode, RenderMode};
use marionette_scene::{
    CameraRig, FaultedSurface, MeshesReady, ModelReady, PoseFeed, RenderSettings, ScanCommand, ScanComplete,
    ScanSurface,
};
use marionette_stream::PoseStreamClient;
use tracing::info;

/// How often stream statistics are logged
const STATS_INTERVAL_SECS: f32 = 10.0;

/// Owns the telemetry client so it lives as long as the app
#[derive(Resource)]
pub struct StreamHandle(pub PoseStreamClient);

#[derive(Resource)]
struct StatsTimer(Timer);

pub struct ControlsPlugin;

impl Plugin for ControlsPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(StatsTimer(Timer::from_seconds(STATS_INTERVAL_SECS, TimerMode::Repeating)))
            .add_systems(Update, (keyboard_controls, log_progress, log_stream_stats));
    }
}

fn next_render_mode(mode: RenderMode) -> RenderMode {
    match mode {
        RenderMode::Shaded => RenderMode::XRay,
        RenderMode::XRay => RenderMode::Wireframe,
        RenderMode::Wireframe => RenderMode::Shaded,
    }
}

fn next_camera_mode(mode: CameraMode) -> CameraMode {
    match mode {
        CameraMode::Free => CameraMode::Cinematic,
        CameraMode::Cinematic => CameraMode::HeadLocked,
        CameraMode::HeadLocked => CameraMode::Free,
    }
}

/// M: render mode, C: camera mode, S/X: start/cancel scan, T: stream on/off,
/// F: clear fault
fn keyboard_controls(
    keys: Res<ButtonInput<KeyCode>>,
    mut render: ResMut<RenderSettings>,
    mut rig: ResMut<CameraRig>,
    mut fault: ResMut<FaultedSurface>,
    stream: Res<StreamHandle>,
    mut scan: MessageWriter<ScanCommand>,
) {
    if keys.just_pressed(KeyCode::KeyM) {
        render.mode = next_render_mode(render.mode);
        info!(mode = ?render.mode, "Render mode selected");
    }
    if keys.just_pressed(KeyCode::KeyC) {
        let mode = next_camera_mode(rig.controller.mode());
        rig.set_mode(mode);
    }
    if keys.just_pressed(KeyCode::KeyS) {
        scan.write(ScanCommand::Start);
    }
    if keys.just_pressed(KeyCode::KeyX) {
        scan.write(ScanCommand::Cancel);
    }
    if keys.just_pressed(KeyCode::KeyT) {
        let client = &stream.0;
        client.connect(!client.is_active());
    }
    if keys.just_pressed(KeyCode::KeyF) && fault.0.is_some() {
        fault.0 = None;
    }
}

fn log_progress(
    mut meshes: MessageReader<MeshesReady>,
    mut ready: MessageReader<ModelReady>,
    mut scanned: MessageReader<ScanSurface>,
    mut complete: MessageReader<ScanComplete>,
) {
    for message in meshes.read() {
        info!(surfaces = message.surfaces.len(), "Meshes loaded");
    }
    for message in ready.read() {
        info!(surfaces = message.surfaces, "Model ready");
    }
    for message in scanned.read() {
        info!(surface = %message.name, index = message.index, total = message.total, "Scanned");
    }
    for _ in complete.read() {
        info!("Scan finished");
    }
}

fn log_stream_stats(time: Res<Time>, mut timer: ResMut<StatsTimer>, feed: Res<PoseFeed>) {
    if !timer.0.tick(time.delta()).just_finished() {
        return;
    }
    let slot = feed.slot();
    let stats = slot.stats();
    info!(
        connected = slot.is_connected(),
        received = stats.frames_received,
        rejected = stats.frames_rejected,
        suppressed = stats.frames_suppressed,
        published = stats.frames_published,
        reconnects = stats.reconnects,
        "Telemetry stream"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_cycles_return_to_start() {
        let mut mode = RenderMode::Shaded;
        for _ in 0..3 {
            mode = next_render_mode(mode);
        }
        assert_eq!(mode, RenderMode::Shaded);

        let mut camera = CameraMode::Free;
        camera = next_camera_mode(camera);
        assert_eq!(camera, CameraMode::Cinematic);
        camera = next_camera_mode(next_camera_mode(camera));
        assert_eq!(camera, CameraMode::Free);
    }
}
