//! Camera rig, lights and per-frame camera driving

use bevy::input::mouse::{AccumulatedMouseMotion, AccumulatedMouseScroll, MouseScrollUnit};
use bevy::prelude::*;
use marionette_core::config::{CameraConfig, CameraMode};
use tracing::info;

use crate::camera::{CameraContext, CameraController, CameraPose, OrbitInput};
use crate::models::RobotModel;

/// Pixels of scroll that count as one zoom step
const PIXELS_PER_STEP: f32 = 100.0;

/// Marker for the main 3D camera
#[derive(Component)]
pub struct MainCamera;

/// Camera behavior state plus the pose it produced last frame
#[derive(Resource)]
pub struct CameraRig {
    pub controller: CameraController,
    pub pose: CameraPose,
    pub fov_degrees: f32,
    /// Radians of orbit per pixel of mouse drag
    pub sensitivity: f32,
}

impl CameraRig {
    pub fn new(config: CameraConfig) -> Self {
        let fov_degrees = config.preset.fov_degrees;
        let controller = CameraController::new(config);
        let pose = controller.initial_pose();
        Self {
            controller,
            pose,
            fov_degrees,
            sensitivity: 0.005,
        }
    }

    pub fn set_mode(&mut self, mode: CameraMode) {
        if self.controller.mode() != mode {
            info!(?mode, "Camera mode changed");
        }
        self.controller.set_mode(mode);
    }
}

pub struct SceneSetupPlugin;

impl Plugin for SceneSetupPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, setup_scene)
            .add_systems(Update, update_camera);
    }
}

fn setup_scene(mut commands: Commands, rig: Res<CameraRig>) {
    // ENU: X=East, Y=North, Z=Up
    commands.spawn((
        Camera3d::default(),
        Projection::Perspective(PerspectiveProjection {
            fov: rig.fov_degrees.to_radians(),
            near: 0.001,
            far: 100.0,
            ..default()
        }),
        rig.pose.transform(),
        MainCamera,
    ));

    commands.insert_resource(AmbientLight {
        color: Color::srgb(0.9, 0.95, 1.0),
        brightness: 300.0,
        ..default()
    });

    // Key light from above
    commands.spawn((
        DirectionalLight {
            illuminance: 5000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(2.0, 2.0, 4.0).looking_at(Vec3::ZERO, Vec3::Z),
    ));

    // Warm fill
    commands.spawn((
        PointLight {
            intensity: 100000.0,
            shadows_enabled: false,
            color: Color::srgb(1.0, 0.95, 0.9),
            ..default()
        },
        Transform::from_xyz(-1.0, -1.0, 2.0),
    ));
}

fn orbit_input(
    buttons: Option<Res<ButtonInput<MouseButton>>>,
    motion: Option<Res<AccumulatedMouseMotion>>,
    scroll: Option<Res<AccumulatedMouseScroll>>,
    sensitivity: f32,
) -> OrbitInput {
    let mut input = OrbitInput::default();
    let dragging = buttons.is_some_and(|b| b.pressed(MouseButton::Left));
    if let (true, Some(motion)) = (dragging, motion) {
        // Dragging right moves the camera left around the target
        input.orbit = Vec2::new(-motion.delta.x, motion.delta.y) * sensitivity;
    }
    if let Some(scroll) = scroll {
        input.zoom_steps = match scroll.unit {
            MouseScrollUnit::Line => scroll.delta.y,
            MouseScrollUnit::Pixel => scroll.delta.y / PIXELS_PER_STEP,
        };
    }
    input
}

fn update_camera(
    time: Res<Time>,
    mut rig: ResMut<CameraRig>,
    buttons: Option<Res<ButtonInput<MouseButton>>>,
    motion: Option<Res<AccumulatedMouseMotion>>,
    scroll: Option<Res<AccumulatedMouseScroll>>,
    models: Query<(&RobotModel, &GlobalTransform)>,
    mut camera: Query<&mut Transform, With<MainCamera>>,
) {
    let head = models.iter().next().and_then(|(model, root)| {
        model
            .head_transform()
            .map(|head| root.mul_transform(head).compute_transform())
    });
    let ctx = CameraContext {
        dt: time.delta_secs(),
        head,
        input: orbit_input(buttons, motion, scroll, rig.sensitivity),
    };

    let rig = &mut *rig;
    rig.pose = rig.controller.update(time.elapsed_secs(), rig.pose, &ctx);

    let Ok(mut transform) = camera.single_mut() else {
        return;
    };
    let posed = rig.pose.transform();
    transform.translation = posed.translation;
    transform.rotation = posed.rotation;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::ecs::system::RunSystemOnce;

    #[test]
    fn test_orbit_input_requires_drag() {
        let mut motion = AccumulatedMouseMotion::default();
        motion.delta = Vec2::new(10.0, -4.0);

        let idle = orbit_input(None, None, None, 0.01);
        assert_eq!(idle, OrbitInput::default());

        let mut buttons = ButtonInput::<MouseButton>::default();
        buttons.press(MouseButton::Left);

        let mut world = World::new();
        world.insert_resource(buttons);
        world.insert_resource(motion);
        world.insert_resource(AccumulatedMouseScroll {
            unit: MouseScrollUnit::Pixel,
            delta: Vec2::new(0.0, 200.0),
        });

        let input = world
            .run_system_once(|b: Option<Res<ButtonInput<MouseButton>>>,
                              m: Option<Res<AccumulatedMouseMotion>>,
                              s: Option<Res<AccumulatedMouseScroll>>| {
                orbit_input(b, m, s, 0.01)
            })
            .unwrap();
        assert!((input.orbit - Vec2::new(-0.1, -0.04)).length() < 1e-6);
        assert!((input.zoom_steps - 2.0).abs() < 1e-6);
    }
}
