//! Camera behaviors
//!
//! Exactly one [`CameraBehavior`] drives the view at a time. Every behavior
//! captures its starting state on its first update, so switching never snaps.

use bevy::prelude::*;
use marionette_core::config::{
    ArcPoint, CameraConfig, CameraMode, CameraPreset, CinematicConfig, CinematicVariant, FocusConfig, FocusFraming,
    HeadLockedConfig,
};

use crate::scan::ease_in_out_cubic;

/// Elevation limit of the free orbit (radians)
pub const MAX_ELEVATION: f32 = 1.5;
/// Zoom change per scroll step
pub const ZOOM_STEP: f32 = 0.1;
/// Time a cinematic arc takes to blend in from the previous view
pub const ARC_BLEND_SECS: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub target: Vec3,
}

impl CameraPose {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self { position, target }
    }

    pub fn from_preset(preset: &CameraPreset) -> Self {
        Self::new(Vec3::from_array(preset.position), Vec3::from_array(preset.target))
    }

    pub fn lerp(&self, other: &CameraPose, t: f32) -> CameraPose {
        CameraPose {
            position: self.position.lerp(other.position, t),
            target: self.target.lerp(other.target, t),
        }
    }

    /// Z-up transform looking at the target
    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.position).looking_at(self.target, Vec3::Z)
    }
}

/// User orbit input accumulated over one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrbitInput {
    /// Azimuth and elevation change (radians)
    pub orbit: Vec2,
    /// Scroll steps, positive zooms in
    pub zoom_steps: f32,
}

/// Per-frame inputs shared by every behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraContext {
    pub dt: f32,
    /// Head link transform in world space, when the model is loaded
    pub head: Option<Transform>,
    pub input: OrbitInput,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Spherical {
    azimuth: f32,
    elevation: f32,
    distance: f32,
    target: Vec3,
}

impl Spherical {
    fn from_pose(pose: &CameraPose) -> Self {
        let offset = pose.position - pose.target;
        let distance = offset.length().max(1e-4);
        Self {
            azimuth: offset.y.atan2(offset.x),
            elevation: (offset.z / distance).clamp(-1.0, 1.0).asin(),
            distance,
            target: pose.target,
        }
    }

    fn pose(&self) -> CameraPose {
        let x = self.distance * self.azimuth.cos() * self.elevation.cos();
        let y = self.distance * self.azimuth.sin() * self.elevation.cos();
        let z = self.distance * self.elevation.sin();
        CameraPose::new(self.target + Vec3::new(x, y, z), self.target)
    }
}

/// Orbit and zoom around a target driven by user input
#[derive(Debug, Clone)]
pub struct FreeOrbit {
    min_distance: f32,
    max_distance: f32,
    orbit: Option<Spherical>,
}

impl FreeOrbit {
    pub fn new(preset: &CameraPreset) -> Self {
        Self {
            min_distance: preset.min_distance.min(preset.max_distance),
            max_distance: preset.max_distance.max(preset.min_distance),
            orbit: None,
        }
    }

    fn update(&mut self, current: CameraPose, ctx: &CameraContext) -> CameraPose {
        let orbit = self.orbit.get_or_insert_with(|| Spherical::from_pose(&current));
        let input = ctx.input;
        orbit.azimuth -= input.orbit.x;
        orbit.elevation = (orbit.elevation - input.orbit.y).clamp(-MAX_ELEVATION, MAX_ELEVATION);
        let zoom = (1.0 - input.zoom_steps * ZOOM_STEP).max(0.1);
        orbit.distance = (orbit.distance * zoom).clamp(self.min_distance, self.max_distance);
        orbit.pose()
    }
}

fn arc_position(target: Vec3, point: &ArcPoint) -> Vec3 {
    Vec3::new(
        target.x + point.radius * point.angle.cos(),
        target.y + point.radius * point.angle.sin(),
        point.height,
    )
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Scripted move around the look-at target
#[derive(Debug, Clone)]
pub struct CinematicArc {
    config: CinematicConfig,
    /// Start time and the pose the arc blends in from
    start: Option<(f32, CameraPose)>,
}

impl CinematicArc {
    pub fn new(config: CinematicConfig) -> Self {
        Self { config, start: None }
    }

    /// Pose on the arc at normalized time `t`
    pub fn arc_pose(&self, t: f32) -> CameraPose {
        let config = &self.config;
        let target = Vec3::from_array(config.target);
        let t = t.clamp(0.0, 1.0);
        let point = match config.variant {
            CinematicVariant::Orbit => ArcPoint {
                radius: config.radius,
                angle: config.start_angle + config.sweep_angle * t,
                height: config.height,
            },
            CinematicVariant::Sweep => {
                let e = ease_in_out_cubic(t);
                ArcPoint {
                    radius: lerp(config.from.radius, config.to.radius, e),
                    angle: lerp(config.from.angle, config.to.angle, e),
                    height: lerp(config.from.height, config.to.height, e),
                }
            }
        };
        CameraPose::new(arc_position(target, &point), target)
    }

    fn update(&mut self, now: f32, current: CameraPose) -> CameraPose {
        let (start, origin) = *self.start.get_or_insert((now, current));
        let elapsed = (now - start).max(0.0);
        let t = if self.config.duration_secs > 0.0 {
            elapsed / self.config.duration_secs
        } else {
            1.0
        };
        let arc = self.arc_pose(t);
        let blend = ease_in_out_cubic(elapsed / ARC_BLEND_SECS);
        origin.lerp(&arc, blend)
    }
}

/// Follow the head link, or hold a fixed pose when unlocked
#[derive(Debug, Clone)]
pub struct HeadLocked {
    config: HeadLockedConfig,
    pose: Option<CameraPose>,
}

impl HeadLocked {
    pub fn new(config: HeadLockedConfig) -> Self {
        Self { config, pose: None }
    }

    fn desired(&self, head: Option<Transform>, current: CameraPose) -> CameraPose {
        if !self.config.locked {
            return CameraPose::new(
                Vec3::from_array(self.config.fixed_position),
                Vec3::from_array(self.config.fixed_target),
            );
        }
        match head {
            Some(head) => CameraPose::new(
                head.translation + head.rotation * Vec3::from_array(self.config.offset),
                head.translation,
            ),
            None => current,
        }
    }

    fn update(&mut self, current: CameraPose, ctx: &CameraContext) -> CameraPose {
        let pose = *self.pose.get_or_insert(current);
        let desired = self.desired(ctx.head, pose);
        let factor = 1.0 - (-self.config.smoothing * 60.0 * ctx.dt).exp();
        let next = pose.lerp(&desired, factor.clamp(0.0, 1.0));
        self.pose = Some(next);
        next
    }
}

/// Where the error-focus move ends
pub fn focus_destination(current: &CameraPose, fault: Vec3, config: &FocusConfig) -> CameraPose {
    match config.framing {
        FocusFraming::Offset => CameraPose::new(fault + Vec3::from_array(config.offset), fault),
        FocusFraming::Orbit => {
            let center = current.target;
            let radius = (current.position - center).truncate().length();
            let mut direction = (fault - center).truncate();
            if direction.length_squared() < 1e-8 {
                // Fault straight above or below the center: stay where we are
                direction = (current.position - center).truncate();
            }
            let direction = direction.try_normalize().unwrap_or(Vec2::X);
            let position = Vec3::new(
                center.x + direction.x * radius,
                center.y + direction.y * radius,
                current.position.z,
            );
            CameraPose::new(position, fault)
        }
    }
}

/// Eased move from the current view to one framing the fault
#[derive(Debug, Clone)]
pub struct ErrorFocus {
    fault: Vec3,
    config: FocusConfig,
    /// Start time, snapshot and destination
    start: Option<(f32, CameraPose, CameraPose)>,
}

impl ErrorFocus {
    pub fn new(fault: Vec3, config: FocusConfig) -> Self {
        Self {
            fault,
            config,
            start: None,
        }
    }

    pub fn fault(&self) -> Vec3 {
        self.fault
    }

    fn update(&mut self, now: f32, current: CameraPose) -> CameraPose {
        let (fault, config) = (self.fault, &self.config);
        let (start, origin, destination) = *self
            .start
            .get_or_insert_with(|| (now, current, focus_destination(&current, fault, config)));
        let t = if self.config.duration_secs > 0.0 {
            (now - start) / self.config.duration_secs
        } else {
            1.0
        };
        origin.lerp(&destination, ease_in_out_cubic(t))
    }
}

#[derive(Debug, Clone)]
pub enum CameraBehavior {
    Free(FreeOrbit),
    CinematicArc(CinematicArc),
    HeadLocked(HeadLocked),
    ErrorFocus(ErrorFocus),
}

impl CameraBehavior {
    pub fn for_mode(mode: CameraMode, config: &CameraConfig) -> Self {
        match mode {
            CameraMode::Free => CameraBehavior::Free(FreeOrbit::new(&config.preset)),
            CameraMode::Cinematic => CameraBehavior::CinematicArc(CinematicArc::new(config.cinematic.clone())),
            CameraMode::HeadLocked => CameraBehavior::HeadLocked(HeadLocked::new(config.head_locked.clone())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CameraBehavior::Free(_) => "free",
            CameraBehavior::CinematicArc(_) => "cinematic",
            CameraBehavior::HeadLocked(_) => "head_locked",
            CameraBehavior::ErrorFocus(_) => "error_focus",
        }
    }

    pub fn update(&mut self, now: f32, current: CameraPose, ctx: &CameraContext) -> CameraPose {
        match self {
            CameraBehavior::Free(free) => free.update(current, ctx),
            CameraBehavior::CinematicArc(arc) => arc.update(now, current),
            CameraBehavior::HeadLocked(head) => head.update(current, ctx),
            CameraBehavior::ErrorFocus(focus) => focus.update(now, current),
        }
    }
}

/// Camera state machine: the configured mode, overridden by error focus
/// while a fault is active
#[derive(Debug, Clone)]
pub struct CameraController {
    config: CameraConfig,
    mode: CameraMode,
    behavior: CameraBehavior,
    fault: Option<Vec3>,
}

impl CameraController {
    pub fn new(config: CameraConfig) -> Self {
        let mode = config.mode;
        let behavior = CameraBehavior::for_mode(mode, &config);
        Self {
            config,
            mode,
            behavior,
            fault: None,
        }
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn behavior(&self) -> &CameraBehavior {
        &self.behavior
    }

    pub fn fault(&self) -> Option<Vec3> {
        self.fault
    }

    pub fn initial_pose(&self) -> CameraPose {
        CameraPose::from_preset(&self.config.preset)
    }

    /// Switch the configured mode. While a fault is active the new mode is
    /// only remembered.
    pub fn set_mode(&mut self, mode: CameraMode) {
        self.mode = mode;
        if self.fault.is_none() {
            self.behavior = CameraBehavior::for_mode(mode, &self.config);
        }
    }

    /// Enter error focus on a fault, or return to the configured mode
    pub fn set_fault(&mut self, fault: Option<Vec3>) {
        match (fault, self.fault) {
            (Some(new), Some(old)) if new.distance_squared(old) < 1e-10 => return,
            (Some(point), _) => {
                self.behavior = CameraBehavior::ErrorFocus(ErrorFocus::new(point, self.config.focus.clone()));
            }
            (None, Some(_)) => {
                self.behavior = CameraBehavior::for_mode(self.mode, &self.config);
            }
            (None, None) => {}
        }
        self.fault = fault;
    }

    pub fn update(&mut self, now: f32, current: CameraPose, ctx: &CameraContext) -> CameraPose {
        self.behavior.update(now, current, ctx)
    }
}
