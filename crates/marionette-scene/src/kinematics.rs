//! Forward kinematics of the robot avatar
//!
//! The model is built once from a [`RobotDescription`]. Telemetry is written
//! into the joint set by [`KinematicModel::apply_pose`] in a fixed sequence of
//! steps, after which every link transform is recomputed exactly once.
//! Coordinates are Z-up, as in the description file.

use bevy::prelude::*;
use marionette_core::config::JointNames;
use marionette_core::robot::{Geometry, JointKind, ModelError, Origin, RobotDescription};
use marionette_core::surface::{classify, family_for, is_outline, Family, FamilyRule, SurfaceClass};
use marionette_core::telemetry::{
    within, PoseFrame, ANTENNA_COUNT, HEAD_JOINT_COUNT, PASSIVE_JOINT_COUNT,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Dense surface index assigned at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl SurfaceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable description of one renderable piece of geometry
#[derive(Debug, Clone)]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    pub name: String,
    pub link: String,
    /// Link chain up to the root, nearest first, starting with `link`
    pub ancestors: Vec<String>,
    pub class: SurfaceClass,
    pub family: Family,
    pub material_name: Option<String>,
    pub origin_color: Option<[f32; 4]>,
    pub is_outline: bool,
    pub geometry: Geometry,
    /// Visual origin relative to the link frame
    pub local: Transform,
}

/// Named steps of pose application, executed in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseStep {
    BodyYaw,
    Stewart,
    Passive,
    Antennas,
}

pub const POSE_STEPS: [PoseStep; 4] = [
    PoseStep::BodyYaw,
    PoseStep::Stewart,
    PoseStep::Passive,
    PoseStep::Antennas,
];

/// Outcome of one [`KinematicModel::apply_pose`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoseApplyReport {
    /// False when the pose matched the last applied one within tolerance
    pub applied: bool,
    pub joints_written: usize,
    pub missing_joints: usize,
    pub clamped_joints: usize,
}

#[derive(Debug, Clone)]
struct JointDef {
    name: String,
    kind: JointKind,
    parent: String,
    origin: Transform,
    axis: Vec3,
    limits: Option<(f32, f32)>,
}

impl JointDef {
    fn motion(&self, value: f32) -> Transform {
        match self.kind {
            JointKind::Revolute | JointKind::Continuous => {
                Transform::from_rotation(Quat::from_axis_angle(self.axis, value))
            }
            JointKind::Prismatic => Transform::from_translation(self.axis * value),
            JointKind::Fixed => Transform::IDENTITY,
        }
    }

    fn clamp(&self, value: f32) -> f32 {
        match (self.kind, self.limits) {
            (JointKind::Revolute | JointKind::Prismatic, Some((lower, upper))) => {
                value.clamp(lower, upper)
            }
            _ => value,
        }
    }
}

/// Last applied telemetry, per vector
#[derive(Debug, Clone, Default)]
struct AppliedPose {
    head: Option<[f32; HEAD_JOINT_COUNT]>,
    passive: Option<[f32; PASSIVE_JOINT_COUNT]>,
    antennas: Option<[f32; ANTENNA_COUNT]>,
}

/// Jointed robot model with its surfaces and current link transforms
#[derive(Debug, Clone)]
pub struct KinematicModel {
    name: String,
    names: JointNames,
    tolerance: f32,
    joints: Vec<JointDef>,
    joint_index: HashMap<String, usize>,
    /// Child link name to index of the joint that drives it
    link_joint: HashMap<String, usize>,
    link_order: Vec<String>,
    joint_set: HashMap<String, f32>,
    link_transforms: HashMap<String, Transform>,
    surfaces: Vec<SurfaceInfo>,
    last_applied: AppliedPose,
    revision: u64,
    warned_missing: HashSet<String>,
}

fn origin_transform(origin: Option<&Origin>) -> Result<Transform, ModelError> {
    let Some(origin) = origin else {
        return Ok(Transform::IDENTITY);
    };
    let [x, y, z, roll, pitch, yaw] = origin.parse()?;
    Ok(Transform {
        translation: Vec3::new(x as f32, y as f32, z as f32),
        rotation: Quat::from_euler(EulerRot::ZYX, yaw as f32, pitch as f32, roll as f32),
        scale: Vec3::ONE,
    })
}

fn normalized_axis(axis: [f64; 3]) -> Vec3 {
    let v = Vec3::new(axis[0] as f32, axis[1] as f32, axis[2] as f32);
    if v.length_squared() < 1e-12 {
        Vec3::X
    } else {
        v.normalize()
    }
}

impl KinematicModel {
    /// Build the model, classifying every visual of the description once
    pub fn from_description(
        robot: &RobotDescription,
        names: JointNames,
        rules: &[FamilyRule],
        tolerance: f32,
    ) -> Result<Self, ModelError> {
        let mut joints = Vec::with_capacity(robot.joint.len());
        let mut joint_index = HashMap::new();
        let mut link_joint = HashMap::new();
        let mut joint_set = HashMap::new();

        for joint in &robot.joint {
            let def = JointDef {
                name: joint.name.clone(),
                kind: joint.kind()?,
                parent: joint.parent.link.clone(),
                origin: origin_transform(joint.origin.as_ref())?,
                axis: normalized_axis(joint.axis()?),
                limits: joint.limits().map(|(lo, hi)| (lo as f32, hi as f32)),
            };
            if def.kind != JointKind::Fixed {
                joint_set.insert(def.name.clone(), def.clamp(0.0));
            }
            joint_index.insert(def.name.clone(), joints.len());
            link_joint.insert(joint.child.link.clone(), joints.len());
            joints.push(def);
        }

        let link_order = robot.links_in_order();
        let mut surfaces = Vec::new();
        for link_name in &link_order {
            let Some(link) = robot.find_link(link_name) else {
                continue;
            };
            let ancestors = robot.ancestors(link_name);
            for (i, visual) in link.visual.iter().enumerate() {
                let name = visual
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}_visual_{}", link_name, i));
                let material_name = visual.material.as_ref().and_then(|m| m.name.clone());
                let origin_color = robot.visual_color(visual)?;
                let class = classify(&name, link_name, material_name.as_deref(), origin_color);
                surfaces.push(SurfaceInfo {
                    id: SurfaceId(surfaces.len() as u32),
                    family: family_for(class, &ancestors, rules),
                    is_outline: is_outline(&name, material_name.as_deref()),
                    geometry: visual.geometry.resolve()?,
                    local: origin_transform(visual.origin.as_ref())?,
                    link: link_name.clone(),
                    ancestors: ancestors.clone(),
                    name,
                    class,
                    material_name,
                    origin_color,
                });
            }
        }

        let mut model = Self {
            name: robot.name.clone(),
            names,
            tolerance,
            joints,
            joint_index,
            link_joint,
            link_order,
            joint_set,
            link_transforms: HashMap::new(),
            surfaces,
            last_applied: AppliedPose::default(),
            revision: 0,
            warned_missing: HashSet::new(),
        };
        model.recompute_transforms();
        debug!(
            robot = %model.name,
            links = model.link_order.len(),
            joints = model.joints.len(),
            surfaces = model.surfaces.len(),
            "Built kinematic model"
        );
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joint_names(&self) -> &JointNames {
        &self.names
    }

    /// Number of pose applications that mutated the joint set
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn surfaces(&self) -> &[SurfaceInfo] {
        &self.surfaces
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&SurfaceInfo> {
        self.surfaces.get(id.index())
    }

    pub fn surface_by_name(&self, name: &str) -> Option<&SurfaceInfo> {
        self.surfaces.iter().find(|s| s.name == name)
    }

    pub fn joint_value(&self, name: &str) -> Option<f32> {
        self.joint_set.get(name).copied()
    }

    /// Transform of a link relative to the model root
    pub fn link_transform(&self, name: &str) -> Option<Transform> {
        self.link_transforms.get(name).copied()
    }

    /// Transform of a surface relative to the model root
    pub fn surface_world_transform(&self, id: SurfaceId) -> Option<Transform> {
        let surface = self.surface(id)?;
        let link = self.link_transforms.get(&surface.link)?;
        Some(link.mul_transform(surface.local))
    }

    /// Apply an accepted telemetry frame
    pub fn apply_frame(&mut self, frame: &PoseFrame) -> PoseApplyReport {
        self.apply_pose(
            frame.head_joints.as_ref(),
            frame.passive_joints.as_ref(),
            frame.antennas,
        )
    }

    /// Write telemetry into the joint set and recompute link transforms.
    ///
    /// Steps run in [`POSE_STEPS`] order: body yaw, the six Stewart joints,
    /// the 21 passive joints, then the antennas. A frame equal to the last
    /// applied one within tolerance mutates nothing.
    pub fn apply_pose(
        &mut self,
        head_joints: Option<&[f32; HEAD_JOINT_COUNT]>,
        passive_joints: Option<&[f32; PASSIVE_JOINT_COUNT]>,
        antennas: [f32; ANTENNA_COUNT],
    ) -> PoseApplyReport {
        let mut report = PoseApplyReport::default();
        if !self.differs_from_last(head_joints, passive_joints, &antennas) {
            trace!("Pose within tolerance of last applied state, skipping");
            return report;
        }

        for step in POSE_STEPS {
            match step {
                PoseStep::BodyYaw => {
                    if let Some(head) = head_joints {
                        let name = self.names.body_yaw.clone();
                        self.write_joint(&name, head[0], &mut report);
                    }
                }
                PoseStep::Stewart => {
                    if let Some(head) = head_joints {
                        let names = self.names.stewart.clone();
                        for (name, value) in names.iter().zip(&head[1..]) {
                            self.write_joint(name, *value, &mut report);
                        }
                    }
                }
                PoseStep::Passive => {
                    if let Some(passive) = passive_joints {
                        let names = self.names.passive.clone();
                        for (name, value) in names.iter().zip(passive) {
                            self.write_joint(name, *value, &mut report);
                        }
                    }
                }
                PoseStep::Antennas => {
                    // Channels are swapped and negated relative to the joints
                    let [a, b] = antennas;
                    let left = self.names.left_antenna.clone();
                    let right = self.names.right_antenna.clone();
                    self.write_joint(&left, -b, &mut report);
                    self.write_joint(&right, -a, &mut report);
                }
            }
        }

        if let Some(head) = head_joints {
            self.last_applied.head = Some(*head);
        }
        if let Some(passive) = passive_joints {
            self.last_applied.passive = Some(*passive);
        }
        self.last_applied.antennas = Some(antennas);

        self.recompute_transforms();
        self.revision += 1;
        report.applied = true;
        report
    }

    fn differs_from_last(
        &self,
        head: Option<&[f32; HEAD_JOINT_COUNT]>,
        passive: Option<&[f32; PASSIVE_JOINT_COUNT]>,
        antennas: &[f32; ANTENNA_COUNT],
    ) -> bool {
        fn changed<const N: usize>(new: Option<&[f32; N]>, old: Option<&[f32; N]>, tol: f32) -> bool {
            match (new, old) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(new), Some(old)) => !within(new, old, tol),
            }
        }

        changed(head, self.last_applied.head.as_ref(), self.tolerance)
            || changed(passive, self.last_applied.passive.as_ref(), self.tolerance)
            || changed(Some(antennas), self.last_applied.antennas.as_ref(), self.tolerance)
    }

    fn write_joint(&mut self, name: &str, value: f32, report: &mut PoseApplyReport) {
        let Some(&index) = self.joint_index.get(name) else {
            report.missing_joints += 1;
            if self.warned_missing.insert(name.to_string()) {
                warn!(joint = %name, robot = %self.name, "Joint not found in model, ignoring");
            } else {
                trace!(joint = %name, "Joint not found in model");
            }
            return;
        };

        let joint = &self.joints[index];
        if joint.kind == JointKind::Fixed {
            return;
        }
        let clamped = joint.clamp(value);
        if clamped != value {
            report.clamped_joints += 1;
        }
        self.joint_set.insert(joint.name.clone(), clamped);
        report.joints_written += 1;
    }

    /// Recompute every link transform from the joint set, parents first
    fn recompute_transforms(&mut self) {
        self.link_transforms.clear();
        for link in &self.link_order {
            let transform = match self.link_joint.get(link) {
                None => Transform::IDENTITY,
                Some(&index) => {
                    let joint = &self.joints[index];
                    let parent = self
                        .link_transforms
                        .get(&joint.parent)
                        .copied()
                        .unwrap_or(Transform::IDENTITY);
                    let value = self.joint_set.get(&joint.name).copied().unwrap_or(0.0);
                    parent
                        .mul_transform(joint.origin)
                        .mul_transform(joint.motion(value))
                }
            };
            self.link_transforms.insert(link.clone(), transform);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use marionette_core::surface::default_family_rules;
    use marionette_core::POSE_TOLERANCE;
    use std::f32::consts::FRAC_PI_2;

    pub(crate) const TEST_ROBOT: &str = r#"<?xml version="1.0"?>
<robot name="puppet">
    <link name="base">
        <visual name="base_plate">
            <geometry><box size="0.12 0.12 0.02"/></geometry>
            <material name="grey"><color rgba="0.5 0.5 0.5 1"/></material>
        </visual>
    </link>
    <link name="body">
        <visual name="torso">
            <origin xyz="0 0 0.04"/>
            <geometry><cylinder radius="0.05" length="0.08"/></geometry>
            <material name="white"><color rgba="0.9 0.9 0.9 1"/></material>
        </visual>
        <visual name="body_shell">
            <geometry><cylinder radius="0.055" length="0.09"/></geometry>
        </visual>
    </link>
    <link name="head">
        <visual name="head_frame">
            <geometry><box size="0.08 0.1 0.06"/></geometry>
            <material name="dark"><color rgba="0.15 0.15 0.15 1"/></material>
        </visual>
    </link>
    <link name="camera">
        <visual name="cam_front">
            <geometry><sphere radius="0.01"/></geometry>
            <material name="smoke"><color rgba="0.05 0.05 0.05 0.3"/></material>
        </visual>
    </link>
    <link name="left_antenna_link">
        <visual name="left_antenna_visual">
            <origin xyz="0 0 0.03"/>
            <geometry><cylinder radius="0.003" length="0.06"/></geometry>
        </visual>
    </link>
    <link name="right_antenna_link">
        <visual name="right_antenna_visual">
            <origin xyz="0 0 0.03"/>
            <geometry><cylinder radius="0.003" length="0.06"/></geometry>
        </visual>
    </link>
    <joint name="yaw_body" type="revolute">
        <parent link="base"/>
        <child link="body"/>
        <origin xyz="0 0 0.02"/>
        <axis xyz="0 0 1"/>
        <limit lower="-2.8" upper="2.8"/>
    </joint>
    <joint name="stewart_1" type="prismatic">
        <parent link="body"/>
        <child link="head"/>
        <origin xyz="0 0 0.1"/>
        <axis xyz="0 0 1"/>
        <limit lower="0" upper="0.02"/>
    </joint>
    <joint name="camera_mount" type="fixed">
        <parent link="head"/>
        <child link="camera"/>
        <origin xyz="0.03 0 0"/>
    </joint>
    <joint name="left_antenna" type="continuous">
        <parent link="head"/>
        <child link="left_antenna_link"/>
        <origin xyz="0 0.02 0.03"/>
        <axis xyz="1 0 0"/>
    </joint>
    <joint name="right_antenna" type="continuous">
        <parent link="head"/>
        <child link="right_antenna_link"/>
        <origin xyz="0 -0.02 0.03"/>
        <axis xyz="1 0 0"/>
    </joint>
</robot>"#;

    pub(crate) fn test_model() -> KinematicModel {
        let robot = RobotDescription::from_xml(TEST_ROBOT).unwrap();
        KinematicModel::from_description(
            &robot,
            JointNames::default(),
            &default_family_rules(),
            POSE_TOLERANCE,
        )
        .unwrap()
    }

    fn head(yaw: f32) -> [f32; HEAD_JOINT_COUNT] {
        [yaw, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
    }

    #[test]
    fn test_surfaces_classified_once_at_load() {
        let model = test_model();
        let surfaces = model.surfaces();
        assert_eq!(surfaces.len(), 7);
        assert!(surfaces.iter().enumerate().all(|(i, s)| s.id == SurfaceId(i as u32)));

        let by_name = |name: &str| model.surface_by_name(name).unwrap();
        assert_eq!(by_name("base_plate").family, Family::Base);
        assert_eq!(by_name("torso").family, Family::Body);
        assert_eq!(by_name("body_shell").class, SurfaceClass::Shell);
        assert_eq!(by_name("head_frame").family, Family::Head);
        assert_eq!(by_name("cam_front").class, SurfaceClass::Lens);
        assert_eq!(by_name("cam_front").family, Family::Camera);
        assert_eq!(by_name("left_antenna_visual").class, SurfaceClass::Antenna);
        assert_eq!(
            by_name("cam_front").ancestors,
            vec!["camera", "head", "body", "base"]
        );
    }

    #[test]
    fn test_yaw_rotates_dependent_links() {
        let mut model = test_model();
        let report = model.apply_pose(Some(&head(FRAC_PI_2)), None, [0.0, 0.0]);
        assert!(report.applied);

        let camera = model.link_transform("camera").unwrap();
        assert!((camera.translation - Vec3::new(0.0, 0.03, 0.12)).length() < 1e-5);

        let body = model.link_transform("body").unwrap();
        assert!(body.rotation.angle_between(Quat::from_rotation_z(FRAC_PI_2)) < 1e-5);
        assert!(model.link_transform("nope").is_none());
    }

    #[test]
    fn test_surface_transform_includes_visual_origin() {
        let model = test_model();
        let torso = model.surface_by_name("torso").unwrap().id;
        let tf = model.surface_world_transform(torso).unwrap();
        assert!((tf.translation - Vec3::new(0.0, 0.0, 0.06)).length() < 1e-6);
        assert!(model.surface_world_transform(SurfaceId(99)).is_none());
    }

    #[test]
    fn test_antenna_cross_wiring() {
        let mut model = test_model();
        model.apply_pose(None, None, [0.3, -0.7]);
        assert!((model.joint_value("left_antenna").unwrap() - 0.7).abs() < 1e-6);
        assert!((model.joint_value("right_antenna").unwrap() + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_limits_clamp_revolute_and_prismatic() {
        let mut model = test_model();
        let mut joints = head(5.0);
        joints[1] = 0.5;
        let report = model.apply_pose(Some(&joints), None, [0.0, 0.0]);
        assert_eq!(report.clamped_joints, 2);
        assert_eq!(model.joint_value("yaw_body"), Some(2.8));
        assert_eq!(model.joint_value("stewart_1"), Some(0.02));
    }

    #[test]
    fn test_missing_joints_do_not_block_others() {
        let mut model = test_model();
        let passive = [0.1; PASSIVE_JOINT_COUNT];
        let report = model.apply_pose(Some(&head(0.4)), Some(&passive), [0.0, 0.0]);
        // stewart_2..6 and every passive joint are absent from the test robot
        assert_eq!(report.missing_joints, 5 + PASSIVE_JOINT_COUNT);
        assert!(report.applied);
        assert_eq!(model.joint_value("yaw_body"), Some(0.4));
    }

    #[test]
    fn test_tolerance_suppression_leaves_model_untouched() {
        let mut model = test_model();
        model.apply_pose(Some(&head(0.2)), None, [0.1, 0.1]);
        let revision = model.revision();
        let before = model.link_transform("head").unwrap();

        let report = model.apply_pose(Some(&head(0.203)), None, [0.102, 0.099]);
        assert!(!report.applied);
        assert_eq!(report.joints_written, 0);
        assert_eq!(model.revision(), revision);
        assert_eq!(model.joint_value("yaw_body"), Some(0.2));
        assert_eq!(model.link_transform("head").unwrap(), before);
    }

    #[test]
    fn test_five_frames_yield_three_applied_states() {
        let mut model = test_model();
        let messages = [
            r#"{"head_joints":[0,0,0,0,0,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.001,0,0,0,0,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.1,0,0,0,0,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.1,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.2,0,0,0,0,0,0],"antennas_position":[0.5,0]}"#,
        ];
        for text in messages {
            if let Ok(frame) = PoseFrame::decode(text) {
                model.apply_frame(&frame);
            }
        }
        assert_eq!(model.revision(), 3);
        assert_eq!(model.joint_value("yaw_body"), Some(0.2));
        assert_eq!(model.joint_value("right_antenna"), Some(-0.5));
    }

    #[test]
    fn test_platform_change_with_yaw_held_is_applied() {
        let mut model = test_model();
        let messages = [
            r#"{"head_joints":[0,0,0,0,0,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.1,0,0,0,0,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.1,0,0,0,0,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.1,0.05,0,0,0,0,0],"antennas_position":[0,0]}"#,
            r#"{"head_joints":[0.1,0.05,0,0,0,0,0],"antennas_position":[0,0]}"#,
        ];
        let mut revisions = Vec::new();
        for text in messages {
            let frame = PoseFrame::decode(text).unwrap();
            model.apply_frame(&frame);
            revisions.push(model.revision());
        }
        assert_eq!(revisions, vec![1, 2, 2, 3, 3]);
        assert_eq!(model.joint_value("yaw_body"), Some(0.1));
        // Clamped to the prismatic limit
        assert_eq!(model.joint_value("stewart_1"), Some(0.02));
    }

    #[test]
    fn test_absent_head_joints_keep_previous_values() {
        let mut model = test_model();
        model.apply_pose(Some(&head(0.3)), None, [0.0, 0.0]);
        let report = model.apply_pose(None, None, [0.2, 0.2]);
        assert!(report.applied);
        assert_eq!(model.joint_value("yaw_body"), Some(0.3));
    }
}
