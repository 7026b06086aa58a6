//! Robot model entities: spawning from the description, mesh loading and
//! pose application from the telemetry slot

use bevy::asset::LoadState;
use bevy::pbr::wireframe::{Wireframe, WireframeColor};
use bevy::prelude::*;
use marionette_core::config::JointNames;
use marionette_core::robot::{Geometry, RobotDescription};
use marionette_core::surface::FamilyRule;
use marionette_stream::PoseSlot;
use std::f32::consts::FRAC_PI_2;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::appearance::{material_for, MaterialCache};
use crate::focus::{geometry_bounds, Bounds};
use crate::kinematics::{KinematicModel, SurfaceId};
use crate::presentation::RenderSettings;
use crate::shading::SurfaceShader;
use crate::{MeshesReady, ModelReady};

/// Where the robot description lives and how telemetry maps onto it
#[derive(Debug, Clone, Resource)]
pub struct ModelSettings {
    /// Asset directory on disk; mesh paths are loaded relative to it
    pub asset_dir: PathBuf,
    /// Description file, relative to `asset_dir`
    pub description: String,
    pub joint_names: JointNames,
    pub family_rules: Vec<FamilyRule>,
    pub tolerance: f32,
}

/// Telemetry source polled at the top of each frame
#[derive(Resource)]
pub struct PoseFeed {
    slot: PoseSlot,
    seen: u64,
    /// Apply only every Nth render frame
    interval: u32,
    frames: u64,
}

impl PoseFeed {
    pub fn new(slot: PoseSlot, interval: u32) -> Self {
        Self {
            slot,
            seen: 0,
            interval: interval.max(1),
            frames: 0,
        }
    }

    pub fn slot(&self) -> &PoseSlot {
        &self.slot
    }
}

/// Root of one model instance
#[derive(Component)]
pub struct RobotModel {
    pub kinematics: KinematicModel,
    surface_entities: Vec<Entity>,
    synced_revision: Option<u64>,
}

impl RobotModel {
    pub fn surface_entity(&self, id: SurfaceId) -> Option<Entity> {
        self.surface_entities.get(id.index()).copied()
    }

    pub fn surface_entities(&self) -> &[Entity] {
        &self.surface_entities
    }

    /// Head link transform relative to the model root
    pub fn head_transform(&self) -> Option<Transform> {
        let head = &self.kinematics.joint_names().head_link;
        self.kinematics.link_transform(head)
    }
}

/// Material handles owned by a model instance
#[derive(Component, Default)]
pub struct ModelMaterials(pub MaterialCache<Handle<SurfaceShader>>);

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Loading,
    Ready,
}

/// One renderable surface of a model
#[derive(Component, Debug, Clone)]
pub struct Surface {
    pub id: SurfaceId,
    pub model: Entity,
    /// Maps mesh space onto the visual frame (primitive orientation, mesh scale)
    pub mesh_fix: Transform,
}

/// Bounds of a surface in its visual frame, once its mesh is known
#[derive(Component, Debug, Clone, Copy)]
pub struct SurfaceBounds(pub Option<Bounds>);

/// Request to tear a model instance down
#[derive(Message, Debug, Clone)]
pub struct DespawnModel {
    pub model: Entity,
}

pub struct ModelsPlugin;

impl Plugin for ModelsPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<DespawnModel>()
            .add_systems(Startup, spawn_model)
            .add_systems(PreUpdate, (apply_pose_feed, sync_surface_transforms).chain())
            .add_systems(Update, (track_mesh_loading, despawn_models));
    }
}

/// Resolve a mesh filename from the description into an asset path.
///
/// `package://<pkg>/rest` maps to `rest` under the asset root, relative
/// names are taken relative to the description's directory.
pub fn mesh_asset_path(description: &str, filename: &str) -> String {
    if let Some(rest) = filename.strip_prefix("package://") {
        return rest.split_once('/').map(|(_, path)| path).unwrap_or(rest).to_string();
    }
    let filename = filename.strip_prefix("file://").unwrap_or(filename);
    if Path::new(filename).is_absolute() {
        return filename.to_string();
    }
    match Path::new(description).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => format!("{}/{}", dir.to_string_lossy(), filename),
        _ => filename.to_string(),
    }
}

fn vec3(v: [f64; 3]) -> Vec3 {
    Vec3::new(v[0] as f32, v[1] as f32, v[2] as f32)
}

/// Bounds of a mesh's vertex positions
pub fn mesh_bounds(mesh: &Mesh) -> Option<Bounds> {
    let positions = mesh.attribute(Mesh::ATTRIBUTE_POSITION)?.as_float3()?;
    Bounds::from_points(positions.iter().map(|p| Vec3::from_array(*p)))
}

fn spawn_model(
    mut commands: Commands,
    settings: Res<ModelSettings>,
    render: Res<RenderSettings>,
    asset_server: Res<AssetServer>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<SurfaceShader>>,
) {
    let path = settings.asset_dir.join(&settings.description);
    let robot = match RobotDescription::from_file(&path) {
        Ok(robot) => robot,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to load robot description");
            return;
        }
    };
    let kinematics = match KinematicModel::from_description(
        &robot,
        settings.joint_names.clone(),
        &settings.family_rules,
        settings.tolerance,
    ) {
        Ok(model) => model,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Invalid robot description");
            return;
        }
    };

    info!(
        robot = %kinematics.name(),
        surfaces = kinematics.surfaces().len(),
        "Spawning robot model"
    );

    let root = commands
        .spawn((
            Name::new(kinematics.name().to_string()),
            Transform::IDENTITY,
            Visibility::default(),
            ModelStatus::Loading,
        ))
        .id();

    let mut cache = MaterialCache::new();
    let mut surface_entities = Vec::with_capacity(kinematics.surfaces().len());
    for surface in kinematics.surfaces() {
        let (mesh, mesh_fix, bounds) = match &surface.geometry {
            Geometry::Box { size } => {
                let size = vec3(*size);
                (meshes.add(Cuboid::new(size.x, size.y, size.z)), Transform::IDENTITY, true)
            }
            Geometry::Cylinder { radius, length } => (
                meshes.add(Cylinder::new(*radius as f32, *length as f32)),
                // Bevy cylinders run along Y, description cylinders along Z
                Transform::from_rotation(Quat::from_rotation_x(FRAC_PI_2)),
                true,
            ),
            Geometry::Sphere { radius } => (
                meshes.add(Sphere::new(*radius as f32)),
                Transform::IDENTITY,
                true,
            ),
            Geometry::Mesh { filename, scale } => {
                let asset = mesh_asset_path(&settings.description, filename);
                debug!(surface = %surface.name, asset = %asset, "Loading surface mesh");
                let handle: Handle<Mesh> =
                    asset_server.load(GltfAssetLabel::Primitive { mesh: 0, primitive: 0 }.from_asset(asset));
                (handle, Transform::from_scale(vec3(*scale)), false)
            }
        };

        let material = material_for(surface, render.mode, &render.appearance);
        let handle = cache.mode_handle(surface.id, render.mode, || {
            materials.add(material.to_shader_material())
        });
        let transform = kinematics
            .surface_world_transform(surface.id)
            .unwrap_or_default()
            .mul_transform(mesh_fix);

        let mut entity = commands.spawn((
            Name::new(surface.name.clone()),
            Surface {
                id: surface.id,
                model: root,
                mesh_fix,
            },
            Mesh3d(mesh),
            MeshMaterial3d(handle),
            transform,
            Visibility::default(),
            ChildOf(root),
        ));
        if bounds {
            entity.insert(SurfaceBounds(geometry_bounds(&surface.geometry)));
        }
        if let Some(color) = material.wireframe_color() {
            entity.insert((Wireframe, WireframeColor { color }));
        }
        surface_entities.push(entity.id());
    }

    commands.entity(root).insert((
        RobotModel {
            kinematics,
            surface_entities,
            synced_revision: None,
        },
        ModelMaterials(cache),
    ));
}

/// Mark models ready once every surface mesh has loaded (or failed)
pub(crate) fn track_mesh_loading(
    mut commands: Commands,
    asset_server: Res<AssetServer>,
    meshes: Res<Assets<Mesh>>,
    mut roots: Query<(Entity, &RobotModel, &mut ModelStatus)>,
    surfaces: Query<(&Surface, &Mesh3d, Has<SurfaceBounds>)>,
    mut meshes_ready: MessageWriter<MeshesReady>,
    mut model_ready: MessageWriter<ModelReady>,
) {
    for (root, model, mut status) in &mut roots {
        if *status != ModelStatus::Loading {
            continue;
        }

        let mut pending = 0;
        for &entity in model.surface_entities() {
            let Ok((surface, mesh, resolved)) = surfaces.get(entity) else {
                continue;
            };
            if resolved {
                continue;
            }
            if let Some(loaded) = meshes.get(&mesh.0) {
                let bounds = mesh_bounds(loaded).map(|b| b.transformed(&surface.mesh_fix));
                commands.entity(entity).insert(SurfaceBounds(bounds));
            } else if matches!(asset_server.get_load_state(mesh.0.id()), Some(LoadState::Failed(_))) {
                warn!(surface = %surface.id, "Surface mesh failed to load");
                commands.entity(entity).insert(SurfaceBounds(None));
            } else {
                pending += 1;
            }
        }

        if pending == 0 {
            *status = ModelStatus::Ready;
            let names: Vec<String> = model
                .kinematics
                .surfaces()
                .iter()
                .map(|s| s.name.clone())
                .collect();
            info!(robot = %model.kinematics.name(), surfaces = names.len(), "Robot model ready");
            meshes_ready.write(MeshesReady {
                model: root,
                surfaces: names,
            });
            model_ready.write(ModelReady {
                model: root,
                surfaces: model.surface_entities().len(),
            });
        }
    }
}

fn apply_pose_feed(feed: Option<ResMut<PoseFeed>>, mut models: Query<&mut RobotModel>) {
    let Some(mut feed) = feed else {
        return;
    };
    let feed = &mut *feed;
    feed.frames += 1;
    if feed.frames % feed.interval as u64 != 0 {
        return;
    }
    let Some(frame) = feed.slot.take_newer(&mut feed.seen) else {
        return;
    };
    for mut model in &mut models {
        let report = model.kinematics.apply_frame(&frame);
        if report.applied {
            debug!(
                revision = model.kinematics.revision(),
                written = report.joints_written,
                missing = report.missing_joints,
                "Applied pose"
            );
        }
    }
}

/// Push link transforms to surface entities after the joint set changed
fn sync_surface_transforms(mut models: Query<&mut RobotModel>, mut surfaces: Query<(&Surface, &mut Transform)>) {
    for mut model in &mut models {
        let revision = model.kinematics.revision();
        if model.synced_revision == Some(revision) {
            continue;
        }
        for &entity in model.surface_entities() {
            let Ok((surface, mut transform)) = surfaces.get_mut(entity) else {
                continue;
            };
            if let Some(world) = model.kinematics.surface_world_transform(surface.id) {
                *transform = world.mul_transform(surface.mesh_fix);
            }
        }
        model.synced_revision = Some(revision);
    }
}

/// Dispose a model's material cache, then despawn it with its surfaces
fn despawn_models(
    mut commands: Commands,
    mut requests: MessageReader<DespawnModel>,
    mut caches: Query<&mut ModelMaterials>,
    mut materials: ResMut<Assets<SurfaceShader>>,
) {
    for request in requests.read() {
        let Ok(mut cache) = caches.get_mut(request.model) else {
            continue;
        };
        let handles = cache.0.dispose();
        for handle in &handles {
            materials.remove(handle);
        }
        info!(materials = handles.len(), "Robot model disposed");
        commands.entity(request.model).despawn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_asset_path() {
        assert_eq!(mesh_asset_path("robot/robot.urdf", "meshes/head.glb"), "robot/meshes/head.glb");
        assert_eq!(mesh_asset_path("robot.urdf", "meshes/head.glb"), "meshes/head.glb");
        assert_eq!(
            mesh_asset_path("robot/robot.urdf", "package://puppet/meshes/head.glb"),
            "meshes/head.glb"
        );
        assert_eq!(mesh_asset_path("robot/robot.urdf", "file:///opt/head.glb"), "/opt/head.glb");
    }

    #[test]
    fn test_mesh_bounds() {
        let mesh = Mesh::from(Cuboid::new(2.0, 4.0, 6.0));
        let bounds = mesh_bounds(&mesh).unwrap();
        assert!((bounds.max - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
        assert!((bounds.min + Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
    }
}
