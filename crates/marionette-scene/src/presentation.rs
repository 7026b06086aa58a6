//! Render mode, scan reveal and fault presentation systems

use bevy::pbr::wireframe::{Wireframe, WireframeColor};
use bevy::prelude::*;
use marionette_core::config::{AppearanceConfig, FaultGroupConfig, RenderMode};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::appearance::{dimmed_material, material_for, warning_material, xray_material, XRayVariant};
use crate::focus::{focus_point, resolve, Bounds, FaultPresentation};
use crate::kinematics::SurfaceId;
use crate::models::{ModelMaterials, ModelStatus, RobotModel, Surface, SurfaceBounds};
use crate::scan::{scan_material, ScanCandidate, ScanObserver, ScanSequencer, ScanVisual};
use crate::scene::CameraRig;
use crate::shading::SurfaceShader;
use crate::{ModelReady, ScanComplete, ScanSurface};

/// Active render mode and the parameters behind every material
#[derive(Debug, Clone, Resource)]
pub struct RenderSettings {
    pub mode: RenderMode,
    pub appearance: AppearanceConfig,
}

impl RenderSettings {
    pub fn new(appearance: AppearanceConfig) -> Self {
        Self {
            mode: appearance.mode,
            appearance,
        }
    }
}

/// Scan sequencer plus the model it is running on
#[derive(Resource)]
pub struct ScanDriver {
    pub sequencer: ScanSequencer,
    /// Start a run as soon as a model is ready
    pub auto_start: bool,
    model: Option<Entity>,
    /// Mode the run switched away from, put back when it completes
    restore_mode: Option<RenderMode>,
}

impl ScanDriver {
    pub fn new(sequencer: ScanSequencer, auto_start: bool) -> Self {
        Self {
            sequencer,
            auto_start,
            model: None,
            restore_mode: None,
        }
    }

    /// Cancel the active run, leaving surfaces in their current materials
    fn stop(&mut self) -> bool {
        self.model = None;
        self.restore_mode = None;
        self.sequencer.cancel()
    }

    /// Surfaces of `model` the active run still owns
    fn scanning(&self, model: Entity) -> HashSet<SurfaceId> {
        if self.model != Some(model) {
            return HashSet::new();
        }
        self.sequencer
            .run()
            .map(|run| run.tasks.iter().map(|t| t.surface).collect())
            .unwrap_or_default()
    }
}

#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCommand {
    Start,
    Cancel,
}

/// Name of the surface the host reports as faulted
#[derive(Debug, Clone, Default, Resource)]
pub struct FaultedSurface(pub Option<String>);

/// Anatomical groups faults expand to
#[derive(Debug, Clone, Default, Resource)]
pub struct FaultGroups(pub Vec<FaultGroupConfig>);

#[derive(Default, Resource)]
pub struct FaultState {
    presentation: FaultPresentation<Handle<SurfaceShader>>,
    faulted: HashSet<SurfaceId>,
    model: Option<Entity>,
}

impl FaultState {
    pub fn is_active(&self) -> bool {
        self.presentation.is_active()
    }

    pub fn group(&self) -> &[SurfaceId] {
        self.presentation.group()
    }
}

pub struct PresentationPlugin;

impl Plugin for PresentationPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<ScanCommand>()
            .init_resource::<FaultedSurface>()
            .init_resource::<FaultGroups>()
            .init_resource::<FaultState>()
            .add_systems(
                Update,
                (update_fault, handle_scan_requests, apply_render_mode, tick_scan)
                    .chain()
                    .after(crate::models::track_mesh_loading),
            );
    }
}

fn set_wireframe(commands: &mut Commands, entity: Entity, color: Option<Color>) {
    match color {
        Some(color) => {
            commands.entity(entity).insert((Wireframe, WireframeColor { color }));
        }
        None => {
            commands.entity(entity).remove::<(Wireframe, WireframeColor)>();
        }
    }
}

/// Surface bounds in model space
fn world_bounds(model: &RobotModel, surface: &Surface, bounds: Option<&SurfaceBounds>) -> Option<Bounds> {
    let local = bounds.and_then(|b| b.0)?;
    let transform = model.kinematics.surface_world_transform(surface.id)?;
    Some(local.transformed(&transform))
}

/// Swap every surface to the material of the current render mode
fn apply_render_mode(
    mut commands: Commands,
    settings: Res<RenderSettings>,
    scan: Res<ScanDriver>,
    mut fault: ResMut<FaultState>,
    mut models: Query<(&RobotModel, &mut ModelMaterials)>,
    mut surfaces: Query<(Entity, &Surface, &mut MeshMaterial3d<SurfaceShader>)>,
    mut materials: ResMut<Assets<SurfaceShader>>,
) {
    if !settings.is_changed() {
        return;
    }

    // Surfaces in a running scan are revealed into x-ray by the scan itself
    let scanning = scan.model.map(|model| scan.scanning(model)).unwrap_or_default();

    let mut updated = 0;
    for (entity, surface, mut slot) in &mut surfaces {
        if scan.model == Some(surface.model) && scanning.contains(&surface.id) {
            continue;
        }
        let Ok((model, mut cache)) = models.get_mut(surface.model) else {
            continue;
        };
        let Some(info) = model.kinematics.surface(surface.id) else {
            continue;
        };

        let material = material_for(info, settings.mode, &settings.appearance);
        let handle = cache.0.mode_handle(surface.id, settings.mode, || {
            materials.add(material.to_shader_material())
        });
        if let Some(existing) = materials.get_mut(&handle) {
            material.write_into(existing);
        }

        updated += 1;
        // A shown fault keeps its look and takes the new handle on restore
        if fault.presentation.set_original(surface.id, handle.clone()) {
            continue;
        }
        slot.0 = handle;
        set_wireframe(&mut commands, entity, material.wireframe_color());
    }
    info!(mode = ?settings.mode, surfaces = updated, "Render mode applied");
}

/// Collects scan progress for this frame
#[derive(Default)]
struct ScanEvents {
    started: Vec<(SurfaceId, usize, usize)>,
    complete: bool,
}

impl ScanObserver for ScanEvents {
    fn surface_started(&mut self, surface: SurfaceId, index: usize, total: usize) {
        self.started.push((surface, index, total));
    }

    fn scan_complete(&mut self) {
        self.complete = true;
    }
}

fn scan_candidates(
    model: &RobotModel,
    surfaces: &Query<(&Surface, Option<&SurfaceBounds>)>,
) -> Vec<ScanCandidate> {
    model
        .kinematics
        .surfaces()
        .iter()
        .map(|info| {
            let bounded = model
                .surface_entity(info.id)
                .and_then(|e| surfaces.get(e).ok())
                .and_then(|(surface, bounds)| world_bounds(model, surface, bounds));
            let height = match bounded {
                Some(bounds) => bounds.center().z,
                None => model
                    .kinematics
                    .surface_world_transform(info.id)
                    .map(|t| t.translation.z)
                    .unwrap_or_default(),
            };
            ScanCandidate {
                surface: info.id,
                family: info.family,
                class: info.class,
                is_outline: info.is_outline,
                height,
            }
        })
        .collect()
}

fn handle_scan_requests(
    time: Res<Time>,
    mut driver: ResMut<ScanDriver>,
    mut settings: ResMut<RenderSettings>,
    fault: Res<FaultState>,
    mut ready: MessageReader<ModelReady>,
    mut requests: MessageReader<ScanCommand>,
    models: Query<(Entity, &RobotModel, &ModelStatus)>,
    surfaces: Query<(&Surface, Option<&SurfaceBounds>)>,
) {
    let mut target = None;
    for message in ready.read() {
        if driver.auto_start {
            target = Some(message.model);
        }
    }
    for request in requests.read() {
        match request {
            ScanCommand::Start => {
                target = models
                    .iter()
                    .find(|(_, _, status)| **status == ModelStatus::Ready)
                    .map(|(entity, _, _)| entity);
                if target.is_none() {
                    warn!("Scan requested before a model is ready");
                }
            }
            ScanCommand::Cancel => {
                target = None;
                if driver.stop() {
                    info!("Scan cancelled");
                }
            }
        }
    }

    let Some(entity) = target else {
        return;
    };
    let Ok((_, model, _)) = models.get(entity) else {
        return;
    };

    let candidates = scan_candidates(model, &surfaces);
    if !driver.sequencer.start(time.elapsed_secs(), &candidates, &fault.faulted) {
        debug!("Scan not started");
        return;
    }
    driver.model = Some(entity);
    let total = driver.sequencer.run().map(|r| r.total()).unwrap_or(0);
    info!(surfaces = total, "Scan started");

    // Everything outside the run goes straight to x-ray
    if settings.mode != RenderMode::XRay {
        driver.restore_mode = Some(settings.mode);
        settings.mode = RenderMode::XRay;
    }
}

fn tick_scan(
    mut commands: Commands,
    time: Res<Time>,
    mut driver: ResMut<ScanDriver>,
    mut settings: ResMut<RenderSettings>,
    mut fault: ResMut<FaultState>,
    mut models: Query<(&RobotModel, &mut ModelMaterials)>,
    mut surfaces: Query<&mut MeshMaterial3d<SurfaceShader>>,
    mut materials: ResMut<Assets<SurfaceShader>>,
    mut started: MessageWriter<ScanSurface>,
    mut complete: MessageWriter<ScanComplete>,
) {
    if !driver.sequencer.is_active() {
        return;
    }
    let Some(entity) = driver.model else {
        return;
    };
    let Ok((model, mut cache)) = models.get_mut(entity) else {
        driver.stop();
        return;
    };

    let mut events = ScanEvents::default();
    let visuals = driver.sequencer.tick(time.elapsed_secs(), &mut events);
    let highlight = driver.sequencer.settings().highlight_color;

    for (id, visual) in visuals {
        let (Some(info), Some(surface_entity)) = (model.kinematics.surface(id), model.surface_entity(id)) else {
            continue;
        };
        let Ok(mut slot) = surfaces.get_mut(surface_entity) else {
            continue;
        };
        let target = xray_material(info, &settings.appearance.xray);

        match visual {
            ScanVisual::Final => {
                let handle = cache.0.xray_handle(id, XRayVariant::Standard, || {
                    materials.add(target.to_shader_material())
                });
                set_wireframe(&mut commands, surface_entity, None);
                if fault.presentation.set_original(id, handle.clone()) {
                    // Fault still shown: back to the dimmed look
                    if let Some(dimmed) = cache.0.cached_xray(id, XRayVariant::Dimmed) {
                        slot.0 = dimmed.clone();
                        continue;
                    }
                }
                slot.0 = handle;
            }
            ScanVisual::Highlight { .. } | ScanVisual::Fade { .. } => {
                let animated = scan_material(visual, highlight, &target);
                let handle = cache.0.xray_handle(id, XRayVariant::Scan, || {
                    materials.add(animated.to_shader_material())
                });
                if let Some(existing) = materials.get_mut(&handle) {
                    animated.write_into(existing);
                }
                if slot.0 != handle {
                    slot.0 = handle;
                    set_wireframe(&mut commands, surface_entity, None);
                }
            }
        }
    }

    for (id, index, total) in events.started {
        let name = model
            .kinematics
            .surface(id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        debug!(surface = %name, index, total, "Scanning surface");
        started.write(ScanSurface {
            surface: id,
            name,
            index,
            total,
        });
    }
    if events.complete {
        info!("Scan complete");
        complete.write(ScanComplete);
        driver.model = None;
        match driver.restore_mode.take() {
            // Mode left alone during the run goes back to what it was
            Some(mode) if settings.mode == RenderMode::XRay => settings.mode = mode,
            // Scanned surfaces end in x-ray; bring them back to the active mode
            _ if settings.mode != RenderMode::XRay => settings.set_changed(),
            _ => {}
        }
    }
}

/// Show or clear the fault presentation when the faulted surface changes
fn update_fault(
    mut commands: Commands,
    faulted: Res<FaultedSurface>,
    groups: Res<FaultGroups>,
    settings: Res<RenderSettings>,
    mut state: ResMut<FaultState>,
    mut ready: MessageReader<ModelReady>,
    mut driver: ResMut<ScanDriver>,
    mut rig: ResMut<CameraRig>,
    mut models: Query<(Entity, &RobotModel, &mut ModelMaterials)>,
    mut surfaces: Query<(Entity, &Surface, &mut MeshMaterial3d<SurfaceShader>, Option<&SurfaceBounds>)>,
    mut materials: ResMut<Assets<SurfaceShader>>,
) {
    let model_ready = ready.read().count() > 0;
    if !faulted.is_changed() && !model_ready {
        return;
    }

    let Some(name) = faulted.0.as_deref() else {
        if state.presentation.is_active() {
            let model = state.model;
            let slots = surfaces
                .iter_mut()
                .filter(|(_, surface, _, _)| Some(surface.model) == model)
                .map(|(_, surface, slot, _)| (surface.id, &mut slot.into_inner().0));
            state.presentation.restore(slots);

            // Wireframe edges come back with the restored mode
            if let Some((entity, robot, _)) = model.and_then(|e| models.get(e).ok()) {
                let scanning = driver.scanning(entity);
                for (surface_entity, surface, _, _) in &surfaces {
                    if surface.model != entity || scanning.contains(&surface.id) {
                        continue;
                    }
                    let color = robot
                        .kinematics
                        .surface(surface.id)
                        .and_then(|info| material_for(info, settings.mode, &settings.appearance).wireframe_color());
                    set_wireframe(&mut commands, surface_entity, color);
                }
            }
            info!("Fault cleared");
        }
        state.faulted.clear();
        state.model = None;
        rig.controller.set_fault(None);
        return;
    };

    let found = models
        .iter()
        .find_map(|(entity, model, _)| model.kinematics.surface_by_name(name).map(|s| (entity, s.id)));
    let Some((entity, faulted_id)) = found else {
        warn!(surface = %name, "Faulted surface not found in any model");
        return;
    };
    let Ok((_, model, mut cache)) = models.get_mut(entity) else {
        return;
    };

    let group = resolve(faulted_id, model.kinematics.surfaces(), &groups.0);
    let bounds: Vec<Bounds> = surfaces
        .iter()
        .filter(|(_, surface, _, _)| surface.model == entity && group.contains(&surface.id))
        .filter_map(|(_, surface, _, bounds)| world_bounds(model, surface, bounds))
        .collect();

    if driver.stop() {
        info!("Fault reported, scan cancelled");
    }

    // Warning and dimmed handles up front so the swap only clones
    let mut looks = Vec::with_capacity(model.kinematics.surfaces().len());
    for info in model.kinematics.surfaces() {
        let warning = cache.0.xray_handle(info.id, XRayVariant::Warning, || {
            materials.add(warning_material().to_shader_material())
        });
        let dimmed = cache.0.xray_handle(info.id, XRayVariant::Dimmed, || {
            materials.add(dimmed_material(info).to_shader_material())
        });
        looks.push((warning, dimmed));
    }
    let look = |id: SurfaceId, warning: bool| {
        looks
            .get(id.index())
            .map(|(w, d)| if warning { w.clone() } else { d.clone() })
            .unwrap_or_default()
    };

    let slots = surfaces
        .iter_mut()
        .filter(|(_, surface, _, _)| surface.model == entity)
        .map(|(_, surface, slot, _)| (surface.id, &mut slot.into_inner().0));
    state.presentation.apply(&group, slots, |id| look(id, true), |id| look(id, false));
    // Warning and dimmed looks are solid fills, never edges
    for (surface_entity, surface, _, _) in &surfaces {
        if surface.model == entity {
            set_wireframe(&mut commands, surface_entity, None);
        }
    }
    state.faulted = group.iter().copied().collect();
    state.model = Some(entity);

    let focus = focus_point(&bounds);
    info!(surface = %name, group = group.len(), focus = ?focus, "Fault shown");
    if focus.is_some() {
        rig.controller.set_fault(focus);
    }
}
