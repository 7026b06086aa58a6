//! Faulted surface expansion and the reversible fault presentation

use bevy::prelude::*;
use marionette_core::config::FaultGroupConfig;
use marionette_core::robot::Geometry;
use std::collections::HashMap;
use tracing::debug;

use crate::kinematics::{SurfaceId, SurfaceInfo};

/// Axis-aligned box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Bounds of this box after a transform
    pub fn transformed(&self, transform: &Transform) -> Bounds {
        let corners = self.corners().map(|c| transform.transform_point(c));
        let mut bounds = Bounds {
            min: corners[0],
            max: corners[0],
        };
        for c in &corners[1..] {
            bounds.min = bounds.min.min(*c);
            bounds.max = bounds.max.max(*c);
        }
        bounds
    }
}

/// Local bounds of primitive geometry. Mesh bounds come from the loaded asset.
pub fn geometry_bounds(geometry: &Geometry) -> Option<Bounds> {
    let half = match geometry {
        Geometry::Box { size } => Vec3::new(size[0] as f32, size[1] as f32, size[2] as f32) * 0.5,
        Geometry::Cylinder { radius, length } => Vec3::new(*radius as f32, *radius as f32, *length as f32 * 0.5),
        Geometry::Sphere { radius } => Vec3::splat(*radius as f32),
        Geometry::Mesh { .. } => return None,
    };
    Some(Bounds::new(-half, half))
}

fn group_contains(group: &FaultGroupConfig, surface: &SurfaceInfo) -> bool {
    group.members.iter().any(|m| *m == surface.name)
        || surface.ancestors.iter().any(|link| group.anchors.contains(link))
}

/// Expand a faulted surface to its anatomical group.
///
/// The nearest ancestor link that anchors a group wins; otherwise a group
/// naming the surface explicitly. Without a match only the surface itself is
/// returned.
pub fn resolve(faulted: SurfaceId, surfaces: &[SurfaceInfo], groups: &[FaultGroupConfig]) -> Vec<SurfaceId> {
    let Some(surface) = surfaces.iter().find(|s| s.id == faulted) else {
        return vec![faulted];
    };

    let by_anchor = surface
        .ancestors
        .iter()
        .find_map(|link| groups.iter().find(|g| g.anchors.contains(link)));
    let group = by_anchor.or_else(|| groups.iter().find(|g| g.members.contains(&surface.name)));

    let Some(group) = group else {
        return vec![faulted];
    };

    let mut ids: Vec<SurfaceId> = surfaces
        .iter()
        .filter(|s| group_contains(group, s))
        .map(|s| s.id)
        .collect();
    if !ids.contains(&faulted) {
        ids.push(faulted);
    }
    ids.sort();
    debug!(surface = %surface.name, group = %group.name, size = ids.len(), "Resolved fault group");
    ids
}

/// Center of the union of the given bounds; `None` when there are none
pub fn focus_point(bounds: &[Bounds]) -> Option<Vec3> {
    let (first, rest) = bounds.split_first()?;
    let union = rest.iter().fold(*first, |acc, b| acc.union(b));
    if union.min.is_finite() && union.max.is_finite() {
        Some(union.center())
    } else {
        None
    }
}

/// "Faulted group loud, everything else faint" pass that can be undone.
///
/// `H` is whatever material handle the surfaces carry.
#[derive(Debug)]
pub struct FaultPresentation<H> {
    originals: HashMap<SurfaceId, H>,
    group: Vec<SurfaceId>,
}

impl<H> Default for FaultPresentation<H> {
    fn default() -> Self {
        Self {
            originals: HashMap::new(),
            group: Vec::new(),
        }
    }
}

impl<H: Clone> FaultPresentation<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.originals.is_empty()
    }

    pub fn group(&self) -> &[SurfaceId] {
        &self.group
    }

    /// Swap every slot to the warning or dimmed look. The first material seen
    /// for a surface is kept as its original, so re-applying for a new group
    /// still restores the pre-fault look.
    pub fn apply<'a>(
        &mut self,
        group: &[SurfaceId],
        slots: impl IntoIterator<Item = (SurfaceId, &'a mut H)>,
        mut warning: impl FnMut(SurfaceId) -> H,
        mut dimmed: impl FnMut(SurfaceId) -> H,
    ) where
        H: 'a,
    {
        for (id, slot) in slots {
            self.originals.entry(id).or_insert_with(|| slot.clone());
            *slot = if group.contains(&id) { warning(id) } else { dimmed(id) };
        }
        self.group = group.to_vec();
    }

    /// Replace the stored original of a surface, e.g. after a mode switch
    /// while the fault is shown
    pub fn set_original(&mut self, id: SurfaceId, handle: H) -> bool {
        match self.originals.get_mut(&id) {
            Some(original) => {
                *original = handle;
                true
            }
            None => false,
        }
    }

    /// Put every original back
    pub fn restore<'a>(&mut self, slots: impl IntoIterator<Item = (SurfaceId, &'a mut H)>)
    where
        H: 'a,
    {
        for (id, slot) in slots {
            if let Some(original) = self.originals.remove(&id) {
                *slot = original;
            }
        }
        self.originals.clear();
        self.group.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::tests::test_model;

    fn groups() -> Vec<FaultGroupConfig> {
        vec![
            FaultGroupConfig {
                name: "head_assembly".to_string(),
                anchors: vec!["head".to_string()],
                members: Vec::new(),
            },
            FaultGroupConfig {
                name: "base_parts".to_string(),
                anchors: Vec::new(),
                members: vec!["base_plate".to_string(), "torso".to_string()],
            },
        ]
    }

    fn id(name: &str) -> SurfaceId {
        test_model().surface_by_name(name).unwrap().id
    }

    #[test]
    fn test_resolve_by_ancestor_anchor() {
        let model = test_model();
        let group = resolve(id("cam_front"), model.surfaces(), &groups());
        let names: Vec<&str> = group
            .iter()
            .map(|i| model.surface(*i).unwrap().name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["head_frame", "cam_front", "left_antenna_visual", "right_antenna_visual"]
        );
    }

    #[test]
    fn test_resolve_by_membership_and_fallbacks() {
        let model = test_model();
        let group = resolve(id("torso"), model.surfaces(), &groups());
        assert_eq!(group, vec![id("base_plate"), id("torso")]);

        let alone = resolve(id("body_shell"), model.surfaces(), &groups());
        assert_eq!(alone, vec![id("body_shell")]);

        assert_eq!(resolve(SurfaceId(42), model.surfaces(), &groups()), vec![SurfaceId(42)]);
        assert_eq!(resolve(id("torso"), model.surfaces(), &[]), vec![id("torso")]);
    }

    #[test]
    fn test_focus_point_unions_bounds() {
        assert_eq!(focus_point(&[]), None);
        let a = Bounds::new(Vec3::ZERO, Vec3::ONE);
        let b = Bounds::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(3.0, 1.0, 1.0));
        assert_eq!(focus_point(&[a]), Some(Vec3::splat(0.5)));
        assert_eq!(focus_point(&[a, b]), Some(Vec3::new(1.5, 0.5, 0.5)));
        let broken = Bounds {
            min: Vec3::splat(f32::NAN),
            max: Vec3::ONE,
        };
        assert_eq!(focus_point(&[broken]), None);
    }

    #[test]
    fn test_geometry_bounds_and_transform() {
        let cylinder = geometry_bounds(&Geometry::Cylinder {
            radius: 0.1,
            length: 0.4,
        })
        .unwrap();
        assert!((cylinder.max - Vec3::new(0.1, 0.1, 0.2)).length() < 1e-6);
        assert!(geometry_bounds(&Geometry::Mesh {
            filename: "a.glb".to_string(),
            scale: [1.0; 3],
        })
        .is_none());

        let moved = cylinder.transformed(&Transform::from_xyz(1.0, 0.0, 0.0));
        assert!((moved.center() - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn test_presentation_is_reversible() {
        let mut materials = vec![(SurfaceId(0), "a"), (SurfaceId(1), "b"), (SurfaceId(2), "c")];
        let mut presentation = FaultPresentation::new();

        presentation.apply(
            &[SurfaceId(1)],
            materials.iter_mut().map(|(id, h)| (*id, h)),
            |_| "warn",
            |_| "dim",
        );
        assert!(presentation.is_active());
        assert_eq!(presentation.group(), &[SurfaceId(1)]);
        assert_eq!(
            materials.iter().map(|(_, h)| *h).collect::<Vec<_>>(),
            vec!["dim", "warn", "dim"]
        );

        // Moving the fault keeps the pre-fault originals
        presentation.apply(
            &[SurfaceId(2)],
            materials.iter_mut().map(|(id, h)| (*id, h)),
            |_| "warn",
            |_| "dim",
        );
        assert!(presentation.set_original(SurfaceId(0), "a2"));

        presentation.restore(materials.iter_mut().map(|(id, h)| (*id, h)));
        assert_eq!(
            materials.iter().map(|(_, h)| *h).collect::<Vec<_>>(),
            vec!["a2", "b", "c"]
        );
        assert!(!presentation.is_active());
        assert!(!presentation.set_original(SurfaceId(0), "x"));
    }
}
