//! Per-surface material substitution
//!
//! [`material_for`] turns a surface and a render mode into a renderer-agnostic
//! [`SurfaceMaterial`]; [`SurfaceMaterial::to_shader_material`] maps that onto
//! the [`SurfaceShader`] PBR extension. Handles are kept per model instance in a
//! [`MaterialCache`] so that toggling modes reuses them.

use bevy::prelude::*;
use marionette_core::config::{AppearanceConfig, OutlineParams, RenderMode, ShadedParams, XRayParams};
use marionette_core::surface::{luminance, SurfaceClass};
use std::collections::HashMap;
use std::hash::Hash;

use crate::kinematics::{SurfaceId, SurfaceInfo};
use crate::shading::{ShadingMode, ShadingUniform, SurfaceShader, SurfaceShading};

/// Antennas render flat and dark in every mode
pub const ANTENNA_COLOR: [f32; 3] = [0.04, 0.04, 0.05];
/// Shaded fallback when the description carries no color
pub const DEFAULT_SURFACE_COLOR: [f32; 4] = [0.82, 0.82, 0.85, 1.0];

pub const XRAY_LENS_COLOR: [f32; 3] = [0.35, 0.6, 1.0];
pub const XRAY_SHELL_COLOR: [f32; 3] = [0.75, 0.85, 0.95];
/// Generic x-ray hues for dark, mid and light origin colors
pub const XRAY_GENERIC_COLORS: [[f32; 3]; 3] = [[0.25, 0.5, 0.9], [0.4, 0.75, 1.0], [0.7, 0.9, 1.0]];

pub const WARNING_COLOR: [f32; 3] = [1.0, 0.18, 0.05];
pub const DIMMED_OPACITY: f32 = 0.04;

/// Luminance bucket of a surface's origin color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuminanceBucket {
    Dark,
    Mid,
    Light,
}

impl LuminanceBucket {
    pub fn of(color: Option<[f32; 4]>) -> Self {
        match color {
            None => LuminanceBucket::Mid,
            Some([r, g, b, _]) => {
                let l = luminance([r, g, b]);
                if l < 0.2 {
                    LuminanceBucket::Dark
                } else if l < 0.6 {
                    LuminanceBucket::Mid
                } else {
                    LuminanceBucket::Light
                }
            }
        }
    }
}

/// Which of a surface's translucent materials a cached handle is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XRayVariant {
    /// Final x-ray look
    Standard,
    /// Per-frame scratch material animated by the scan
    Scan,
    /// Faulted group highlight
    Warning,
    /// Everything outside the faulted group
    Dimmed,
}

/// Renderer-agnostic material description
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceMaterial {
    /// Banded lighting response
    Shaded {
        color: [f32; 4],
        bands: u32,
        smoothing: f32,
        rim_intensity: f32,
        ambient_intensity: f32,
        specular_intensity: f32,
        outline: Option<OutlineParams>,
    },
    /// Flat translucent color with a brightened rim
    XRay {
        color: [f32; 3],
        opacity: f32,
        rim_intensity: f32,
        rim_power: f32,
    },
    /// Edges only
    Wireframe { color: [f32; 3] },
    /// Unlit opaque color
    Flat { color: [f32; 3] },
}

/// Final x-ray color of a surface, from its class and origin color
pub fn xray_color(surface: &SurfaceInfo) -> [f32; 3] {
    match surface.class {
        SurfaceClass::Antenna => ANTENNA_COLOR,
        SurfaceClass::Lens => XRAY_LENS_COLOR,
        SurfaceClass::Shell => XRAY_SHELL_COLOR,
        SurfaceClass::Generic => match LuminanceBucket::of(surface.origin_color) {
            LuminanceBucket::Dark => XRAY_GENERIC_COLORS[0],
            LuminanceBucket::Mid => XRAY_GENERIC_COLORS[1],
            LuminanceBucket::Light => XRAY_GENERIC_COLORS[2],
        },
    }
}

pub fn xray_material(surface: &SurfaceInfo, params: &XRayParams) -> SurfaceMaterial {
    if surface.class == SurfaceClass::Antenna {
        return SurfaceMaterial::Flat { color: ANTENNA_COLOR };
    }
    SurfaceMaterial::XRay {
        color: xray_color(surface),
        opacity: params.opacity,
        rim_intensity: params.rim_intensity,
        rim_power: params.rim_power,
    }
}

fn shaded_material(surface: &SurfaceInfo, params: &ShadedParams) -> SurfaceMaterial {
    SurfaceMaterial::Shaded {
        color: surface.origin_color.unwrap_or(DEFAULT_SURFACE_COLOR),
        bands: params.bands.max(1),
        smoothing: params.smoothing,
        rim_intensity: params.rim_intensity,
        ambient_intensity: params.ambient_intensity,
        specular_intensity: params.specular_intensity,
        outline: params.outline.clone(),
    }
}

/// Material of a surface in the given mode
pub fn material_for(surface: &SurfaceInfo, mode: RenderMode, params: &AppearanceConfig) -> SurfaceMaterial {
    if surface.class == SurfaceClass::Antenna {
        return SurfaceMaterial::Flat { color: ANTENNA_COLOR };
    }
    match mode {
        RenderMode::Shaded => shaded_material(surface, &params.shaded),
        RenderMode::XRay => xray_material(surface, &params.xray),
        RenderMode::Wireframe => SurfaceMaterial::Wireframe {
            color: params.wireframe_color,
        },
    }
}

/// Opaque warning look of a faulted surface
pub fn warning_material() -> SurfaceMaterial {
    SurfaceMaterial::XRay {
        color: WARNING_COLOR,
        opacity: 1.0,
        rim_intensity: 1.0,
        rim_power: 1.0,
    }
}

/// Near-invisible look of surfaces outside the faulted group
pub fn dimmed_material(surface: &SurfaceInfo) -> SurfaceMaterial {
    SurfaceMaterial::XRay {
        color: xray_color(surface),
        opacity: DIMMED_OPACITY,
        rim_intensity: 0.0,
        rim_power: 1.0,
    }
}

impl SurfaceMaterial {
    pub fn is_wireframe(&self) -> bool {
        matches!(self, SurfaceMaterial::Wireframe { .. })
    }

    /// Edge color when the surface draws as a wireframe
    pub fn wireframe_color(&self) -> Option<Color> {
        match self {
            SurfaceMaterial::Wireframe { color } => Some(Color::srgb(color[0], color[1], color[2])),
            _ => None,
        }
    }

    /// Uniform block of the surface shader
    pub fn shading(&self) -> ShadingUniform {
        match self {
            SurfaceMaterial::Shaded {
                bands,
                smoothing,
                rim_intensity,
                ambient_intensity,
                specular_intensity,
                outline,
                ..
            } => {
                let (outline_thickness, outline_color) = match outline {
                    Some(o) => (o.thickness.clamp(0.0, 1.0), Vec4::new(o.color[0], o.color[1], o.color[2], 1.0)),
                    None => (0.0, Vec4::ZERO),
                };
                ShadingUniform {
                    mode: ShadingMode::Banded as u32,
                    bands: (*bands).max(1),
                    smoothing: smoothing.clamp(0.0, 1.0),
                    rim_intensity: *rim_intensity,
                    ambient_intensity: ambient_intensity.clamp(0.0, 1.0),
                    specular_intensity: *specular_intensity,
                    outline_thickness,
                    outline_color,
                    ..default()
                }
            }
            SurfaceMaterial::XRay {
                rim_intensity,
                rim_power,
                ..
            } => ShadingUniform {
                mode: ShadingMode::Fresnel as u32,
                rim_intensity: *rim_intensity,
                rim_power: *rim_power,
                ..default()
            },
            SurfaceMaterial::Wireframe { .. } | SurfaceMaterial::Flat { .. } => ShadingUniform::default(),
        }
    }

    /// PBR base the shader extension starts from
    fn base_material(&self) -> StandardMaterial {
        match self {
            SurfaceMaterial::Shaded {
                color,
                specular_intensity,
                ..
            } => {
                let [r, g, b, a] = *color;
                StandardMaterial {
                    base_color: Color::srgba(r, g, b, a),
                    perceptual_roughness: (1.0 - specular_intensity).clamp(0.2, 1.0),
                    metallic: 0.0,
                    alpha_mode: if a < 1.0 { AlphaMode::Blend } else { AlphaMode::Opaque },
                    ..default()
                }
            }
            SurfaceMaterial::XRay { color, opacity, .. } => {
                let [r, g, b] = *color;
                StandardMaterial {
                    base_color: Color::srgba(r, g, b, *opacity),
                    unlit: true,
                    alpha_mode: if *opacity < 1.0 { AlphaMode::Blend } else { AlphaMode::Opaque },
                    ..default()
                }
            }
            // Transparent fill so only the `Wireframe` edges remain
            SurfaceMaterial::Wireframe { .. } => StandardMaterial {
                base_color: Color::srgba(0.0, 0.0, 0.0, 0.0),
                unlit: true,
                alpha_mode: AlphaMode::Blend,
                ..default()
            },
            SurfaceMaterial::Flat { color } => StandardMaterial {
                base_color: Color::srgb(color[0], color[1], color[2]),
                unlit: true,
                ..default()
            },
        }
    }

    pub fn to_shader_material(&self) -> SurfaceShader {
        SurfaceShader {
            base: self.base_material(),
            extension: SurfaceShading {
                uniform: self.shading(),
            },
        }
    }

    /// Overwrite an existing material in place, keeping its handle
    pub fn write_into(&self, material: &mut SurfaceShader) {
        *material = self.to_shader_material();
    }
}

/// Material handles of one model instance
#[derive(Debug)]
pub struct MaterialCache<H> {
    shaded: HashMap<SurfaceId, H>,
    xray: HashMap<(SurfaceId, XRayVariant), H>,
    wireframe: HashMap<SurfaceId, H>,
}

impl<H> Default for MaterialCache<H> {
    fn default() -> Self {
        Self {
            shaded: HashMap::new(),
            xray: HashMap::new(),
            wireframe: HashMap::new(),
        }
    }
}

impl<H: Clone> MaterialCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_insert<K: Eq + Hash>(map: &mut HashMap<K, H>, key: K, create: impl FnOnce() -> H) -> H {
        map.entry(key).or_insert_with(create).clone()
    }

    /// Handle of a surface's material in the given mode, created on first use
    pub fn mode_handle(&mut self, id: SurfaceId, mode: RenderMode, create: impl FnOnce() -> H) -> H {
        match mode {
            RenderMode::Shaded => Self::get_or_insert(&mut self.shaded, id, create),
            RenderMode::XRay => Self::get_or_insert(&mut self.xray, (id, XRayVariant::Standard), create),
            RenderMode::Wireframe => Self::get_or_insert(&mut self.wireframe, id, create),
        }
    }

    pub fn xray_handle(&mut self, id: SurfaceId, variant: XRayVariant, create: impl FnOnce() -> H) -> H {
        Self::get_or_insert(&mut self.xray, (id, variant), create)
    }

    pub fn cached_xray(&self, id: SurfaceId, variant: XRayVariant) -> Option<&H> {
        self.xray.get(&(id, variant))
    }

    pub fn len(&self) -> usize {
        self.shaded.len() + self.xray.len() + self.wireframe.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every entry, returning the handles so their assets can be freed
    pub fn dispose(&mut self) -> Vec<H> {
        let mut handles: Vec<H> = self.shaded.drain().map(|(_, h)| h).collect();
        handles.extend(self.xray.drain().map(|(_, h)| h));
        handles.extend(self.wireframe.drain().map(|(_, h)| h));
        handles
    }
}
