//! Banded and rim-lit surface shading
//!
//! Every surface draws with [`SurfaceShader`], Bevy's PBR material extended by
//! a small fragment shader. The shader quantizes the lit response into bands
//! for the shaded mode and adds a view-dependent Fresnel rim for x-ray.

use bevy::asset::embedded_asset;
use bevy::pbr::{ExtendedMaterial, MaterialExtension, MaterialPlugin};
use bevy::prelude::*;
use bevy::render::render_resource::{AsBindGroup, ShaderType};
use bevy::shader::ShaderRef;

const SHADER_PATH: &str = "embedded://marionette_scene/shaders/surface_shading.wgsl";

/// Material every surface entity carries
pub type SurfaceShader = ExtendedMaterial<StandardMaterial, SurfaceShading>;

/// How the fragment shader treats the lit PBR color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ShadingMode {
    /// Plain PBR or unlit output
    #[default]
    Standard = 0,
    /// Quantized bands, rim light, specular and outline
    Banded = 1,
    /// Unlit translucent color with a Fresnel rim
    Fresnel = 2,
}

/// Uniform block read by `shaders/surface_shading.wgsl`
#[derive(Debug, Clone, Copy, PartialEq, Default, ShaderType, Reflect)]
pub struct ShadingUniform {
    pub mode: u32,
    pub bands: u32,
    pub smoothing: f32,
    pub rim_intensity: f32,
    pub rim_power: f32,
    pub ambient_intensity: f32,
    pub specular_intensity: f32,
    /// Silhouette width as a fraction of the grazing range, 0 disables it
    pub outline_thickness: f32,
    pub outline_color: Vec4,
}

impl ShadingUniform {
    pub fn mode(&self) -> ShadingMode {
        match self.mode {
            1 => ShadingMode::Banded,
            2 => ShadingMode::Fresnel,
            _ => ShadingMode::Standard,
        }
    }
}

#[derive(Asset, AsBindGroup, Reflect, Debug, Clone, Default)]
pub struct SurfaceShading {
    #[uniform(100)]
    pub uniform: ShadingUniform,
}

impl MaterialExtension for SurfaceShading {
    fn fragment_shader() -> ShaderRef {
        SHADER_PATH.into()
    }
}

/// Registers the shader and the render pipeline for [`SurfaceShader`].
///
/// Headless apps skip this and only call `init_asset::<SurfaceShader>()`.
pub struct SurfaceShadingPlugin;

impl Plugin for SurfaceShadingPlugin {
    fn build(&self, app: &mut App) {
        embedded_asset!(app, "shaders/surface_shading.wgsl");
        app.add_plugins(MaterialPlugin::<SurfaceShader>::default());
    }
}

