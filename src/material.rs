//! Companion material descriptions (Wavefront MTL).

use std::sync::Arc;

use crate::texture::TextureImage;

/// Phong surface appearance of one named material.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
    pub opacity: f32,
    /// `map_Kd`, relative to the material file.
    pub diffuse_texture: Option<String>,
    /// Decoded `diffuse_texture`, once it has been fetched.
    pub diffuse_map: Option<Arc<TextureImage>>,
}

/// Faint grey highlight used when a material has no `Ks`.
pub const DEFAULT_SPECULAR: [f32; 3] = [17.0 / 255.0; 3];
pub const DEFAULT_SHININESS: f32 = 30.0;

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse: [1.0; 3],
            specular: DEFAULT_SPECULAR,
            shininess: DEFAULT_SHININESS,
            opacity: 1.0,
            diffuse_texture: None,
            diffuse_map: None,
        }
    }
}

impl From<tobj::Material> for Material {
    fn from(m: tobj::Material) -> Self {
        let defaults = Material::default();
        // `Tr` is the inverse of `d`; tobj leaves it in the unknown bucket.
        let opacity = m.dissolve.or_else(|| {
            m.unknown_param
                .get("Tr")
                .and_then(|tr| tr.trim().parse::<f32>().ok())
                .map(|tr| 1.0 - tr)
        });
        Self {
            name: m.name,
            diffuse: m.diffuse.unwrap_or(defaults.diffuse),
            specular: m.specular.unwrap_or(defaults.specular),
            shininess: m.shininess.unwrap_or(defaults.shininess),
            opacity: opacity.unwrap_or(defaults.opacity).clamp(0.0, 1.0),
            diffuse_texture: m.diffuse_texture.filter(|t| !t.trim().is_empty()),
            diffuse_map: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialLibrary {
    materials: Vec<Material>,
}

impl MaterialLibrary {
    pub fn parse(bytes: &[u8]) -> Result<Self, tobj::LoadError> {
        let (materials, _names) = tobj::load_mtl_buf(&mut &bytes[..])?;
        Ok(Self {
            materials: materials.into_iter().map(Material::from).collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Material> {
        self.materials.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Material> {
        self.materials.iter_mut()
    }
}
