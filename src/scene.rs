//! The display graph: lights, background and the single current model.

use nalgebra::Vector3;

use crate::config::{ViewerConfig, rgb};
use crate::model::Model;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub color: [f32; 3],
    pub intensity: f32,
    /// Unit vector pointing from the scene towards the light.
    pub direction: Vector3<f32>,
}

#[derive(Debug)]
pub struct Scene {
    pub background: [f32; 3],
    pub ambient: AmbientLight,
    pub directional: DirectionalLight,
    current: Option<Model>,
    /// Bumped on every attach/evict so GPU buffers know when to re-upload.
    revision: u64,
}

impl Scene {
    pub fn new(config: &ViewerConfig) -> Self {
        let [x, y, z] = config.directional.position;
        Self {
            background: rgb(config.background),
            ambient: AmbientLight {
                color: rgb(config.ambient.color),
                intensity: config.ambient.intensity,
            },
            directional: DirectionalLight {
                color: rgb(config.directional.color),
                intensity: config.directional.intensity,
                direction: Vector3::new(x, y, z)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(Vector3::z),
            },
            current: None,
            revision: 0,
        }
    }

    /// Takes background and lights from `config`, keeping the current model.
    pub fn relight(&mut self, config: &ViewerConfig) {
        let lit = Scene::new(config);
        self.background = lit.background;
        self.ambient = lit.ambient;
        self.directional = lit.directional;
    }

    /// Makes `model` the current model, returning the one it replaced.
    pub fn attach(&mut self, model: Model) -> Option<Model> {
        self.revision += 1;
        self.current.replace(model)
    }

    pub fn evict(&mut self) -> Option<Model> {
        let old = self.current.take();
        if old.is_some() {
            self.revision += 1;
        }
        old
    }

    pub fn current(&self) -> Option<&Model> {
        self.current.as_ref()
    }

    /// For transform changes only; geometry edits would not reach the GPU.
    pub fn current_mut(&mut self) -> Option<&mut Model> {
        self.current.as_mut()
    }

    pub fn model_count(&self) -> usize {
        usize::from(self.current.is_some())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str) -> Model {
        Model::from_obj(name, b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n", None).unwrap()
    }

    #[test]
    fn attach_replaces_previous_model() {
        let mut scene = Scene::new(&ViewerConfig::default());
        assert_eq!(scene.model_count(), 0);

        assert!(scene.attach(model("a.obj")).is_none());
        let old = scene.attach(model("b.obj")).unwrap();

        assert_eq!(old.name, "a.obj");
        assert_eq!(scene.model_count(), 1);
        assert_eq!(scene.current().unwrap().name, "b.obj");
    }

    #[test]
    fn revision_tracks_changes() {
        let mut scene = Scene::new(&ViewerConfig::default());
        let r0 = scene.revision();
        scene.evict();
        assert_eq!(scene.revision(), r0, "evicting nothing is not a change");

        scene.attach(model("a.obj"));
        scene.evict();
        assert_eq!(scene.revision(), r0 + 2);
        assert_eq!(scene.model_count(), 0);
    }

    #[test]
    fn relight_keeps_model_and_revision() {
        let mut scene = Scene::new(&ViewerConfig::default());
        scene.attach(model("a.obj"));
        let revision = scene.revision();

        let config = ViewerConfig {
            background: 0x000000,
            ..Default::default()
        };
        scene.relight(&config);

        assert_eq!(scene.background, [0.0; 3]);
        assert_eq!(scene.revision(), revision);
        assert_eq!(scene.current().unwrap().name, "a.obj");
    }

    #[test]
    fn light_direction_is_normalized() {
        let scene = Scene::new(&ViewerConfig::default());
        assert!((scene.directional.direction.norm() - 1.0).abs() < 1e-6);
    }
}
