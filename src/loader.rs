//! Materials-then-mesh load pipeline.
//!
//! ```text
//! MaterialsPending ──ok / fallback──▶ MeshPending ──ok──▶ Attached
//!                                          └──err──▶ Failed
//! ```
//!
//! A material failure is never fatal: the mesh is loaded undecorated and a
//! warning is logged. The same goes for a diffuse map that cannot be fetched
//! or decoded, which only costs that material its texture. A mesh failure
//! ends the attempt.

use std::collections::HashMap;
use std::sync::Arc;

use crate::asset::{AssetSource, FetchError, material_path_for, sibling_path};
use crate::material::MaterialLibrary;
use crate::model::{MeshError, Model};
use crate::normalize::{Normalization, normalize};
use crate::texture::TextureImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    MaterialsPending,
    MeshPending,
    Attached,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{0}: no companion material path (expected a .{1} file)")]
    InvalidMaterialPath(String, String),
    #[error("material fetch failed: {0}")]
    MaterialFetch(#[source] FetchError),
    #[error("{path}: material file is not valid MTL: {source}")]
    Material {
        path: String,
        #[source]
        source: tobj::LoadError,
    },
    #[error("mesh fetch failed: {0}")]
    MeshFetch(#[source] FetchError),
    #[error("{path}: {source}")]
    Mesh {
        path: String,
        #[source]
        source: MeshError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialStatus {
    /// Number of materials in the companion library.
    Applied(usize),
    /// Why the mesh was loaded undecorated.
    Skipped(String),
}

/// Knobs the pipeline needs from [`crate::config::ViewerConfig`].
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub mesh_extension: String,
    pub material_extension: String,
    pub target_extent: f32,
}

impl From<&crate::config::ViewerConfig> for LoadSettings {
    fn from(config: &crate::config::ViewerConfig) -> Self {
        Self {
            mesh_extension: config.mesh_extension.clone(),
            material_extension: config.material_extension.clone(),
            target_extent: config.target_extent,
        }
    }
}

#[derive(Debug)]
pub struct LoadedModel {
    pub model: Model,
    pub materials: MaterialStatus,
    pub normalization: Normalization,
}

async fn load_materials(
    source: &AssetSource,
    mesh_path: &str,
    settings: &LoadSettings,
) -> Result<MaterialLibrary, LoadError> {
    let path = material_path_for(mesh_path, &settings.mesh_extension, &settings.material_extension)
        .ok_or_else(|| {
            LoadError::InvalidMaterialPath(mesh_path.to_owned(), settings.mesh_extension.clone())
        })?;
    let bytes = source.fetch(&path).await.map_err(LoadError::MaterialFetch)?;
    let mut library =
        MaterialLibrary::parse(&bytes).map_err(|source| LoadError::Material { path: path.clone(), source })?;
    load_textures(source, &path, &mut library).await;
    Ok(library)
}

/// Fetches and decodes the diffuse map of every material in `library`.
/// Materials sharing an image share one decoded copy.
async fn load_textures(source: &AssetSource, material_path: &str, library: &mut MaterialLibrary) {
    let mut decoded: HashMap<String, Arc<TextureImage>> = HashMap::new();
    for material in library.iter_mut() {
        let Some(reference) = material.diffuse_texture.as_deref() else {
            continue;
        };
        let path = sibling_path(material_path, reference);
        if let Some(image) = decoded.get(&path) {
            material.diffuse_map = Some(Arc::clone(image));
            continue;
        }
        let image = match source.fetch(&path).await {
            Ok(bytes) => TextureImage::decode(&bytes).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match image {
            Ok(image) => {
                let image = Arc::new(image);
                decoded.insert(path, Arc::clone(&image));
                material.diffuse_map = Some(image);
            }
            Err(e) => log::warn!("Texture {path} of material {} not loaded: {e}", material.name),
        }
    }
}

/// Loads `path` and its companion materials, then normalizes the result.
///
/// `progress` is told about every stage change, including the final one.
pub async fn load_model(
    source: &AssetSource,
    path: &str,
    settings: &LoadSettings,
    mut progress: impl FnMut(LoadStage),
) -> Result<LoadedModel, LoadError> {
    progress(LoadStage::MaterialsPending);
    let (library, materials) = match load_materials(source, path, settings).await {
        Ok(lib) => {
            let count = lib.len();
            (Some(lib), MaterialStatus::Applied(count))
        }
        Err(e) => {
            log::warn!("Failed to load materials, falling back to basic model: {e}");
            (None, MaterialStatus::Skipped(e.to_string()))
        }
    };

    progress(LoadStage::MeshPending);
    let parsed = match source.fetch(path).await {
        Ok(bytes) => Model::from_obj(path, &bytes, library.as_ref()).map_err(|source| LoadError::Mesh {
            path: path.to_owned(),
            source,
        }),
        Err(e) => Err(LoadError::MeshFetch(e)),
    };

    match parsed {
        Ok(mut model) => {
            let normalization = normalize(&mut model, settings.target_extent);
            log::info!(
                "Model loaded successfully: {path} ({} parts, {} triangles, {} decorated)",
                model.parts.len(),
                model.triangle_count(),
                model.decorated_parts()
            );
            progress(LoadStage::Attached);
            Ok(LoadedModel {
                model,
                materials,
                normalization,
            })
        }
        Err(e) => {
            log::error!("Error loading model: {e}");
            progress(LoadStage::Failed);
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ViewerConfig;
    use crate::model::tests::{CHAIR_MTL, CHAIR_OBJ};
    use crate::texture::tests::two_texel_png;
    use futures::executor::block_on;
    use log::Level;

    pub(crate) mod capture {
        use std::cell::RefCell;
        use std::sync::Once;

        type Records = Vec<(log::Level, String)>;

        thread_local! {
            static RECORDS: RefCell<Option<Records>> = const { RefCell::new(None) };
        }

        /// Collects this crate's records emitted on the capturing thread.
        struct ThreadLogger;

        impl log::Log for ThreadLogger {
            fn enabled(&self, _: &log::Metadata<'_>) -> bool {
                true
            }

            fn log(&self, record: &log::Record<'_>) {
                if !record.target().starts_with(env!("CARGO_CRATE_NAME")) {
                    return;
                }
                RECORDS.with(|r| {
                    if let Some(records) = r.borrow_mut().as_mut() {
                        records.push((record.level(), record.args().to_string()));
                    }
                });
            }

            fn flush(&self) {}
        }

        static LOGGER: ThreadLogger = ThreadLogger;
        static INSTALL: Once = Once::new();

        /// Runs `f` and returns its result with everything it logged.
        pub(crate) fn captured<T>(f: impl FnOnce() -> T) -> (T, Records) {
            INSTALL.call_once(|| {
                let _ = log::set_logger(&LOGGER);
                log::set_max_level(log::LevelFilter::Trace);
            });
            RECORDS.with(|r| *r.borrow_mut() = Some(Vec::new()));
            let out = f();
            let records = RECORDS.with(|r| r.borrow_mut().take()).unwrap_or_default();
            (out, records)
        }
    }

    fn logged_at(records: &[(Level, String)], level: Level) -> Vec<&str> {
        records
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    pub(crate) fn fixture_source() -> AssetSource {
        AssetSource::memory([
            ("chair.obj", CHAIR_OBJ.as_bytes().to_vec()),
            ("chair.mtl", CHAIR_MTL.as_bytes().to_vec()),
            ("table.obj", b"v 0 0 0\nv 4 0 0\nv 4 1 2\nf 1 2 3\n".to_vec()),
            ("broken.obj", b"v 0 0 0\nf 1 2 3\n".to_vec()),
            ("broken.mtl", b"newmtl x\nKd 1 1 1\n".to_vec()),
        ])
    }

    fn settings() -> LoadSettings {
        LoadSettings::from(&ViewerConfig::default())
    }

    type Run = (Result<LoadedModel, LoadError>, Vec<LoadStage>, Vec<(Level, String)>);

    fn run(path: &str) -> Run {
        let mut stages = Vec::new();
        let (result, logs) = capture::captured(|| {
            block_on(load_model(&fixture_source(), path, &settings(), |s| stages.push(s)))
        });
        (result, stages, logs)
    }

    #[test]
    fn chair_with_materials_is_decorated_and_normalized() {
        let (result, stages, logs) = run("chair.obj");
        let loaded = result.unwrap();

        assert_eq!(loaded.materials, MaterialStatus::Applied(1));
        assert_eq!(loaded.model.decorated_parts(), 1);
        assert!(matches!(loaded.normalization, Normalization::Fitted { .. }));

        let world = loaded.model.world_bounds().unwrap();
        assert!(world.center().coords.norm() < 1e-5);
        assert!((world.max_extent() - 2.0).abs() < 1e-5);

        assert_eq!(
            stages,
            [LoadStage::MaterialsPending, LoadStage::MeshPending, LoadStage::Attached]
        );

        let info = logged_at(&logs, Level::Info);
        assert!(info.iter().any(|m| m.starts_with("Model loaded successfully: chair.obj")));
        assert!(logged_at(&logs, Level::Warn).is_empty());
        assert!(logged_at(&logs, Level::Error).is_empty());
    }

    #[test]
    fn table_without_materials_falls_back() {
        let (result, stages, logs) = run("table.obj");
        let loaded = result.unwrap();

        assert!(matches!(&loaded.materials, MaterialStatus::Skipped(why) if why.contains("table.mtl")));
        assert_eq!(loaded.model.decorated_parts(), 0);
        assert_eq!(loaded.model.triangle_count(), 1);
        assert_eq!(stages.last(), Some(&LoadStage::Attached));

        let warn = logged_at(&logs, Level::Warn);
        assert_eq!(warn.len(), 1);
        assert!(warn[0].starts_with("Failed to load materials, falling back to basic model"));
        assert!(warn[0].contains("table.mtl"));
        assert!(logged_at(&logs, Level::Error).is_empty());
        assert!(!logged_at(&logs, Level::Info).is_empty());
    }

    #[test]
    fn missing_mesh_fails() {
        let (result, stages, logs) = run("sofa.obj");
        assert!(matches!(result, Err(LoadError::MeshFetch(FetchError::NotFound(p))) if p == "sofa.obj"));
        assert_eq!(
            stages,
            [LoadStage::MaterialsPending, LoadStage::MeshPending, LoadStage::Failed]
        );

        let error = logged_at(&logs, Level::Error);
        assert_eq!(error.len(), 1);
        assert!(error[0].starts_with("Error loading model"));
        assert!(error[0].contains("sofa.obj"));
        assert!(logged_at(&logs, Level::Info).is_empty());
    }

    #[test]
    fn bad_face_index_is_a_mesh_error() {
        let (result, _, logs) = run("broken.obj");
        assert!(matches!(result, Err(LoadError::Mesh { ref path, .. }) if path == "broken.obj"));
        assert_eq!(logged_at(&logs, Level::Error).len(), 1);
    }

    const LAMP_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
vt 0 0
vt 1 0
vt 0 1
usemtl shade
f 1/1 2/2 3/3
";

    #[test]
    fn diffuse_map_is_fetched_next_to_the_material() {
        let source = AssetSource::memory([
            ("models/lamp.obj", LAMP_OBJ.as_bytes().to_vec()),
            (
                "models/lamp.mtl",
                b"newmtl shade\nKs 0.5 0.5 0.5\nNs 64\nmap_Kd tex/shade.png\n".to_vec(),
            ),
            ("models/tex/shade.png", two_texel_png()),
        ]);
        let loaded = block_on(load_model(&source, "models/lamp.obj", &settings(), |_| {})).unwrap();

        let material = loaded.model.parts[0].material.as_ref().unwrap();
        let map = material.diffuse_map.as_ref().unwrap();
        assert_eq!((map.width, map.height), (2, 1));
        assert_eq!(material.shininess, 64.0);
    }

    #[test]
    fn missing_diffuse_map_keeps_the_material() {
        let source = AssetSource::memory([
            ("lamp.obj", LAMP_OBJ.as_bytes().to_vec()),
            ("lamp.mtl", b"newmtl shade\nKd 1 0 0\nmap_Kd shade.png\n".to_vec()),
        ]);
        let (loaded, logs) =
            capture::captured(|| block_on(load_model(&source, "lamp.obj", &settings(), |_| {})));
        let loaded = loaded.unwrap();

        assert_eq!(loaded.materials, MaterialStatus::Applied(1));
        let material = loaded.model.parts[0].material.as_ref().unwrap();
        assert_eq!(material.diffuse, [1.0, 0.0, 0.0]);
        assert!(material.diffuse_map.is_none());
        let warn = logged_at(&logs, Level::Warn);
        assert!(warn.len() == 1 && warn[0].contains("shade.png"));
    }

    #[test]
    fn non_obj_path_skips_materials() {
        let source = AssetSource::memory([("lamp.txt", b"v 0 0 0\nv 1 1 1\nv 0 1 0\nf 1 2 3\n".to_vec())]);
        let loaded = block_on(load_model(&source, "lamp.txt", &settings(), |_| {})).unwrap();
        assert!(matches!(loaded.materials, MaterialStatus::Skipped(_)));
    }

    #[test]
    fn bundled_sample_assets_load() {
        let source = AssetSource::memory([
            ("models/cube.obj", include_bytes!("../assets/models/cube.obj").to_vec()),
            ("models/cube.mtl", include_bytes!("../assets/models/cube.mtl").to_vec()),
            ("models/checker.png", include_bytes!("../assets/models/checker.png").to_vec()),
            ("models/wedge.obj", include_bytes!("../assets/models/wedge.obj").to_vec()),
        ]);

        let cube = block_on(load_model(&source, "models/cube.obj", &settings(), |_| {})).unwrap();
        assert_eq!(cube.materials, MaterialStatus::Applied(2));
        assert_eq!(cube.model.triangle_count(), 12);
        assert_eq!(cube.model.decorated_parts(), cube.model.parts.len());
        let textured: Vec<_> = cube
            .model
            .parts
            .iter()
            .filter_map(|p| p.material.as_ref()?.diffuse_map.as_ref())
            .collect();
        assert_eq!(textured.len(), 1);
        assert_eq!((textured[0].width, textured[0].height), (8, 8));

        let wedge = block_on(load_model(&source, "models/wedge.obj", &settings(), |_| {})).unwrap();
        assert!(matches!(wedge.materials, MaterialStatus::Skipped(_)));
        let world = wedge.model.world_bounds().unwrap();
        assert!((world.max_extent() - 2.0).abs() < 1e-5);
    }
}
