//! The viewer context: everything one viewer instance owns, built once at
//! startup and dropped on shutdown.

use nalgebra::Matrix4;

use crate::camera::{PerspectiveCamera, Viewport};
use crate::config::ViewerConfig;
use crate::loader::{LoadError, LoadSettings, LoadStage, LoadedModel, MaterialStatus};
use crate::normalize::normalize;
use crate::orbit::OrbitControls;
use crate::scene::Scene;

/// Identifies one model request. Later selections get larger tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadTicket(u64);

/// What the caller has to run for a selection.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub ticket: LoadTicket,
    pub path: String,
    pub settings: LoadSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Idle,
    Loading { path: String, stage: LoadStage },
    Loaded { path: String, materials: MaterialStatus },
    Failed { path: String, reason: String },
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Idle => write!(f, "No model loaded"),
            Status::Loading { path, stage } => match stage {
                LoadStage::MaterialsPending => write!(f, "Loading materials for {path}…"),
                _ => write!(f, "Loading {path}…"),
            },
            Status::Loaded { path, materials: MaterialStatus::Applied(_) } => write!(f, "{path}"),
            Status::Loaded { path, materials: MaterialStatus::Skipped(_) } => {
                write!(f, "{path} (without materials)")
            }
            Status::Failed { path, .. } => write!(f, "Could not load {path}"),
        }
    }
}

pub struct Viewer {
    pub config: ViewerConfig,
    pub scene: Scene,
    pub camera: PerspectiveCamera,
    pub viewport: Viewport,
    pub controls: OrbitControls,
    settings: LoadSettings,
    issued: u64,
    status: Status,
}

impl Viewer {
    pub fn new(config: ViewerConfig, width: f32, height: f32) -> Self {
        let viewport = Viewport::new(width, height, config.reserved_band);
        Self {
            scene: Scene::new(&config),
            camera: PerspectiveCamera::new(&config, viewport.aspect()),
            controls: OrbitControls::new(&config),
            settings: LoadSettings::from(&config),
            viewport,
            config,
            issued: 0,
            status: Status::Idle,
        }
    }

    /// Switches to a config that arrived after startup.
    ///
    /// The current model, the status and the ticket counter carry over, so
    /// a request issued before the switch still loses to one issued after
    /// it. Requests already in flight keep the settings they were issued
    /// with.
    pub fn reconfigure(&mut self, config: ViewerConfig) {
        self.scene.relight(&config);
        if config.target_extent != self.config.target_extent {
            if let Some(model) = self.scene.current_mut() {
                normalize(model, config.target_extent);
            }
        }
        self.viewport = Viewport::new(self.viewport.width, self.viewport.height, config.reserved_band);
        self.camera = PerspectiveCamera::new(&config, self.viewport.aspect());
        self.controls = OrbitControls::new(&config);
        self.settings = LoadSettings::from(&config);
        self.config = config;
    }

    /// Handles a change of the selection control.
    ///
    /// An empty selection does nothing. Otherwise the current model is
    /// detached right away, before the new one has even been fetched.
    pub fn select(&mut self, path: Option<&str>) -> Option<LoadRequest> {
        let path = path.map(str::trim).filter(|p| !p.is_empty())?;

        if let Some(old) = self.scene.evict() {
            log::debug!("Detached {}", old.name);
        }
        self.issued += 1;
        let ticket = LoadTicket(self.issued);
        self.status = Status::Loading {
            path: path.to_owned(),
            stage: LoadStage::MaterialsPending,
        };
        Some(LoadRequest {
            ticket,
            path: path.to_owned(),
            settings: self.settings.clone(),
        })
    }

    fn is_latest(&self, ticket: LoadTicket) -> bool {
        ticket.0 == self.issued
    }

    pub fn progress(&mut self, ticket: LoadTicket, stage: LoadStage) {
        if !self.is_latest(ticket) {
            return;
        }
        if let Status::Loading { stage: current, .. } = &mut self.status {
            *current = stage;
        }
    }

    /// Settles a request. Only the newest request may attach its model;
    /// results of superseded requests are dropped whatever order they
    /// finish in. Returns `true` when a model was attached.
    pub fn complete(
        &mut self,
        ticket: LoadTicket,
        path: &str,
        result: Result<LoadedModel, LoadError>,
    ) -> bool {
        if !self.is_latest(ticket) {
            log::info!("Discarding superseded load of {path}");
            return false;
        }
        match result {
            Ok(loaded) => {
                self.scene.attach(loaded.model);
                self.status = Status::Loaded {
                    path: path.to_owned(),
                    materials: loaded.materials,
                };
                true
            }
            Err(e) => {
                self.status = Status::Failed {
                    path: path.to_owned(),
                    reason: e.to_string(),
                };
                false
            }
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        let viewport = Viewport::new(width, height, self.config.reserved_band);
        if viewport != self.viewport {
            self.viewport = viewport;
            self.camera.aspect = viewport.aspect();
        }
    }

    /// Per-frame step of the controls. Returns `true` when the camera moved.
    pub fn tick(&mut self) -> bool {
        self.controls.update()
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.camera.projection_matrix() * self.controls.view_matrix()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_model;
    use crate::loader::tests::fixture_source;
    use futures::executor::block_on;

    fn viewer() -> Viewer {
        Viewer::new(ViewerConfig::default(), 1280.0, 800.0)
    }

    fn load(request: &LoadRequest) -> Result<LoadedModel, LoadError> {
        block_on(load_model(&fixture_source(), &request.path, &request.settings, |_| {}))
    }

    #[test]
    fn empty_selection_is_a_no_op() {
        let mut v = viewer();
        assert!(v.select(None).is_none());
        assert!(v.select(Some("")).is_none());
        assert_eq!(v.status(), &Status::Idle);
    }

    #[test]
    fn chair_is_attached() {
        let mut v = viewer();
        let req = v.select(Some("chair.obj")).unwrap();
        assert!(v.complete(req.ticket, &req.path, load(&req)));

        assert_eq!(v.scene.model_count(), 1);
        assert_eq!(v.scene.current().unwrap().name, "chair.obj");
        assert!(matches!(v.status(), Status::Loaded { materials: MaterialStatus::Applied(1), .. }));
    }

    #[test]
    fn second_selection_replaces_first() {
        let mut v = viewer();
        let chair = v.select(Some("chair.obj")).unwrap();
        v.complete(chair.ticket, &chair.path, load(&chair));

        let table = v.select(Some("table.obj")).unwrap();
        assert_eq!(v.scene.model_count(), 0, "old model is detached on selection");
        v.complete(table.ticket, &table.path, load(&table));

        assert_eq!(v.scene.model_count(), 1);
        assert_eq!(v.scene.current().unwrap().name, "table.obj");
        assert_eq!(v.status().to_string(), "table.obj (without materials)");
    }

    #[test]
    fn slow_first_load_does_not_overwrite_second() {
        let mut v = viewer();
        let chair = v.select(Some("chair.obj")).unwrap();
        let table = v.select(Some("table.obj")).unwrap();

        // table finishes first, then the older chair request
        assert!(v.complete(table.ticket, &table.path, load(&table)));
        assert!(!v.complete(chair.ticket, &chair.path, load(&chair)));

        assert_eq!(v.scene.model_count(), 1);
        assert_eq!(v.scene.current().unwrap().name, "table.obj");
    }

    #[test]
    fn failed_load_leaves_viewport_empty() {
        let mut v = viewer();
        let chair = v.select(Some("chair.obj")).unwrap();
        v.complete(chair.ticket, &chair.path, load(&chair));

        let missing = v.select(Some("sofa.obj")).unwrap();
        assert!(!v.complete(missing.ticket, &missing.path, load(&missing)));

        assert_eq!(v.scene.model_count(), 0);
        assert!(matches!(v.status(), Status::Failed { path, .. } if path == "sofa.obj"));
    }

    #[test]
    fn progress_of_stale_request_is_ignored() {
        let mut v = viewer();
        let first = v.select(Some("chair.obj")).unwrap();
        let _second = v.select(Some("table.obj")).unwrap();

        v.progress(first.ticket, LoadStage::MeshPending);
        assert!(matches!(
            v.status(),
            Status::Loading { path, stage: LoadStage::MaterialsPending } if path == "table.obj"
        ));
    }

    #[test]
    fn request_issued_before_reconfigure_stays_stale() {
        let mut v = viewer();
        let chair = v.select(Some("chair.obj")).unwrap();

        v.reconfigure(ViewerConfig::default());
        let table = v.select(Some("table.obj")).unwrap();
        assert!(table.ticket > chair.ticket);

        assert!(v.complete(table.ticket, &table.path, load(&table)));
        assert!(!v.complete(chair.ticket, &chair.path, load(&chair)));
        assert_eq!(v.scene.current().unwrap().name, "table.obj");
        assert_eq!(v.status().to_string(), "table.obj (without materials)");
    }

    #[test]
    fn reconfigure_keeps_model_and_refits_it() {
        let mut v = viewer();
        let chair = v.select(Some("chair.obj")).unwrap();
        v.complete(chair.ticket, &chair.path, load(&chair));

        v.reconfigure(ViewerConfig {
            target_extent: 4.0,
            reserved_band: 100.0,
            background: 0x000000,
            ..Default::default()
        });

        assert_eq!(v.scene.model_count(), 1);
        let world = v.scene.current().unwrap().world_bounds().unwrap();
        assert!((world.max_extent() - 4.0).abs() < 1e-5);
        assert!(world.center().coords.norm() < 1e-5);
        assert_eq!(v.scene.background, [0.0; 3]);
        assert!((v.camera.aspect - 1280.0 / 700.0).abs() < 1e-6);
        assert!(matches!(v.status(), Status::Loaded { path, .. } if path == "chair.obj"));
    }

    #[test]
    fn resize_tracks_canvas_aspect() {
        let mut v = viewer();
        v.resize(1000.0, 580.0);
        assert!((v.camera.aspect - 1000.0 / 500.0).abs() < 1e-6);
        assert!(v.view_projection().iter().all(|x| x.is_finite()));
    }
}
