pub mod asset;
pub mod camera;
pub mod config;
pub mod loader;
pub mod material;
pub mod model;
pub mod normalize;
pub mod orbit;
pub mod renderer;
pub mod scene;
pub mod texture;
pub mod viewer;

use std::future::Future;
use std::sync::{Arc, Mutex};

use eframe::egui;
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

use asset::AssetSource;
use config::ViewerConfig;
use loader::{LoadError, LoadStage, LoadedModel};
use renderer::{FrameUniforms, MeshRenderer};
use viewer::{LoadRequest, LoadTicket, Viewer};

/// Messages from background tasks to the UI thread.
enum AppEvent {
    Progress(LoadTicket, LoadStage),
    Finished {
        ticket: LoadTicket,
        path: String,
        result: Result<LoadedModel, LoadError>,
    },
    /// Late-arriving config (web: fetched `viewer.json`).
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    Config(ViewerConfig),
}

enum Gpu {
    Pending,
    Ready(Arc<Mutex<MeshRenderer>>),
    /// Rendering is unavailable; the viewer stays inert.
    Unavailable,
}

pub struct ViewerApp {
    viewer: Viewer,
    source: AssetSource,
    selected: Option<usize>,
    events_tx: UnboundedSender<AppEvent>,
    events_rx: UnboundedReceiver<AppEvent>,
    gpu: Gpu,
}

impl ViewerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: ViewerConfig, source: AssetSource) -> Self {
        let (events_tx, events_rx) = unbounded();
        let size = cc.egui_ctx.screen_rect().size();
        let gpu = match &cc.gl {
            Some(gl) => match unsafe { MeshRenderer::new(gl) } {
                Ok(r) => Gpu::Ready(Arc::new(Mutex::new(r))),
                Err(e) => {
                    log::error!("Error initializing 3D viewer: {e:#}");
                    Gpu::Unavailable
                }
            },
            None => Gpu::Pending,
        };
        if matches!(gpu, Gpu::Ready(_)) {
            log::info!("3D viewer initialized successfully");
        }

        Self {
            viewer: Viewer::new(config, size.x, size.y),
            source,
            selected: None,
            events_tx,
            events_rx,
            gpu,
        }
    }

    /// Hands the config fetch to the background so the first frame is not
    /// held up by it.
    #[cfg(target_arch = "wasm32")]
    fn fetch_config(&self, path: &'static str) {
        let source = self.source.clone();
        let tx = self.events_tx.clone();
        execute(async move {
            match source.fetch(path).await {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let _ = tx.unbounded_send(AppEvent::Config(ViewerConfig::from_json_or_default(&text)));
                }
                Err(e) => log::info!("No viewer config ({e}), using defaults"),
            }
        });
    }

    fn start_load(&self, request: LoadRequest) {
        let source = self.source.clone();
        let tx = self.events_tx.clone();
        execute(async move {
            let LoadRequest { ticket, path, settings } = request;
            let progress_tx = tx.clone();
            let result = loader::load_model(&source, &path, &settings, |stage| {
                let _ = progress_tx.unbounded_send(AppEvent::Progress(ticket, stage));
            })
            .await;
            // the receiver is gone only when the app is shutting down
            let _ = tx.unbounded_send(AppEvent::Finished { ticket, path, result });
        });
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                AppEvent::Progress(ticket, stage) => self.viewer.progress(ticket, stage),
                AppEvent::Finished { ticket, path, result } => {
                    self.viewer.complete(ticket, &path, result);
                }
                AppEvent::Config(config) => {
                    #[cfg(target_arch = "wasm32")]
                    {
                        self.source = AssetSource::Http {
                            base_url: config.asset_base_url.clone(),
                        };
                    }
                    // keep the combo on the same model if the new catalog lists it
                    let path = self
                        .selected
                        .and_then(|i| self.viewer.config.catalog.get(i))
                        .map(|e| e.path.clone());
                    self.selected = path.and_then(|p| config.catalog.iter().position(|e| e.path == p));
                    self.viewer.reconfigure(config);
                }
            }
        }
    }

    fn controls_band(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_centered(|ui| {
            ui.heading("Model viewer");
            ui.separator();

            let catalog = &self.viewer.config.catalog;
            let before = self.selected;
            let text = self
                .selected
                .and_then(|i| catalog.get(i))
                .map_or("Select a model…", |e| e.label.as_str());
            egui::ComboBox::from_id_salt("model-select")
                .selected_text(text)
                .show_ui(ui, |ui| {
                    ui.selectable_value(&mut self.selected, None, "Select a model…");
                    for (i, entry) in catalog.iter().enumerate() {
                        ui.selectable_value(&mut self.selected, Some(i), &entry.label);
                    }
                });

            if self.selected != before {
                let path = self
                    .selected
                    .and_then(|i| self.viewer.config.catalog.get(i))
                    .map(|e| e.path.clone());
                if let Some(request) = self.viewer.select(path.as_deref()) {
                    self.start_load(request);
                }
            }

            if ui.button("Reset view").clicked() {
                self.viewer.controls.reset();
            }
            ui.separator();
            ui.label(self.viewer.status().to_string());
        });
    }

    fn canvas(&mut self, ui: &mut egui::Ui, frame: &eframe::Frame) {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::drag());
        let [r, g, b] = self.viewer.scene.background;
        ui.painter().rect_filled(rect, 0.0, egui::Rgba::from_rgb(r, g, b));

        let height = rect.height();
        if response.dragged() {
            let delta = response.drag_delta();
            let (primary, secondary) =
                ui.input(|i| (i.pointer.primary_down(), i.pointer.secondary_down()));
            if primary {
                self.viewer.controls.rotate(delta.x, delta.y, height);
            } else if secondary {
                let fov = self.viewer.camera.fov_y();
                self.viewer.controls.pan(delta.x, delta.y, height, fov);
            }
        }
        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            self.viewer.controls.dolly(scroll);
        }

        self.viewer.tick();

        let renderer = match &self.gpu {
            Gpu::Ready(r) => Arc::clone(r),
            _ => return,
        };
        if let (Some(gl), Ok(mut r)) = (frame.gl(), renderer.lock()) {
            unsafe { r.sync(gl, &self.viewer.scene) };
        }

        let uniforms = FrameUniforms::new(
            &self.viewer.scene,
            self.viewer.view_projection(),
            self.viewer.controls.eye(),
        );
        let callback = egui_glow::CallbackFn::new(move |_info, painter| {
            if let Ok(r) = renderer.lock() {
                unsafe { r.paint(painter.gl(), &uniforms) };
            }
        });
        ui.painter().add(egui::PaintCallback {
            rect,
            callback: Arc::new(callback),
        });
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        if matches!(self.gpu, Gpu::Pending) {
            // no GL context at all: nothing will ever be drawn
            log::error!("Error initializing 3D viewer: no OpenGL/WebGL2 context");
            self.gpu = Gpu::Unavailable;
        }

        self.drain_events();

        let screen = ctx.screen_rect();
        self.viewer.resize(screen.width(), screen.height());

        egui::TopBottomPanel::top("controls")
            .exact_height(self.viewer.config.reserved_band)
            .resizable(false)
            .show(ctx, |ui| self.controls_band(ui));

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.canvas(ui, frame));

        // continuous render loop, one tick per display refresh
        ctx.request_repaint();
    }

    fn on_exit(&mut self, gl: Option<&glow::Context>) {
        if let (Some(gl), Gpu::Ready(r)) = (gl, &self.gpu) {
            if let Ok(r) = r.lock() {
                unsafe { r.destroy(gl) };
            }
        }
        self.viewer.scene.evict();
    }
}

// ── Web entry‑point ──
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub async fn start() -> Result<(), JsValue> {
    // Redirect `log` macros & panic messages to the browser console
    console_log::init_with_level(log::Level::Debug).ok();
    console_error_panic_hook::set_once();

    let canvas = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id("viewer_canvas"))
        .ok_or_else(|| JsValue::from_str("no #viewer_canvas element"))?
        .dyn_into::<web_sys::HtmlCanvasElement>()?;

    let web_options = eframe::WebOptions {
        depth_buffer: 24,
        ..Default::default()
    };

    eframe::WebRunner::new()
        .start(
            canvas,
            web_options,
            Box::new(|cc| {
                let source = AssetSource::Http { base_url: None };
                let app = ViewerApp::new(cc, ViewerConfig::default(), source);
                app.fetch_config("assets/viewer.json");
                Ok(Box::new(app))
            }),
        )
        .await
}

// ── Native entry‑point ──
#[cfg(not(target_arch = "wasm32"))]
pub fn run_native() -> eframe::Result<()> {
    pretty_env_logger::init();

    let config = match std::fs::read_to_string("assets/viewer.json") {
        Ok(text) => ViewerConfig::from_json_or_default(&text),
        Err(e) => {
            log::info!("No assets/viewer.json ({e}), using defaults");
            ViewerConfig::default()
        }
    };
    let source = AssetSource::Directory {
        root: config.asset_root.clone().into(),
    };

    let options = eframe::NativeOptions {
        depth_buffer: 24,
        ..Default::default()
    };
    eframe::run_native(
        "Model viewer",
        options,
        Box::new(|cc| Ok(Box::new(ViewerApp::new(cc, config, source)))),
    )
}

// Executes an async future without blocking the egui thread
#[cfg(not(target_arch = "wasm32"))]
fn execute<F: Future<Output = ()> + Send + 'static>(f: F) {
    std::thread::spawn(move || futures::executor::block_on(f));
}
#[cfg(target_arch = "wasm32")]
fn execute<F: Future<Output = ()> + 'static>(f: F) {
    wasm_bindgen_futures::spawn_local(f);
}
