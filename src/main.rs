#[cfg(not(target_arch = "wasm32"))]
fn main() -> eframe::Result<()> {
    obj_viewer::run_native()
}

// The browser build starts from `obj_viewer::start`.
#[cfg(target_arch = "wasm32")]
fn main() {}
