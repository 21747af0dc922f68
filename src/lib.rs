pub mod app;
pub mod renderer;
pub mod settings;

use std::path::PathBuf;

use app::App;
use winit::event_loop::EventLoop;

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Opens the demo window. `mesh` is an optional OBJ file drawn as static
/// geometry next to the built-in scene.
pub fn run(mesh: Option<PathBuf>) -> Result<(), winit::error::EventLoopError> {
    init_logging();

    log::info!("Starting wgpu deferred renderer");

    let event_loop = EventLoop::new()?;
    let mut app = App::new(mesh);

    let result = event_loop.run_app(&mut app);

    if let Err(ref err) = result {
        log::error!("Application error: {}", err);
    }

    log::info!("Application shutdown complete");

    result
}
