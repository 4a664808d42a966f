//! Frame loop demo
//!
//! Opens a window and clears it every frame through the renderer, with
//! depth and multisampled color attachments. Pass a `.toml` or `.ron` file
//! to override the backend configuration.

use glfw::{Action, Key, WindowEvent};
use std::process::ExitCode;
use std::time::Instant;

use render_backend::foundation::logging;
use render_backend::prelude::*;

fn load_config() -> Result<BackendConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading backend configuration from {path}");
            let config = BackendConfig::load_from_file(&path)?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(BackendConfig::new("Frame Demo")),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let mut window = Window::new(&config.application_name, 1024, 768)?;
    let instance = VulkanInstance::new(&mut window, &config)?;
    let mut renderer = Renderer::new(
        &instance,
        config,
        window.framebuffer_extent(),
        &[SubpassTag::Swapchain, SubpassTag::Depth, SubpassTag::Color],
    )?;

    let draw_list = DrawList::new();
    let started = Instant::now();
    while !window.should_close() {
        window.poll_events();
        for event in window.flush_events() {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) | WindowEvent::Close => {
                    window.set_should_close(true);
                }
                WindowEvent::FramebufferSize(..) => renderer.resize(window.framebuffer_extent())?,
                _ => {}
            }
        }

        if renderer.draw_frame(&draw_list)? == FrameOutcome::Skipped && window.framebuffer_extent().width == 0 {
            window.wait_events();
        }
    }

    let stats = renderer.stats();
    let seconds = started.elapsed().as_secs_f64();
    log::info!(
        "{} frames in {seconds:.1}s ({:.0} fps), {} skipped, {} swapchain recreations",
        stats.frames_presented,
        stats.frames_presented as f64 / seconds.max(f64::EPSILON),
        stats.frames_skipped,
        stats.swapchain_recreations
    );
    renderer.shutdown()?;
    Ok(())
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Frame demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}
