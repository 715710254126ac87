// =============================================================================
// TRIGON - a single triangle on Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Window (winit, pumped once per frame)                          │
// │    └── Context (resource chain, torn down in reverse)           │
// │          └── Device + Swapchain + Pipeline                      │
// │                └── One command buffer, re-recorded per frame    │
// │                      └── One fence, two semaphores              │
// └─────────────────────────────────────────────────────────────────┘
//
// STARTUP:
// 1. Load config.toml (defaults when missing)
// 2. Install the logger (sink + severity mask from config)
// 3. Create the window
// 4. Build the render context
// 5. Run the frame loop until the window closes
// 6. Drain the device and tear everything down
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod logging;
mod window;

use anyhow::{Context as _, Result};
use backend::Context;
use config::Config;
use std::process::ExitCode;
use window::Window;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    let (config, note) = Config::load();

    // Nothing else can report yet, so this one goes straight to stderr
    if let Err(e) = logging::init(config.logging.log_target(), config.logging.severity_mask()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    if let Some((level, note)) = note {
        log::log!(level, "{}", note);
    }

    log::info!("Starting Vulkan renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let status = exit_status(&run(&config));
    log::logger().flush();
    ExitCode::from(status)
}

/// Fatal errors become exactly one error line on the configured sink
fn exit_status(result: &Result<()>) -> u8 {
    match result {
        Ok(()) => {
            log::info!("Shutdown complete");
            0
        }
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    }
}

fn run(config: &Config) -> Result<()> {
    let mut window = Window::new(&config.window).context("Failed to create window")?;
    // Dropped before the window on every path, so the surface never outlives it
    let mut context = Context::new(config, &window).context("Failed to initialize Vulkan")?;
    log::debug!("Render context at {:?}", context.stage());

    let frames = frame::run(&mut window, &mut context).context("Frame loop failed")?;
    log::info!("Rendered {} frames", frames);

    context.shutdown();
    Ok(())
}
