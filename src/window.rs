// =============================================================================
// WINDOW - winit glue
// =============================================================================
//
// One top-level window per process. Events are pumped with a zero timeout
// once per frame, so the render loop stays in charge instead of winit's
// `run_app`. Resizing is disabled; the swapchain is built once.

use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window as WinitWindow, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;
use crate::error::{Error, Result};
use crate::frame::EventSource;

static WINDOW_SYSTEM_CLAIMED: AtomicBool = AtomicBool::new(false);

/// How long to keep pumping while waiting for the platform to resume us
const CREATE_ATTEMPTS: usize = 100;
const CREATE_POLL: Duration = Duration::from_millis(10);

/// Mark the window system as in use; only the first caller succeeds
fn claim_window_system() -> Result<()> {
    if WINDOW_SYSTEM_CLAIMED.swap(true, Ordering::SeqCst) {
        log::error!("Window system already initialized");
        return Err(Error::WindowReinitialized);
    }
    Ok(())
}

struct WindowState {
    attributes: WindowAttributes,
    window: Option<WinitWindow>,
    close_requested: bool,
    create_error: Option<String>,
}

impl ApplicationHandler for WindowState {
    /// The platform only allows window creation from here
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }
}

pub struct Window {
    // The window must go before the event loop that owns its connection
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl Window {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        claim_window_system()?;

        let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;

        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .with_resizable(false);

        let mut window = Self {
            state: WindowState {
                attributes,
                window: None,
                close_requested: false,
                create_error: None,
            },
            event_loop,
        };

        for _ in 0..CREATE_ATTEMPTS {
            let status = window.pump(Some(CREATE_POLL));

            if let Some(reason) = window.state.create_error.take() {
                return Err(Error::Window(reason));
            }
            if window.state.window.is_some() {
                let (width, height) = window.framebuffer_size();
                log::info!("Window '{}' created ({}x{} pixels)", config.title, width, height);
                return Ok(window);
            }
            if let PumpStatus::Exit(code) = status {
                return Err(Error::Window(format!("event loop exited with code {}", code)));
            }
        }

        Err(Error::Window("window was never created".to_string()))
    }

    fn pump(&mut self, timeout: Option<Duration>) -> PumpStatus {
        self.event_loop.pump_app_events(timeout, &mut self.state)
    }

    fn handle(&self) -> &WinitWindow {
        // `new` only hands out a Window once this is set
        self.state
            .window
            .as_ref()
            .unwrap_or_else(|| unreachable!("window accessed before creation"))
    }

    /// Current drawable size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.handle().inner_size();
        (size.width, size.height)
    }

    pub fn title(&self) -> String {
        self.handle().title()
    }

    pub fn raw_display_handle(&self) -> RawDisplayHandle {
        self.handle().raw_display_handle()
    }

    pub fn raw_window_handle(&self) -> RawWindowHandle {
        self.handle().raw_window_handle()
    }
}

impl EventSource for Window {
    fn poll_events(&mut self) -> Result<()> {
        if let PumpStatus::Exit(code) = self.pump(Some(Duration::ZERO)) {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
        Ok(())
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }
}
