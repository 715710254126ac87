// =============================================================================
// FRAME LOOP
// =============================================================================
//
// One frame in flight. Per iteration:
// 1. Wait for the previous frame's fence, then reset it
// 2. Acquire a swapchain image (signals "image available")
// 3. Re-record the single command buffer for that image
// 4. Submit: wait "image available", signal "render finished" + the fence
// 5. Present, waiting on "render finished"
//
// The steps sit behind `FrameDriver` so the protocol can be driven by
// something other than a real device.

use crate::error::Result;

/// The GPU side of one frame
pub trait FrameDriver {
    /// Block until the previous submission is done, then reset the fence
    fn wait_for_frame(&mut self) -> Result<()>;
    fn acquire_image(&mut self) -> Result<u32>;
    fn record(&mut self, image_index: u32) -> Result<()>;
    fn submit(&mut self) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<()>;
    /// Drain all in-flight work
    fn wait_idle(&mut self) -> Result<()>;
}

/// The window side: event pumping and the close flag
pub trait EventSource {
    fn poll_events(&mut self) -> Result<()>;
    fn should_close(&self) -> bool;
}

pub fn draw_frame<D: FrameDriver + ?Sized>(driver: &mut D) -> Result<()> {
    driver.wait_for_frame()?;
    let image_index = driver.acquire_image()?;
    driver.record(image_index)?;
    driver.submit()?;
    driver.present(image_index)
}

/// Draw until the window asks to close. The close flag is checked once per
/// iteration, never mid-frame. Returns the number of frames drawn.
pub fn run<E, D>(events: &mut E, driver: &mut D) -> Result<u64>
where
    E: EventSource + ?Sized,
    D: FrameDriver + ?Sized,
{
    let mut frames = 0u64;

    while !events.should_close() {
        events.poll_events()?;
        draw_frame(driver)?;
        frames += 1;
    }

    log::info!("Close requested after {} frames, waiting for device idle", frames);
    driver.wait_idle()?;
    Ok(frames)
}
