// =============================================================================
// RENDER CONTEXT
// =============================================================================
//
// Builds every native object in dependency order and registers its release
// with the resource chain as soon as it exists:
//
//   Instance -> DebugChannel -> Surface -> (device selection) -> LogicalDevice
//   -> Swapchain -> ImageViews -> RenderPass -> Pipeline -> Framebuffers
//   -> CommandPool -> CommandBuffer -> SyncObjects -> Ready
//
// A `?` anywhere in `new` drops the chain, which releases what was already
// built. `shutdown` is the normal exit: drain the device, then release
// everything in reverse.

use ash::extensions::khr::Surface;
use ash::{vk, Entry};

use super::chain::{ResourceChain, Stage};
use super::swapchain::{destroy_image_views, Swapchain, SwapchainConfig};
use super::sync::FrameSync;
use super::{device, instance, pipeline};
use crate::config::Config;
use crate::error::{Result, VkResultExt};
use crate::frame::FrameDriver;
use crate::window::Window;

pub struct Context {
    // Released before `_entry` unloads the library
    chain: ResourceChain,

    device: ash::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffer: vk::CommandBuffer,
    sync: FrameSync,
    clear_color: [f32; 4],

    _entry: Entry,
}

impl Context {
    pub fn new(config: &Config, window: &Window) -> Result<Self> {
        // Declared before the chain so an early return unloads it last
        let entry = instance::load_entry()?;
        let mut chain = ResourceChain::new();

        // ─────────────────────────────────────────────────────────────────────
        // Instance + debug channel
        // ─────────────────────────────────────────────────────────────────────
        let instance = instance::create_instance(
            &entry,
            &window.title(),
            window.raw_display_handle(),
            config.graphics.validation_layers,
        )?;
        {
            let instance = instance.clone();
            chain.acquire(Stage::Instance, move || unsafe { instance.destroy_instance(None) })?;
        }

        let (debug_utils, messenger) = instance::create_debug_messenger(&entry, &instance)?;
        chain.acquire(Stage::DebugChannel, move || unsafe {
            debug_utils.destroy_debug_utils_messenger(messenger, None)
        })?;

        // ─────────────────────────────────────────────────────────────────────
        // Surface
        // ─────────────────────────────────────────────────────────────────────
        let surface_loader = Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .check("Failed to create window surface")?;
        {
            let surface_loader = surface_loader.clone();
            chain.acquire(Stage::Surface, move || unsafe {
                surface_loader.destroy_surface(surface, None)
            })?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // Physical device (nothing to release)
        // ─────────────────────────────────────────────────────────────────────
        let preferred = device::read_override(&config.selection.override_file);
        let selected = device::pick_physical_device(
            &instance,
            &surface_loader,
            surface,
            preferred.as_deref(),
        )?;
        chain.advance(Stage::DeviceSelected)?;

        // ─────────────────────────────────────────────────────────────────────
        // Logical device + queues
        // ─────────────────────────────────────────────────────────────────────
        let (device, graphics_queue, present_queue) =
            device::create_logical_device(&instance, selected.handle, selected.queues)?;
        {
            let device = device.clone();
            chain.acquire(Stage::LogicalDevice, move || unsafe { device.destroy_device(None) })?;
        }
        {
            let device = device.clone();
            chain.set_idle_barrier(move || {
                if let Err(e) = unsafe { device.device_wait_idle() } {
                    log::error!("Failed to wait for device idle ({:?})", e);
                }
            });
        }

        // ─────────────────────────────────────────────────────────────────────
        // Swapchain + image views
        // ─────────────────────────────────────────────────────────────────────
        let swapchain_config =
            SwapchainConfig::choose(&selected.support, window.framebuffer_size());
        let swapchain =
            Swapchain::new(&instance, &device, surface, selected.queues, swapchain_config)?;
        {
            let loader = swapchain.loader.clone();
            let handle = swapchain.handle;
            chain.acquire(Stage::Swapchain, move || unsafe {
                loader.destroy_swapchain(handle, None)
            })?;
        }

        let image_views = swapchain.create_image_views(&device)?;
        {
            let device = device.clone();
            let image_views = image_views.clone();
            chain.acquire(Stage::ImageViews, move || destroy_image_views(&device, &image_views))?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // Render pass, pipeline, framebuffers
        // ─────────────────────────────────────────────────────────────────────
        let render_pass = pipeline::create_render_pass(&device, swapchain_config.format.format)?;
        {
            let device = device.clone();
            chain.acquire(Stage::RenderPass, move || unsafe {
                device.destroy_render_pass(render_pass, None)
            })?;
        }

        let (graphics_pipeline, pipeline_layout) =
            pipeline::create_graphics_pipeline(&device, render_pass)?;
        {
            let device = device.clone();
            chain.acquire(Stage::Pipeline, move || unsafe {
                device.destroy_pipeline(graphics_pipeline, None);
                device.destroy_pipeline_layout(pipeline_layout, None);
            })?;
        }

        let framebuffers = pipeline::create_framebuffers(
            &device,
            &image_views,
            render_pass,
            swapchain_config.extent,
        )?;
        {
            let device = device.clone();
            let framebuffers = framebuffers.clone();
            chain.acquire(Stage::Framebuffers, move || {
                pipeline::destroy_framebuffers(&device, &framebuffers)
            })?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // Command pool + the single command buffer
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = create_command_pool(&device, selected.queues.graphics)?;
        {
            let device = device.clone();
            chain.acquire(Stage::CommandPool, move || unsafe {
                device.destroy_command_pool(command_pool, None)
            })?;
        }

        let command_buffer = allocate_command_buffer(&device, command_pool)?;
        {
            let device = device.clone();
            chain.acquire(Stage::CommandBuffer, move || unsafe {
                device.free_command_buffers(command_pool, &[command_buffer])
            })?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // Sync objects
        // ─────────────────────────────────────────────────────────────────────
        let sync = FrameSync::new(&device)?;
        {
            let device = device.clone();
            chain.acquire(Stage::SyncObjects, move || sync.destroy(&device))?;
        }

        chain.advance(Stage::Ready)?;
        log::info!("Render context ready ({} resources)", chain.constructed().len());

        Ok(Self {
            chain,
            device,
            graphics_queue,
            present_queue,
            swapchain,
            render_pass,
            pipeline: graphics_pipeline,
            framebuffers,
            command_buffer,
            sync,
            clear_color: config.graphics.clear_color,
            _entry: entry,
        })
    }

    pub fn stage(&self) -> Stage {
        self.chain.stage()
    }

    /// Drain the device and release everything in reverse creation order
    pub fn shutdown(mut self) {
        log::info!("Cleaning up Vulkan resources...");
        let released = self.chain.teardown();
        log::info!("Cleanup complete ({} resources released)", released.len());
    }
}

fn create_command_pool(device: &ash::Device, graphics_family: u32) -> Result<vk::CommandPool> {
    // The one command buffer is reset and re-recorded every frame
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(graphics_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let pool = unsafe { device.create_command_pool(&pool_info, None) };
    pool.check("Failed to create command pool")
}

fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .check("Failed to allocate command buffer")?;
    Ok(buffers[0])
}

impl FrameDriver for Context {
    fn wait_for_frame(&mut self) -> Result<()> {
        let fences = [self.sync.in_flight_fence];
        let waited = unsafe { self.device.wait_for_fences(&fences, true, u64::MAX) };
        waited.check("Failed to wait for in-flight fence")?;

        let reset = unsafe { self.device.reset_fences(&fences) };
        reset.check("Failed to reset in-flight fence")
    }

    fn acquire_image(&mut self) -> Result<u32> {
        self.swapchain.acquire_next_image(self.sync.image_available)
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        let cmd = self.command_buffer;
        let extent = self.swapchain.config.extent;
        let device = &self.device;

        let reset =
            unsafe { device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) };
        reset.check("Failed to reset command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        let begun = unsafe { device.begin_command_buffer(cmd, &begin_info) };
        begun.check("Failed to begin recording command buffer")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let (viewport, scissor) = pipeline::full_viewport(extent);

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            // Three vertices, positions generated in the vertex shader
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
        }

        let ended = unsafe { device.end_command_buffer(cmd) };
        ended.check("Failed to record command buffer")
    }

    fn submit(&mut self) -> Result<()> {
        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffer];
        let signal_semaphores = [self.sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let submitted = unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], self.sync.in_flight_fence)
        };
        submitted.check("Failed to submit draw command buffer")
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        self.swapchain
            .present(self.present_queue, image_index, &[self.sync.render_finished])
    }

    fn wait_idle(&mut self) -> Result<()> {
        let idle = unsafe { self.device.device_wait_idle() };
        idle.check("Failed to wait for device idle")
    }
}
