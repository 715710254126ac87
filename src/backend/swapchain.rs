// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The parameters are resolved once from what the surface supports
// (SwapchainConfig::choose) and never change afterwards.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::prelude::VkResult;
use ash::vk;

use super::device::QueueFamilies;
use crate::error::{Result, VkResultExt};

/// What a (device, surface) pair can do
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .check("Failed to query surface capabilities")?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .check("Failed to query surface formats")?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .check("Failed to query surface present modes")?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Resolved swapchain parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

impl SwapchainConfig {
    /// Pick parameters from the supported set and the window's pixel size.
    ///
    /// `support.formats` must not be empty; the device selector rejects
    /// devices where it is.
    pub fn choose(support: &SwapchainSupport, window_size: (u32, u32)) -> Self {
        let caps = &support.capabilities;

        // Last matching entry wins
        let format = support
            .formats
            .iter()
            .rev()
            .find(|f| {
                f.format == PREFERRED_FORMAT.format
                    && f.color_space == PREFERRED_FORMAT.color_space
            })
            .or_else(|| support.formats.first())
            .copied()
            .unwrap_or(PREFERRED_FORMAT);

        // MAILBOX: no tearing, triple buffered. FIFO: always supported
        let present_mode = if support.present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if caps.current_extent.width == u32::MAX {
            vk::Extent2D {
                width: window_size
                    .0
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: window_size
                    .1
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        } else {
            caps.current_extent
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let composite_alpha = if caps
            .supported_composite_alpha
            .contains(vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED)
        {
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        } else {
            vk::CompositeAlphaFlagsKHR::OPAQUE
        };

        Self {
            format,
            present_mode,
            extent,
            image_count,
            composite_alpha,
            transform: caps.current_transform,
        }
    }
}

pub struct Swapchain {
    pub loader: SwapchainLoader,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub config: SwapchainConfig,
}

impl Swapchain {
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        surface: vk::SurfaceKHR,
        queues: QueueFamilies,
        config: SwapchainConfig,
    ) -> Result<Self> {
        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.format.color_space,
            config.present_mode,
            config.image_count
        );

        let loader = SwapchainLoader::new(instance, device);

        let family_indices = [queues.graphics, queues.present];
        let builder = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(config.image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(config.transform)
            .composite_alpha(config.composite_alpha)
            .present_mode(config.present_mode)
            .clipped(true);

        // Images are shared between the two families only when they differ
        let create_info = if queues.is_shared() {
            builder.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            builder
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .check("Failed to create swapchain")?;

        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(result).check("Failed to get swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            loader,
            handle,
            images,
            config,
        })
    }

    /// One color view per swapchain image. Views created before a failure
    /// are destroyed again.
    pub fn create_image_views(&self, device: &ash::Device) -> Result<Vec<vk::ImageView>> {
        let mut views = Vec::with_capacity(self.images.len());

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.config.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { device.create_image_view(&create_info, None) } {
                Ok(view) => views.push(view),
                Err(result) => {
                    destroy_image_views(device, &views);
                    return Err(result).check("Failed to create image view");
                }
            }
        }

        Ok(views)
    }

    /// Ask for the next image; `semaphore` is signaled once it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<u32> {
        let (index, suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        }
        .check("Failed to acquire swapchain image")?;

        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe { self.loader.queue_present(queue, &present_info) };
        present_outcome(presented)
    }
}

/// The swapchain is never recreated, so an out-of-date surface (e.g. a
/// minimized window) just drops this frame's image instead of failing.
fn present_outcome(presented: VkResult<bool>) -> Result<()> {
    match presented {
        Ok(false) => Ok(()),
        Ok(true) => {
            log::debug!("Swapchain is suboptimal for the surface");
            Ok(())
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            log::debug!("Swapchain is out of date, skipping present");
            Ok(())
        }
        Err(result) => Err(result).check("Failed to present swapchain image"),
    }
}

pub fn destroy_image_views(device: &ash::Device, views: &[vk::ImageView]) {
    for &view in views {
        unsafe { device.destroy_image_view(view, None) };
    }
}
