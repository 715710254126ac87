// Physical device selection + logical device
//
// Responsibilities:
// - Queue family discovery (graphics + present) per candidate
// - Filtering on mandatory capabilities, then scoring (prefer discrete GPU)
// - Preferred-device override read from a side file
// - Logical device + queue creation

use ash::extensions::khr::Surface;
use ash::vk;
use std::ffi::{c_char, CStr};
use std::io;
use std::path::Path;

use super::capabilities;
use super::swapchain::SwapchainSupport;
use crate::error::{Error, Result, VkResultExt};

/// Extensions a device must offer to be considered at all
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [c"VK_KHR_swapchain"];

/// Score given to a device whose name matches the override, beats any type score
pub const OVERRIDE_SCORE: i64 = u32::MAX as i64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// Both families found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Walk the family table, taking the first graphics-capable and the first
    /// present-capable family.
    pub fn find<F>(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: F,
    ) -> Result<Self>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let index = i as u32;

            if indices.graphics.is_none()
                && family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(index);
            }
            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.resolve().is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

impl QueueFamilies {
    /// One entry per distinct family
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Everything the selector needs to know about one physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub indices: QueueFamilyIndices,
    pub extensions: Vec<String>,
    pub support: SwapchainSupport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    IncompleteQueueFamilies,
    MissingExtension(String),
    NoSurfaceFormats,
    NoPresentModes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Rejected(Rejection),
    Scored(i64),
}

pub fn base_score(device_type: vk::PhysicalDeviceType) -> i64 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 5,
        _ => 0,
    }
}

/// Filter, then score. `preferred` is ignored when empty.
pub fn evaluate(candidate: &DeviceCandidate, preferred: Option<&str>) -> Verdict {
    if !candidate.indices.is_complete() {
        return Verdict::Rejected(Rejection::IncompleteQueueFamilies);
    }

    for required in REQUIRED_DEVICE_EXTENSIONS {
        let required = required.to_string_lossy();
        if !candidate.extensions.iter().any(|ext| *ext == required) {
            return Verdict::Rejected(Rejection::MissingExtension(required.into_owned()));
        }
    }

    if candidate.support.formats.is_empty() {
        return Verdict::Rejected(Rejection::NoSurfaceFormats);
    }
    if candidate.support.present_modes.is_empty() {
        return Verdict::Rejected(Rejection::NoPresentModes);
    }

    match preferred {
        Some(pattern) if !pattern.is_empty() && candidate.name.contains(pattern) => {
            Verdict::Scored(OVERRIDE_SCORE)
        }
        _ => Verdict::Scored(base_score(candidate.device_type)),
    }
}

/// The winning device, with the queries that were kept for it
#[derive(Debug, Clone)]
pub struct SelectedDevice<H> {
    pub handle: H,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queues: QueueFamilies,
    pub support: SwapchainSupport,
}

/// Pick the best-scoring device. Ties go to the first one seen.
pub fn select<H, F>(
    handles: &[H],
    mut describe: F,
    preferred: Option<&str>,
) -> Result<SelectedDevice<H>>
where
    H: Copy,
    F: FnMut(H) -> Result<DeviceCandidate>,
{
    if handles.is_empty() {
        log::error!("No vulkan device found.");
        return Err(Error::NoDevice);
    }

    let mut best: Option<(i64, H, DeviceCandidate)> = None;

    for &handle in handles {
        let candidate = describe(handle)?;

        let score = match evaluate(&candidate, preferred) {
            Verdict::Rejected(reason) => {
                log::info!("Skipping device '{}': {:?}", candidate.name, reason);
                continue;
            }
            Verdict::Scored(score) => score,
        };

        log::info!(
            "Device '{}' ({:?}) scored {}",
            candidate.name,
            candidate.device_type,
            score
        );

        if best.as_ref().map_or(true, |(best_score, _, _)| score > *best_score) {
            best = Some((score, handle, candidate));
        }
    }

    let (_, handle, candidate) = best.ok_or_else(|| {
        log::error!("Couldn't find suitable vulkan device.");
        Error::NoSuitableDevice
    })?;

    let queues = candidate
        .indices
        .resolve()
        .ok_or(Error::NoSuitableDevice)?;

    Ok(SelectedDevice {
        handle,
        name: candidate.name,
        device_type: candidate.device_type,
        api_version: candidate.api_version,
        queues,
        support: candidate.support,
    })
}

/// First line of the override file, if there is one and it isn't empty
pub fn read_override(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let line = content.lines().next().unwrap_or_default();
            if line.is_empty() {
                None
            } else {
                log::info!("Preferred device override: '{}'", line);
                Some(line.to_string())
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("No device override at {:?}", path);
            None
        }
        Err(e) => {
            log::warn!("Failed to read device override {:?}: {}", path, e);
            None
        }
    }
}

/// Query one physical device against the surface
pub fn describe_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let indices = QueueFamilyIndices::find(&families, |index| {
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(physical_device, index, surface)
        };
        supported.check("Failed to query surface support")
    })?;

    let extensions = capabilities::device_extensions(instance, physical_device)?
        .iter()
        .map(|ext| capabilities::property_name(&ext.extension_name))
        .collect();

    let support = SwapchainSupport::query(surface_loader, physical_device, surface)?;

    Ok(DeviceCandidate {
        name: capabilities::property_name(&properties.device_name),
        device_type: properties.device_type,
        api_version: properties.api_version,
        indices,
        extensions,
        support,
    })
}

pub fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
    preferred: Option<&str>,
) -> Result<SelectedDevice<vk::PhysicalDevice>> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .check("Failed to enumerate physical devices")?;
    log::debug!("Found {} physical device(s)", devices.len());

    let selected = select(
        &devices,
        |device| describe_device(instance, surface_loader, surface, device),
        preferred,
    )?;

    log::info!("Selected GPU: {} ({:?})", selected.name, selected.device_type);
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(selected.api_version),
        vk::api_version_minor(selected.api_version),
        vk::api_version_patch(selected.api_version)
    );

    Ok(selected)
}

/// Logical device plus its graphics and present queues. When both roles
/// live in the same family the same queue handle is returned twice.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queues: QueueFamilies,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queues
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .check("Failed to create logical device")?;

    let graphics_queue = unsafe { device.get_device_queue(queues.graphics, 0) };
    let present_queue = if queues.is_shared() {
        graphics_queue
    } else {
        unsafe { device.get_device_queue(queues.present, 0) }
    };

    log::info!(
        "Created logical device ({} queue famil{})",
        queue_create_infos.len(),
        if queue_create_infos.len() == 1 { "y" } else { "ies" }
    );

    Ok((device, graphics_queue, present_queue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn support() -> SwapchainSupport {
        SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            device_type,
            api_version: vk::API_VERSION_1_0,
            indices: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions: vec!["VK_KHR_swapchain".to_string()],
            support: support(),
        }
    }

    fn pick(
        candidates: &[DeviceCandidate],
        preferred: Option<&str>,
    ) -> Result<SelectedDevice<usize>> {
        let handles: Vec<usize> = (0..candidates.len()).collect();
        select(&handles, |i| Ok(candidates[i].clone()), preferred)
    }

    #[test]
    fn discrete_beats_integrated() {
        let devices = [
            candidate("Intel UHD 630", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("NVIDIA RTX 3070", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        let selected = pick(&devices, None).unwrap();
        assert_eq!(selected.handle, 1);
        assert_eq!(selected.name, "NVIDIA RTX 3070");
    }

    #[test]
    fn override_selects_integrated() {
        let devices = [
            candidate("NVIDIA RTX 3070", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("Intel UHD 630", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];
        let selected = pick(&devices, Some("UHD")).unwrap();
        assert_eq!(selected.name, "Intel UHD 630");
    }

    #[test]
    fn override_is_case_sensitive() {
        let devices = [
            candidate("NVIDIA RTX 3070", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("Intel UHD 630", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];
        assert_eq!(pick(&devices, Some("uhd")).unwrap().handle, 0);
    }

    #[test]
    fn empty_override_matches_nothing() {
        let devices = [
            candidate("Intel UHD 630", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("NVIDIA RTX 3070", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(pick(&devices, Some("")).unwrap().handle, 1);
        assert_eq!(evaluate(&devices[0], Some("")), Verdict::Scored(5));
    }

    #[test]
    fn zero_devices_fails_before_scoring() {
        let queried = Cell::new(0);
        let result = select(
            &[] as &[usize],
            |_| {
                queried.set(queried.get() + 1);
                Ok(candidate("unused", vk::PhysicalDeviceType::CPU))
            },
            None,
        );
        assert!(matches!(result, Err(Error::NoDevice)));
        assert_eq!(queried.get(), 0);
    }

    #[test]
    fn incomplete_queue_families_never_selected() {
        let mut no_present = candidate("Headless Compute", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.indices.present = None;
        let mut no_graphics = candidate("Display Only", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_graphics.indices.graphics = None;
        let cpu = candidate("llvmpipe", vk::PhysicalDeviceType::CPU);

        // Even the override can't rescue an incomplete device
        let devices = [no_present, no_graphics, cpu];
        let selected = pick(&devices, Some("Headless")).unwrap();
        assert_eq!(selected.name, "llvmpipe");

        assert_eq!(
            evaluate(&devices[0], None),
            Verdict::Rejected(Rejection::IncompleteQueueFamilies)
        );
    }

    #[test]
    fn only_rejected_devices_is_no_suitable_device() {
        let mut dev = candidate("NVIDIA RTX 3070", vk::PhysicalDeviceType::DISCRETE_GPU);
        dev.extensions.clear();
        assert_eq!(
            evaluate(&dev, None),
            Verdict::Rejected(Rejection::MissingExtension("VK_KHR_swapchain".into()))
        );
        assert!(matches!(pick(&[dev], None), Err(Error::NoSuitableDevice)));
    }

    #[test]
    fn empty_swapchain_support_is_rejected() {
        let mut no_formats = candidate("A", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_formats.support.formats.clear();
        let mut no_modes = candidate("B", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_modes.support.present_modes.clear();

        assert_eq!(evaluate(&no_formats, None), Verdict::Rejected(Rejection::NoSurfaceFormats));
        assert_eq!(evaluate(&no_modes, None), Verdict::Rejected(Rejection::NoPresentModes));
    }

    #[test]
    fn first_device_wins_ties() {
        let devices = [
            candidate("GPU A", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("GPU B", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(pick(&devices, None).unwrap().name, "GPU A");
    }

    #[test]
    fn zero_score_device_is_still_selectable() {
        let devices = [candidate("SwiftShader", vk::PhysicalDeviceType::CPU)];
        let selected = pick(&devices, None).unwrap();
        assert_eq!(selected.name, "SwiftShader");
        assert_eq!(selected.queues, QueueFamilies { graphics: 0, present: 0 });
    }

    #[test]
    fn query_errors_propagate() {
        let result = select(&[0usize], |_| Err(Error::NoSuitableDevice), None);
        assert!(result.is_err());
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn queue_families_may_differ() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));

        let queues = indices.resolve().unwrap();
        assert!(!queues.is_shared());
        assert_eq!(queues.unique(), vec![1, 2]);
    }

    #[test]
    fn shared_queue_family_is_deduplicated() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let queues = QueueFamilyIndices::find(&families, |_| Ok(true))
            .unwrap()
            .resolve()
            .unwrap();
        assert!(queues.is_shared());
        assert_eq!(queues.unique(), vec![0]);
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert!(!indices.is_complete());
    }

    #[test]
    fn override_file_first_line() {
        let dir = std::env::temp_dir().join(format!("trigon-override-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("preferred_device.txt");
        std::fs::write(&path, "Intel UHD\r\nignored\n").unwrap();
        assert_eq!(read_override(&path).as_deref(), Some("Intel UHD"));

        std::fs::write(&path, "\nNVIDIA\n").unwrap();
        assert_eq!(read_override(&path), None);

        assert_eq!(read_override(&dir.join("missing.txt")), None);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
