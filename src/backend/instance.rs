// Vulkan instance + debug channel
//
// Responsibilities:
// - Validation layer negotiation (warn and continue if missing)
// - Instance creation with the window system's surface extensions
// - Debug messenger routing validation output into the `log` facade

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

use super::capabilities;
use crate::error::{Result, VkResultExt};

const VALIDATION_LAYERS: [&CStr; 1] = [c"VK_LAYER_KHRONOS_validation"];

/// Keep the requested layers that the loader actually offers
pub fn negotiate_layers(available: &[vk::LayerProperties], validation: bool) -> Vec<&'static CStr> {
    if !validation {
        return Vec::new();
    }

    VALIDATION_LAYERS
        .into_iter()
        .filter(|&layer| {
            let found = capabilities::has_layer(available, layer);
            if !found {
                log::warn!(
                    "Validation layer '{}' requested, but not available",
                    layer.to_string_lossy()
                );
            }
            found
        })
        .collect()
}

/// Extensions the window system needs, plus the debug utils channel
pub fn required_extensions(display_handle: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let mut extensions = ash_window::enumerate_required_extensions(display_handle)
        .check("Failed to query window system extensions")?
        .to_vec();
    extensions.push(DebugUtils::name().as_ptr());
    Ok(extensions)
}

pub fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::DEVICE_ADDRESS_BINDING,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

pub fn create_instance(
    entry: &Entry,
    app_name: &str,
    display_handle: RawDisplayHandle,
    validation: bool,
) -> Result<ash::Instance> {
    let app_name_cstr = CString::new(app_name)
        .unwrap_or_else(|_| CString::from(c"trigon"));
    let engine_name = c"None";

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    let available = capabilities::instance_extensions(entry)?;
    log::info!("Available vulkan extensions:");
    for ext in &available {
        log::info!("    {}", capabilities::property_name(&ext.extension_name));
    }

    let extensions = required_extensions(display_handle)?;
    for &ext in &extensions {
        let name = unsafe { CStr::from_ptr(ext) };
        if !capabilities::has_extension(&available, name) {
            log::error!("Required extension '{}' is not available", name.to_string_lossy());
        }
    }

    let layers = negotiate_layers(&capabilities::instance_layers(entry)?, validation);
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|layer| layer.as_ptr()).collect();

    // Chained so that instance creation and destruction are covered too
    let mut debug_info = debug_messenger_info();

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_ptrs)
        .push_next(&mut debug_info);

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .check("Failed to create vulkan instance")?;

    log::info!("Enabled vulkan extensions:");
    for &ext in &extensions {
        log::info!("    {}", unsafe { CStr::from_ptr(ext) }.to_string_lossy());
    }
    log::info!("Enabled validation layers:");
    for layer in &layers {
        log::info!("    {}", layer.to_string_lossy());
    }

    Ok(instance)
}

pub fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);
    let create_info = debug_messenger_info();

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .check("Failed to create debug messenger")?;

    Ok((debug_utils, messenger))
}

fn message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Debug,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        _ => log::Level::Info,
    }
}

fn message_target(kind: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match kind {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "vulkan::general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "vulkan::validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "vulkan::performance",
        vk::DebugUtilsMessageTypeFlagsEXT::DEVICE_ADDRESS_BINDING => "vulkan::address_binding",
        _ => "vulkan",
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    log::log!(
        target: message_target(message_type),
        message_level(message_severity),
        "{}",
        message.to_string_lossy()
    );

    vk::FALSE
}

/// Loader entry point; everything else hangs off this
pub fn load_entry() -> Result<Entry> {
    let entry = unsafe { Entry::load() }?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &CStr) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        for (dst, &src) in props.layer_name.iter_mut().zip(name.to_bytes_with_nul()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn validation_layer_enabled_when_available() {
        let available = [layer(c"VK_LAYER_MESA_overlay"), layer(c"VK_LAYER_KHRONOS_validation")];
        assert_eq!(negotiate_layers(&available, true), vec![c"VK_LAYER_KHRONOS_validation"]);
    }

    #[test]
    fn missing_validation_layer_is_skipped() {
        let available = [layer(c"VK_LAYER_MESA_overlay")];
        assert!(negotiate_layers(&available, true).is_empty());
    }

    #[test]
    fn validation_disabled_requests_nothing() {
        let available = [layer(c"VK_LAYER_KHRONOS_validation")];
        assert!(negotiate_layers(&available, false).is_empty());
    }

    #[test]
    fn debug_severities_map_onto_log_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Sev;
        assert_eq!(message_level(Sev::VERBOSE), log::Level::Trace);
        assert_eq!(message_level(Sev::INFO), log::Level::Debug);
        assert_eq!(message_level(Sev::WARNING), log::Level::Warn);
        assert_eq!(message_level(Sev::ERROR), log::Level::Error);
        assert_eq!(
            message_target(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "vulkan::validation"
        );
    }
}
