// Capability probing
//
// Vulkan reports variable-length lists with a two-call protocol: ask for
// the count, allocate, ask again to fill. The list can grow between the
// two calls (INCOMPLETE), in which case we simply start over.

use ash::prelude::VkResult;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr};
use std::ptr;

use crate::error::{Result, VkResultExt};

/// Run a count-query / fill-query pair until the list is complete.
///
/// `query(count, None)` must write the element count; `query(count, Some(buf))`
/// fills up to `buf.len()` elements and writes how many it wrote.
pub fn enumerate<T, F>(mut query: F) -> VkResult<Vec<T>>
where
    T: Default + Clone,
    F: FnMut(&mut u32, Option<&mut [T]>) -> vk::Result,
{
    loop {
        let mut count = 0;
        query(&mut count, None).result()?;

        let mut data = vec![T::default(); count as usize];
        match query(&mut count, Some(data.as_mut_slice())) {
            vk::Result::INCOMPLETE => continue,
            result => result.result()?,
        }

        data.truncate(count as usize);
        return Ok(data);
    }
}

/// Bytes of a fixed-size name field up to the first NUL, or the whole
/// field when there is none
fn name_bytes(raw: &[c_char]) -> Vec<u8> {
    raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect()
}

/// Name field of an extension/layer/device property struct
pub fn property_name(raw: &[c_char]) -> String {
    String::from_utf8_lossy(&name_bytes(raw)).into_owned()
}

pub fn has_extension(extensions: &[vk::ExtensionProperties], name: &CStr) -> bool {
    extensions
        .iter()
        .any(|ext| name_bytes(&ext.extension_name) == name.to_bytes())
}

pub fn has_layer(layers: &[vk::LayerProperties], name: &CStr) -> bool {
    layers
        .iter()
        .any(|layer| name_bytes(&layer.layer_name) == name.to_bytes())
}

fn out_ptr<T>(data: Option<&mut [T]>) -> *mut T {
    data.map_or(ptr::null_mut(), |buf| buf.as_mut_ptr())
}

pub fn instance_extensions(entry: &Entry) -> Result<Vec<vk::ExtensionProperties>> {
    let fp = entry.fp_v1_0();
    let extensions = enumerate(|count, data| unsafe {
        (fp.enumerate_instance_extension_properties)(ptr::null(), count, out_ptr(data))
    })
    .check("Failed to enumerate instance extensions")?;

    // The names are listed by instance creation
    log::debug!("Found {} instance extensions", extensions.len());
    Ok(extensions)
}

pub fn instance_layers(entry: &Entry) -> Result<Vec<vk::LayerProperties>> {
    let fp = entry.fp_v1_0();
    let layers = enumerate(|count, data| unsafe {
        (fp.enumerate_instance_layer_properties)(count, out_ptr(data))
    })
    .check("Failed to enumerate instance layers")?;

    log::debug!("Instance layers ({}):", layers.len());
    for layer in &layers {
        log::trace!("    {}", property_name(&layer.layer_name));
    }
    Ok(layers)
}

pub fn device_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<vk::ExtensionProperties>> {
    let fp = instance.fp_v1_0();
    let extensions = enumerate(|count, data| unsafe {
        (fp.enumerate_device_extension_properties)(
            physical_device,
            ptr::null(),
            count,
            out_ptr(data),
        )
    })
    .check("Failed to enumerate device extensions")?;

    log::trace!("Device extensions ({}):", extensions.len());
    for ext in &extensions {
        log::trace!("    {}", property_name(&ext.extension_name));
    }
    Ok(extensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Fake native list with the same two-call semantics as the driver
    fn query_over<'a>(
        source: &'a RefCell<Vec<u32>>,
    ) -> impl FnMut(&mut u32, Option<&mut [u32]>) -> vk::Result + 'a {
        move |count, data| {
            let items = source.borrow();
            match data {
                None => {
                    *count = items.len() as u32;
                    vk::Result::SUCCESS
                }
                Some(buf) => {
                    let n = buf.len().min(items.len());
                    buf[..n].copy_from_slice(&items[..n]);
                    *count = n as u32;
                    if n < items.len() {
                        vk::Result::INCOMPLETE
                    } else {
                        vk::Result::SUCCESS
                    }
                }
            }
        }
    }

    #[test]
    fn list_matches_reported_count() {
        let source = RefCell::new(vec![3, 1, 4, 1, 5]);
        let list = enumerate(query_over(&source)).unwrap();
        assert_eq!(list, vec![3, 1, 4, 1, 5]);
    }

    #[test]
    fn enumerating_twice_is_stable() {
        let source = RefCell::new(vec![9, 8, 7]);
        let first = enumerate(query_over(&source)).unwrap();
        let second = enumerate(query_over(&source)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_list() {
        let source = RefCell::new(Vec::new());
        assert!(enumerate(query_over(&source)).unwrap().is_empty());
    }

    #[test]
    fn list_growing_between_calls_is_requeried() {
        let source = RefCell::new(vec![1, 2]);
        let mut calls = 0;
        let mut inner = query_over(&source);
        let list = enumerate(|count, data: Option<&mut [u32]>| {
            calls += 1;
            // A layer appears right after the first count query
            if calls == 2 {
                source.borrow_mut().push(3);
            }
            inner(count, data)
        })
        .unwrap();

        assert_eq!(list, vec![1, 2, 3]);
        assert_eq!(calls, 4);
    }

    #[test]
    fn failure_is_propagated() {
        let result: VkResult<Vec<u32>> =
            enumerate(|_, _| vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(result.unwrap_err(), vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    }

    #[test]
    fn extension_lookup_by_name() {
        let mut ext = vk::ExtensionProperties::default();
        for (dst, &src) in ext.extension_name.iter_mut().zip(b"VK_KHR_swapchain\0") {
            *dst = src as c_char;
        }
        let list = [ext];

        assert_eq!(property_name(&ext.extension_name), "VK_KHR_swapchain");
        assert!(has_extension(&list, ash::extensions::khr::Swapchain::name()));
        assert!(!has_extension(&list, ash::extensions::ext::DebugUtils::name()));
    }

    #[test]
    fn unterminated_name_stays_in_bounds() {
        let raw = [b'a' as c_char, b'b' as c_char, b'c' as c_char];
        assert_eq!(property_name(&raw), "abc");
        assert_eq!(property_name(&[]), "");
    }
}
