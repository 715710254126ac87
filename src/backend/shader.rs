// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. The binaries are compiled by
// build.rs and embedded at compile time; here they are checked for word
// alignment and the SPIR-V magic number before reaching the driver.

use ash::vk;
use std::io::Cursor;

use crate::error::{Error, Result, VkResultExt};

const SPIRV_MAGIC: u32 = 0x0723_0203;

pub const TRIANGLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
pub const TRIANGLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

/// Decode an embedded blob into SPIR-V words
pub fn read_words(name: &'static str, code: &[u8]) -> Result<Vec<u32>> {
    if code.is_empty() {
        return Err(Error::Shader {
            name,
            reason: "binary is empty (was glslc available at build time?)".to_string(),
        });
    }

    // read_spv copies into a u32 buffer, so the blob itself may sit at any address
    let words = ash::util::read_spv(&mut Cursor::new(code)).map_err(|e| Error::Shader {
        name,
        reason: e.to_string(),
    })?;

    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(Error::Shader {
            name,
            reason: "missing SPIR-V magic number".to_string(),
        });
    }

    Ok(words)
}

/// Load SPIR-V shader from bytes and create a shader module
pub fn create_shader_module(
    device: &ash::Device,
    name: &'static str,
    code: &[u8],
) -> Result<vk::ShaderModule> {
    let words = read_words(name, code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    let module = unsafe { device.create_shader_module(&create_info, None) }
        .check("Failed to create shader module")?;
    log::debug!("Created shader module '{}' ({} words)", name, words.len());
    Ok(module)
}
