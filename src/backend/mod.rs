// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each submodule owns one link of the resource
// chain; `context` strings them together in creation order.

pub mod capabilities;
pub mod chain;
pub mod context;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use context::Context;
