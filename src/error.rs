// Error types
//
// Every hard failure in the renderer ends up here. Native call failures
// carry the Vulkan result name plus a short description of what we were
// trying to do; policy failures (no usable GPU) get their own variants.

use ash::prelude::VkResult;
use ash::vk;

use crate::backend::chain::Stage;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{context} ({result:?})")]
    Vulkan {
        context: &'static str,
        result: vk::Result,
    },

    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("No vulkan device found")]
    NoDevice,

    #[error("Couldn't find a suitable vulkan device")]
    NoSuitableDevice,

    #[error("Window system already initialized")]
    WindowReinitialized,

    #[error("Window system error: {0}")]
    Window(String),

    #[error("Logger already initialized")]
    LoggerAlreadyInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid shader binary '{name}': {reason}")]
    Shader { name: &'static str, reason: String },

    #[error("Resource chain out of order: expected {expected:?}, got {got:?}")]
    OutOfOrder { expected: Stage, got: Stage },
}

/// Attach a context string to a raw `VkResult`, the way every native call
/// in the backend reports failure.
pub trait VkResultExt<T> {
    fn check(self, context: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn check(self, context: &'static str) -> Result<T> {
        self.map_err(|result| {
            log::error!("{} ({:?})", context, result);
            Error::Vulkan { context, result }
        })
    }
}
