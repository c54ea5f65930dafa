// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no physical device offers graphics, presentation and the required extensions")]
    NoSuitableDevice,

    #[error("no memory type in filter {type_bits:#b} has properties {required:?}")]
    NoMatchingMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("{step} failed: {result}")]
    Vk {
        step: &'static str,
        result: vk::Result,
    },

    #[error("cannot read shader {}", path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader `{0}` is not valid SPIR-V")]
    InvalidShader(String),

    #[error("grid data has {got} cells, image holds {expected}")]
    SizeMismatch { expected: usize, got: usize },

    #[error("window handle unavailable: {0}")]
    Window(String),
}

/// Tags a raw driver status with the call that produced it.
pub trait VkResultExt<T> {
    fn step(self, step: &'static str) -> Result<T, GpuError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn step(self, step: &'static str) -> Result<T, GpuError> {
        self.map_err(|result| GpuError::Vk { step, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_names_the_call() {
        let r: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let e = r.step("queue_submit").unwrap_err();
        assert!(matches!(
            e,
            GpuError::Vk {
                step: "queue_submit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert!(e.to_string().starts_with("queue_submit failed"));
    }

    #[test]
    fn memory_error_shows_filter() {
        let e = GpuError::NoMatchingMemoryType {
            type_bits: 0b101,
            required: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        assert!(e.to_string().contains("0b101"));
    }
}
