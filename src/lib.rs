// The Stratus rendering core
//
// A thin, explicit layer over Vulkan organized around a frame render
// graph. The graph schedules passes, materializes transient resources,
// and drives per-frame command recording; around it sit caches for
// pipelines, pipeline layouts, and descriptor sets, plus pools for
// transient uniform/vertex/index data.
#![allow(non_camel_case_types)]

mod buffer;
mod bufferpool;
mod cmdbuf;
mod descpool;
mod device;
mod graph;
mod image;
mod instance;
mod pipeline;
mod sampler;
mod shader;
mod swapchain;

#[cfg(test)]
mod tests;

extern crate utils;

pub use crate::buffer::{Buffer, BufferCreateInfo, BufferMemory, BufferUsage};
pub use crate::cmdbuf::{BufferCopyView, CmdBuffer, ImageCopyView};
pub use crate::descpool::Descriptor;
pub use crate::device::{Device, QueueType, WorkerId};
pub use crate::graph::{
    GraphBufferInfo, GraphExtent, GraphImageInfo, PassId, PassStage, ReadKind, RenderGraph,
    WriteKind,
};
pub use crate::image::{Image, ImageAspect, ImageCreateInfo, ImageUsage};
pub use crate::instance::Instance;
pub use crate::pipeline::{GraphicsPipelineInfo, Pipeline};
pub use crate::sampler::{Sampler, SamplerCreateInfo};
pub use crate::swapchain::Swapchain;

use ash::vk;

/// Command buffers address descriptors as a set x binding matrix. These
/// are the matrix dimensions, bindings must be contiguous from zero.
pub const MAX_DESCRIPTOR_SETS: usize = 8;
pub const MAX_DESCRIPTOR_BINDINGS: usize = 8;

/// Number of frames the CPU may record ahead of the GPU
pub const FRAMES_IN_FLIGHT: usize = 2;

/// These errors are returned at the porous points of the API: graph
/// baking and the swapchain acquire/present pair. Everything else in
/// this crate treats failure as a contract violation and aborts.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum StratusError {
    #[error("Invalid operation")]
    INVALID,
    #[error("Invalid format")]
    INVALID_FORMAT,
    #[error("No suitable vulkan device found")]
    NO_SUITABLE_DEVICE,
    #[error("Required queue families are not present")]
    NO_SUITABLE_QUEUE,
    #[error("The surface is not supported by this queue family")]
    VK_SURF_NOT_SUPPORTED,
    #[error("Could not create the vulkan swapchain")]
    COULD_NOT_CREATE_SWAPCHAIN,
    #[error("Could not create a vulkan image")]
    COULD_NOT_CREATE_IMAGE,
    #[error("Could not create a vulkan buffer")]
    COULD_NOT_CREATE_BUFFER,
    #[error("Could not acquire the next swapchain image")]
    COULD_NOT_ACQUIRE_NEXT_IMAGE,
    #[error("The swapchain is out of date and must be recreated")]
    OUT_OF_DATE,
    #[error("Swapchain presentation failed")]
    PRESENT_FAILED,
    #[error("Out of memory")]
    OUT_OF_MEMORY,
    #[error("Shader binary is not valid SPIR-V")]
    INVALID_SPIRV,
    #[error("Shader stages disagree on a descriptor binding")]
    MISMATCHED_BINDING,
    #[error("Graph references a resource that was never added")]
    UNKNOWN_RESOURCE,
    #[error("Graph resource has two writers without an intervening read")]
    DOUBLE_WRITER,
    #[error("Graph pass reads a resource that is never written")]
    UNWRITTEN_RESOURCE,
    #[error("Graph pass attachments have incompatible dimensions or formats")]
    INCOMPATIBLE_ATTACHMENTS,
    #[error("The graph must be baked before this operation")]
    GRAPH_NOT_BAKED,
}

pub type Result<T> = std::result::Result<T, StratusError>;

/// The boundary to the window system.
///
/// Windowing is not this crate's job. Whatever does own the window
/// implements this to hand us the instance extensions it needs and the
/// presentation surface. Headless devices never touch it.
pub trait WindowSystem: Send + Sync {
    /// Names of the instance extensions required for presentation,
    /// as raw pointers suitable for vkCreateInstance.
    fn extension_names(&self) -> Vec<*const std::os::raw::c_char>;

    /// Create the presentation surface.
    fn create_surface(&self, entry: &ash::Entry, inst: &ash::Instance)
        -> Result<vk::SurfaceKHR>;
}

/// Parameters for creating a Device
///
/// This is where the runtime configuration of the core lives: whether
/// a swapchain/surface should exist at all, how many worker threads
/// will record with us, and whether the validation layers are loaded.
pub struct CreateInfo {
    /// Do not create any surface or swapchain images backed by one
    pub headless: bool,
    /// Worker threads that will record in parallel. Command pools are
    /// sized to num_threads + 1 to account for the main thread.
    pub num_threads: u32,
    /// Load the validation layers and debug messenger
    pub validation: bool,
    /// Depth formats to try, in order, when choosing the device's
    /// preferred depth format.
    pub depth_format_candidates: Vec<vk::Format>,
    /// The window system to create a presentation surface with.
    /// Must be set unless headless is.
    pub window_system: Option<Box<dyn WindowSystem>>,
}

impl CreateInfo {
    pub fn builder() -> CreateInfoBuilder {
        CreateInfoBuilder {
            ci: CreateInfo {
                headless: false,
                num_threads: 0,
                validation: false,
                depth_format_candidates: vec![
                    vk::Format::D24_UNORM_S8_UINT,
                    vk::Format::D32_SFLOAT_S8_UINT,
                    vk::Format::D32_SFLOAT,
                ],
                window_system: None,
            },
        }
    }
}

pub struct CreateInfoBuilder {
    ci: CreateInfo,
}

impl CreateInfoBuilder {
    pub fn headless(mut self, headless: bool) -> Self {
        self.ci.headless = headless;
        self
    }

    pub fn num_threads(mut self, num_threads: u32) -> Self {
        self.ci.num_threads = num_threads;
        self
    }

    pub fn validation(mut self, validation: bool) -> Self {
        self.ci.validation = validation;
        self
    }

    pub fn depth_format_candidates(mut self, candidates: Vec<vk::Format>) -> Self {
        self.ci.depth_format_candidates = candidates;
        self
    }

    pub fn window_system(mut self, ws: Box<dyn WindowSystem>) -> Self {
        self.ci.window_system = Some(ws);
        self
    }

    pub fn build(self) -> CreateInfo {
        self.ci
    }
}
