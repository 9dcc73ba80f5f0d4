// GPU image resources
//
// Images are accessed through image views, which get bound into
// descriptor sets or attached to graph framebuffers. The graph tracks
// layouts between passes; the layout recorded here only covers the
// upload path for externally created images.

use ash::vk;

use crate::device::find_memory_type_index;
use crate::{Device, Result, StratusError};

bitflags::bitflags! {
    pub struct ImageUsage: u32 {
        const SAMPLED = 1;
        const STORAGE = 2;
        const TRANSFER_SRC = 4;
        const TRANSFER_DST = 8;
        const COLOR_ATTACHMENT = 16;
        const DEPTH_STENCIL_ATTACHMENT = 32;
    }
}

bitflags::bitflags! {
    pub struct ImageAspect: u32 {
        const COLOR = 1;
        const DEPTH = 2;
        const STENCIL = 4;
    }
}

pub struct ImageCreateInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub sample_count: u32,
    pub mip_count: u32,
    pub layer_count: u32,
    pub format: vk::Format,
    pub usage: ImageUsage,
    pub aspect: ImageAspect,
}

impl Default for ImageCreateInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            depth: 1,
            sample_count: 1,
            mip_count: 1,
            layer_count: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            aspect: ImageAspect::COLOR,
        }
    }
}

/// A typed GPU image handle plus its default view
///
/// Destroyed explicitly through Device::destroy_image.
pub struct Image {
    pub(crate) i_image: vk::Image,
    pub(crate) i_view: vk::ImageView,
    pub(crate) i_mem: vk::DeviceMemory,
    pub(crate) i_extent: vk::Extent2D,
    pub(crate) i_depth: u32,
    pub(crate) i_format: vk::Format,
    pub(crate) i_aspect: vk::ImageAspectFlags,
    pub(crate) i_mip_count: u32,
    pub(crate) i_layer_count: u32,
    pub(crate) i_sample_count: vk::SampleCountFlags,
    pub(crate) i_layout: vk::ImageLayout,
}

impl Image {
    pub fn extent(&self) -> vk::Extent2D {
        self.i_extent
    }

    pub fn format(&self) -> vk::Format {
        self.i_format
    }

    /// The image's default full-range view
    pub fn view(&self) -> vk::ImageView {
        self.i_view
    }

    /// The layout the upload path left the image in. The graph tracks
    /// its own resources' layouts itself.
    pub fn layout(&self) -> vk::ImageLayout {
        self.i_layout
    }
}

pub(crate) fn usage_to_vk(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }

    flags
}

pub(crate) fn aspect_to_vk(aspect: ImageAspect) -> vk::ImageAspectFlags {
    let mut flags = vk::ImageAspectFlags::empty();
    if aspect.contains(ImageAspect::COLOR) {
        flags |= vk::ImageAspectFlags::COLOR;
    }
    if aspect.contains(ImageAspect::DEPTH) {
        flags |= vk::ImageAspectFlags::DEPTH;
    }
    if aspect.contains(ImageAspect::STENCIL) {
        flags |= vk::ImageAspectFlags::STENCIL;
    }

    flags
}

pub(crate) fn sample_count_to_vk(count: u32) -> vk::SampleCountFlags {
    match count {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

impl Device {
    /// Create a vkImage and the resources needed to use it
    ///   (vkImageView and vkDeviceMemory)
    ///
    /// Images are generic buffers which can be used as sources or
    /// destinations of data. In vulkan memory management is hands on,
    /// so we allocate device memory to back the image ourselves.
    pub fn create_image(&self, info: &ImageCreateInfo) -> Result<Image> {
        let aspect = aspect_to_vk(info.aspect);
        let samples = sample_count_to_vk(info.sample_count);

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(match info.depth > 1 {
                true => vk::ImageType::TYPE_3D,
                false => vk::ImageType::TYPE_2D,
            })
            .format(info.format)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: info.depth,
            })
            .mip_levels(info.mip_count)
            .array_layers(info.layer_count)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage_to_vk(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let image = self
                .dev
                .create_image(&create_info, None)
                .or(Err(StratusError::COULD_NOT_CREATE_IMAGE))?;

            let mem_reqs = self.dev.get_image_memory_requirements(image);
            let memtype = find_memory_type_index(
                &self.mem_props,
                &mem_reqs,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .ok_or(StratusError::OUT_OF_MEMORY)?;

            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(mem_reqs.size)
                .memory_type_index(memtype);
            let mem = self
                .dev
                .allocate_memory(&alloc_info, None)
                .or(Err(StratusError::OUT_OF_MEMORY))?;
            self.dev
                .bind_image_memory(image, mem, 0)
                .expect("Unable to bind device memory to image");

            let view_info = vk::ImageViewCreateInfo::builder()
                .subresource_range(
                    vk::ImageSubresourceRange::builder()
                        .aspect_mask(aspect)
                        .level_count(info.mip_count)
                        .layer_count(info.layer_count)
                        .build(),
                )
                .image(image)
                .format(info.format)
                .view_type(match (info.depth > 1, info.layer_count > 1) {
                    (true, _) => vk::ImageViewType::TYPE_3D,
                    (false, true) => vk::ImageViewType::TYPE_2D_ARRAY,
                    (false, false) => vk::ImageViewType::TYPE_2D,
                });
            let view = self
                .dev
                .create_image_view(&view_info, None)
                .or(Err(StratusError::COULD_NOT_CREATE_IMAGE))?;

            Ok(Image {
                i_image: image,
                i_view: view,
                i_mem: mem,
                i_extent: vk::Extent2D {
                    width: info.width,
                    height: info.height,
                },
                i_depth: info.depth,
                i_format: info.format,
                i_aspect: aspect,
                i_mip_count: info.mip_count,
                i_layer_count: info.layer_count,
                i_sample_count: samples,
                i_layout: vk::ImageLayout::UNDEFINED,
            })
        }
    }

    /// Explicitly destroy an image, its view, and its memory.
    ///
    /// The caller is responsible for the image not being in flight.
    pub fn destroy_image(&self, image: Image) {
        unsafe {
            self.dev.destroy_image_view(image.i_view, None);
            self.dev.destroy_image(image.i_image, None);
            self.dev.free_memory(image.i_mem, None);
        }
    }
}
