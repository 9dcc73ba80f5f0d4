// Headless swapchain backend
//
// For running the full frame loop with no window system at all: two
// linear, host visible color images stand in for the swapchain.
// Acquire rotates between them, present is a no-op, and the pixels
// can be read straight back out for checking results.

use ash::vk;

use super::{Backend, BackendState};
use crate::device::find_memory_type_index;
use crate::{Device, Result, StratusError};

use std::sync::Arc;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

pub(crate) struct HeadlessBackend {
    h_dev: Arc<Device>,
    /// memory backing each image, for readback
    h_image_mems: Vec<vk::DeviceMemory>,
    h_extent: vk::Extent2D,
}

impl HeadlessBackend {
    pub(crate) fn new(dev: Arc<Device>) -> Self {
        Self {
            h_dev: dev,
            h_image_mems: Vec::new(),
            h_extent: vk::Extent2D {
                width: WIDTH,
                height: HEIGHT,
            },
        }
    }

    fn destroy_images(&mut self, state: &mut BackendState) {
        unsafe {
            for view in state.views.drain(..) {
                self.h_dev.dev.destroy_image_view(view, None);
            }
            for image in state.images.drain(..) {
                self.h_dev.dev.destroy_image(image, None);
            }
            for mem in self.h_image_mems.drain(..) {
                self.h_dev.dev.free_memory(mem, None);
            }
        }
    }
}

impl Backend for HeadlessBackend {
    fn recreate(&mut self, state: &mut BackendState) -> Result<()> {
        self.destroy_images(state);

        for _ in 0..2 {
            unsafe {
                let create_info = vk::ImageCreateInfo::builder()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(FORMAT)
                    .extent(vk::Extent3D {
                        width: self.h_extent.width,
                        height: self.h_extent.height,
                        depth: 1,
                    })
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    // linear so the test readback can map it
                    .tiling(vk::ImageTiling::LINEAR)
                    .usage(
                        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                    )
                    .sharing_mode(vk::SharingMode::EXCLUSIVE);
                let image = self
                    .h_dev
                    .dev
                    .create_image(&create_info, None)
                    .or(Err(StratusError::COULD_NOT_CREATE_IMAGE))?;

                let reqs = self.h_dev.dev.get_image_memory_requirements(image);
                let memtype = find_memory_type_index(
                    &self.h_dev.mem_props,
                    &reqs,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
                .ok_or(StratusError::OUT_OF_MEMORY)?;
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(reqs.size)
                    .memory_type_index(memtype);
                let mem = self
                    .h_dev
                    .dev
                    .allocate_memory(&alloc_info, None)
                    .or(Err(StratusError::OUT_OF_MEMORY))?;
                self.h_dev
                    .dev
                    .bind_image_memory(image, mem, 0)
                    .or(Err(StratusError::OUT_OF_MEMORY))?;

                let view_info = vk::ImageViewCreateInfo::builder()
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(FORMAT)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image(image);
                let view = self
                    .h_dev
                    .dev
                    .create_image_view(&view_info, None)
                    .or(Err(StratusError::COULD_NOT_CREATE_IMAGE))?;

                state.images.push(image);
                state.views.push(view);
                self.h_image_mems.push(mem);
            }
        }

        state.extent = self.h_extent;
        state.format = FORMAT;

        Ok(())
    }

    /// Just rotate between our images
    fn acquire(
        &mut self,
        state: &BackendState,
        _image_available: vk::Semaphore,
        current: &mut u32,
    ) -> Result<()> {
        *current += 1;
        if *current >= state.images.len() as u32 {
            *current = 0;
        }

        Ok(())
    }

    fn present(
        &mut self,
        _state: &BackendState,
        _image_index: u32,
        _wait: Option<vk::Semaphore>,
    ) -> Result<()> {
        // nothing to present
        Ok(())
    }

    fn uses_present_semas(&self) -> bool {
        false
    }

    fn set_extent_hint(&mut self, extent: vk::Extent2D) {
        self.h_extent = extent;
    }

    /// Copy the image's pixels out row by row, honoring the driver's
    /// row pitch.
    fn read_pixels(&self, state: &BackendState, image_index: u32) -> Result<Vec<u8>> {
        let image = state.images[image_index as usize];
        let mem = self.h_image_mems[image_index as usize];
        let width = state.extent.width as usize;
        let height = state.extent.height as usize;

        let layout = unsafe {
            self.h_dev.dev.get_image_subresource_layout(
                image,
                vk::ImageSubresource {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    array_layer: 0,
                },
            )
        };

        let mut pixels = vec![0u8; width * height * 4];
        unsafe {
            let ptr = self
                .h_dev
                .dev
                .map_memory(mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .or(Err(StratusError::OUT_OF_MEMORY))? as *const u8;

            for row in 0..height {
                let src = ptr.add(layout.offset as usize + row * layout.row_pitch as usize);
                let dst = pixels.as_mut_ptr().add(row * width * 4);
                std::ptr::copy_nonoverlapping(src, dst, width * 4);
            }

            self.h_dev.dev.unmap_memory(mem);
        }

        Ok(pixels)
    }

    fn destroy(&mut self, state: &mut BackendState) {
        self.destroy_images(state);
    }
}
