// Surface-backed swapchain
//
// The real vkSwapchainKHR over a surface handed to us by the caller's
// window system. Handles format selection, recreation on resize, and
// the acquire/present pair.

use ash::extensions::khr;
use ash::vk;

use super::{Backend, BackendState};
use crate::{Device, Result, StratusError};
use utils::log;

use std::sync::Arc;

pub(crate) struct SurfaceBackend {
    sb_dev: Arc<Device>,
    sb_surface_loader: khr::Surface,
    sb_swapchain_loader: khr::Swapchain,
    sb_surface: vk::SurfaceKHR,
    sb_swapchain: vk::SwapchainKHR,
    sb_surface_format: vk::SurfaceFormatKHR,
    sb_present_mode: vk::PresentModeKHR,
    sb_present_queue: vk::Queue,
    /// the application's requested size, used when the surface does
    /// not dictate one
    sb_extent_hint: Option<vk::Extent2D>,
}

impl SurfaceBackend {
    pub(crate) fn new(dev: Arc<Device>) -> Result<Self> {
        let ws = dev
            .d_window_system
            .as_ref()
            .expect("A non-headless device requires a window system");

        let surface_loader = khr::Surface::new(&dev.inst.loader, &dev.inst.inst);
        let swapchain_loader = khr::Swapchain::new(&dev.inst.inst, &dev.dev);
        let surface = ws.create_surface(&dev.inst.loader, &dev.inst.inst)?;

        // presentation happens on the graphics queue, make sure the
        // surface agrees
        let supported = unsafe {
            surface_loader
                .get_physical_device_surface_support(
                    dev.pdev,
                    dev.d_queues.graphics_family,
                    surface,
                )
                .or(Err(StratusError::VK_SURF_NOT_SUPPORTED))?
        };
        if !supported {
            return Err(StratusError::VK_SURF_NOT_SUPPORTED);
        }

        let surface_format = Self::select_surface_format(&surface_loader, surface, dev.pdev)?;

        // FIFO is always available and keeps us off the power-hungry
        // modes
        let present_queue = dev.d_queues.graphics;

        Ok(Self {
            sb_dev: dev,
            sb_surface_loader: surface_loader,
            sb_swapchain_loader: swapchain_loader,
            sb_surface: surface,
            sb_swapchain: vk::SwapchainKHR::null(),
            sb_surface_format: surface_format,
            sb_present_mode: vk::PresentModeKHR::FIFO,
            sb_present_queue: present_queue,
            sb_extent_hint: None,
        })
    }

    /// choose a vkSurfaceFormatKHR for the vkSurfaceKHR
    ///
    /// This selects the color space and format for the swapchain
    /// images.
    fn select_surface_format(
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        pdev: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(pdev, surface)
                .or(Err(StratusError::INVALID))?
        };

        formats
            .iter()
            .map(|fmt| match fmt.format {
                // if the surface does not specify a desired format
                // then we can choose our own
                vk::Format::UNDEFINED => vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: fmt.color_space,
                },
                _ => *fmt,
            })
            .nth(0)
            .ok_or(StratusError::INVALID_FORMAT)
    }

    fn destroy_views(&self, state: &mut BackendState) {
        unsafe {
            for view in state.views.drain(..) {
                self.sb_dev.dev.destroy_image_view(view, None);
            }
        }
        state.images.clear();
    }
}

impl Backend for SurfaceBackend {
    /// Populate the state with a new vkSwapchain
    ///
    /// Swapchains contain the images used for presentation. The old
    /// swapchain is handed to the create call for a smooth handover
    /// and destroyed afterwards.
    fn recreate(&mut self, state: &mut BackendState) -> Result<()> {
        self.destroy_views(state);

        let caps = unsafe {
            self.sb_surface_loader
                .get_physical_device_surface_capabilities(self.sb_dev.pdev, self.sb_surface)
                .or(Err(StratusError::COULD_NOT_CREATE_SWAPCHAIN))?
        };

        // the surface dictates the extent unless it reports the
        // special "whatever you want" value
        let extent = match caps.current_extent.width {
            std::u32::MAX => self.sb_extent_hint.unwrap_or(vk::Extent2D {
                width: 1280,
                height: 720,
            }),
            _ => caps.current_extent,
        };

        let mut desired_image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && desired_image_count > caps.max_image_count {
            desired_image_count = caps.max_image_count;
        }

        let transform = match caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            true => vk::SurfaceTransformFlagsKHR::IDENTITY,
            false => caps.current_transform,
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.sb_surface)
            .min_image_count(desired_image_count)
            .image_color_space(self.sb_surface_format.color_space)
            .image_format(self.sb_surface_format.format)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.sb_present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(self.sb_swapchain);

        let new_swapchain = unsafe {
            self.sb_swapchain_loader
                .create_swapchain(&create_info, None)
                .or(Err(StratusError::COULD_NOT_CREATE_SWAPCHAIN))?
        };
        unsafe {
            self.sb_swapchain_loader
                .destroy_swapchain(self.sb_swapchain, None);
        }
        self.sb_swapchain = new_swapchain;

        let images = unsafe {
            self.sb_swapchain_loader
                .get_swapchain_images(self.sb_swapchain)
                .or(Err(StratusError::COULD_NOT_CREATE_IMAGE))?
        };

        let mut views = Vec::with_capacity(images.len());
        for image in images.iter() {
            let create_info = vk::ImageViewCreateInfo::builder()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.sb_surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image(*image);

            views.push(unsafe {
                self.sb_dev
                    .dev
                    .create_image_view(&create_info, None)
                    .or(Err(StratusError::COULD_NOT_CREATE_IMAGE))?
            });
        }

        state.images = images;
        state.views = views;
        state.extent = extent;
        state.format = self.sb_surface_format.format;

        Ok(())
    }

    /// Update `current` with the swapchain image to render to
    ///
    /// NOT_READY and TIMEOUT just mean try again; out-of-date and
    /// suboptimal bubble up so the swapchain gets recreated.
    fn acquire(
        &mut self,
        _state: &BackendState,
        image_available: vk::Semaphore,
        current: &mut u32,
    ) -> Result<()> {
        loop {
            match unsafe {
                self.sb_swapchain_loader.acquire_next_image(
                    self.sb_swapchain,
                    u64::MAX,
                    image_available,
                    vk::Fence::null(),
                )
            } {
                Ok((index, suboptimal)) => {
                    if suboptimal {
                        return Err(StratusError::OUT_OF_DATE);
                    }
                    *current = index;
                    return Ok(());
                }
                Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => {
                    log::debug!("vkAcquireNextImageKHR: not ready, retrying");
                    continue;
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(StratusError::OUT_OF_DATE),
                Err(vk::Result::SUBOPTIMAL_KHR) => return Err(StratusError::OUT_OF_DATE),
                Err(_) => return Err(StratusError::COULD_NOT_ACQUIRE_NEXT_IMAGE),
            }
        }
    }

    /// Flip the buffers and present the image
    fn present(
        &mut self,
        _state: &BackendState,
        image_index: u32,
        wait: Option<vk::Semaphore>,
    ) -> Result<()> {
        let wait_semas = [wait.expect("Surface presentation requires the render semaphore")];
        let swapchains = [self.sb_swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semas)
            .swapchains(&swapchains)
            .image_indices(&indices);

        unsafe {
            match self
                .sb_swapchain_loader
                .queue_present(self.sb_present_queue, &info)
            {
                Ok(false) => Ok(()),
                Ok(true) => Err(StratusError::OUT_OF_DATE),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(StratusError::OUT_OF_DATE),
                Err(vk::Result::SUBOPTIMAL_KHR) => Err(StratusError::OUT_OF_DATE),
                Err(_) => Err(StratusError::PRESENT_FAILED),
            }
        }
    }

    fn uses_present_semas(&self) -> bool {
        true
    }

    fn set_extent_hint(&mut self, extent: vk::Extent2D) {
        self.sb_extent_hint = Some(extent);
    }

    fn read_pixels(&self, _state: &BackendState, _image_index: u32) -> Result<Vec<u8>> {
        // presentable images are not host readable
        Err(StratusError::INVALID)
    }

    fn destroy(&mut self, state: &mut BackendState) {
        self.destroy_views(state);
        unsafe {
            self.sb_swapchain_loader
                .destroy_swapchain(self.sb_swapchain, None);
            self.sb_swapchain = vk::SwapchainKHR::null();
            self.sb_surface_loader.destroy_surface(self.sb_surface, None);
        }
    }
}
