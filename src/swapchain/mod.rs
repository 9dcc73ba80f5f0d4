// The swapchain and frame pacing
//
// Owns the per-frame synchronization trio (image-available semaphore,
// render-complete semaphore, submission fence), the per-frame primary
// command buffer, and the delta time clock. Two frames are kept in
// flight; a frame's resources are not touched again until its fence
// signals. The actual images come from one of two backends: a real
// vkSwapchainKHR over a caller-provided surface, or a headless pair of
// linear images for running without any window system.

mod headless;
mod surface;

use ash::vk;

use crate::cmdbuf::CmdBuffer;
use crate::{Device, QueueType, Result, WorkerId, FRAMES_IN_FLIGHT};
use utils::log;

use std::sync::Arc;
use std::time::Instant;

/// The image state a backend fills in on (re)creation
pub(crate) struct BackendState {
    pub(crate) images: Vec<vk::Image>,
    pub(crate) views: Vec<vk::ImageView>,
    pub(crate) extent: vk::Extent2D,
    pub(crate) format: vk::Format,
}

/// What a swapchain implementation must provide. The surface backend
/// drives vkAcquire/vkPresent, the headless one just rotates between
/// its images.
pub(crate) trait Backend {
    /// Destroy and recreate the image set, filling in `state`
    fn recreate(&mut self, state: &mut BackendState) -> Result<()>;

    /// Pick the next image to render to, signaling `image_available`
    /// if presentation semaphores are in play
    fn acquire(
        &mut self,
        state: &BackendState,
        image_available: vk::Semaphore,
        current: &mut u32,
    ) -> Result<()>;

    fn present(
        &mut self,
        state: &BackendState,
        image_index: u32,
        wait: Option<vk::Semaphore>,
    ) -> Result<()>;

    /// Whether acquire/present signal and consume binary semaphores.
    /// False for headless, where submissions only use the fence.
    fn uses_present_semas(&self) -> bool;

    /// Resize request from the application, used by the headless
    /// backend which has no surface to query
    fn set_extent_hint(&mut self, extent: vk::Extent2D);

    /// Read back the raw pixels of an image, where the backend
    /// supports it
    fn read_pixels(&self, state: &BackendState, image_index: u32) -> Result<Vec<u8>>;

    /// Tear down the image set and any backend objects
    fn destroy(&mut self, state: &mut BackendState);
}

/// Per frame-in-flight resources
struct Frame {
    /// signaled by acquire, waited by the frame's first submission
    image_available: vk::Semaphore,
    /// signaled by the frame's last submission, waited by present
    render_complete: vk::Semaphore,
    /// signaled by the frame's last submission; guards reuse of
    /// everything in this frame slot
    fence: vk::Fence,
    /// the frame's primary command buffer, taken by the graph while
    /// it records
    cbuf: Option<CmdBuffer>,
}

/// The swapchain
///
/// Created after the Device; pass it to RenderGraph::bake and
/// RenderGraph::execute to drive frames.
pub struct Swapchain {
    sc_dev: Arc<Device>,
    sc_backend: Box<dyn Backend>,
    sc_state: BackendState,

    sc_frames: Vec<Frame>,
    sc_current_frame: usize,
    sc_current_image: u32,

    sc_last_frame: Option<Instant>,
    sc_delta: f32,
}

impl Swapchain {
    /// Create the swapchain for this device.
    ///
    /// Headless devices get the image-pair backend, everything else
    /// gets a vkSwapchainKHR over the window system's surface.
    pub fn new(dev: Arc<Device>) -> Result<Self> {
        let mut backend: Box<dyn Backend> = match dev.d_headless {
            true => Box::new(headless::HeadlessBackend::new(dev.clone())),
            false => Box::new(surface::SurfaceBackend::new(dev.clone())?),
        };

        let mut state = BackendState {
            images: Vec::new(),
            views: Vec::new(),
            extent: vk::Extent2D::default(),
            format: vk::Format::UNDEFINED,
        };
        backend.recreate(&mut state)?;

        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            let sema_info = vk::SemaphoreCreateInfo::default();
            // signaled so the first wait passes immediately
            let fence_info =
                vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

            unsafe {
                frames.push(Frame {
                    image_available: dev.dev.create_semaphore(&sema_info, None).unwrap(),
                    render_complete: dev.dev.create_semaphore(&sema_info, None).unwrap(),
                    fence: dev.dev.create_fence(&fence_info, None).unwrap(),
                    cbuf: Some(dev.create_cmd_buffer(WorkerId(0), QueueType::Graphics)?),
                });
            }
        }

        Ok(Self {
            sc_dev: dev,
            sc_backend: backend,
            sc_state: state,
            sc_frames: frames,
            sc_current_frame: 0,
            sc_current_image: 0,
            sc_last_frame: None,
            sc_delta: 0.0,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.sc_state.extent
    }

    pub fn format(&self) -> vk::Format {
        self.sc_state.format
    }

    pub(crate) fn image_count(&self) -> usize {
        self.sc_state.images.len()
    }

    pub(crate) fn view(&self, index: usize) -> vk::ImageView {
        self.sc_state.views[index]
    }

    /// The vkImage acquired for the current frame
    pub(crate) fn current_image(&self) -> vk::Image {
        self.sc_state.images[self.sc_current_image as usize]
    }

    pub(crate) fn image_index(&self) -> u32 {
        self.sc_current_image
    }

    /// Which frame-in-flight slot is recording
    pub(crate) fn frame_index(&self) -> usize {
        self.sc_current_frame
    }

    pub(crate) fn image_available_sema(&self) -> Option<vk::Semaphore> {
        match self.sc_backend.uses_present_semas() {
            true => Some(self.sc_frames[self.sc_current_frame].image_available),
            false => None,
        }
    }

    pub(crate) fn render_complete_sema(&self) -> Option<vk::Semaphore> {
        match self.sc_backend.uses_present_semas() {
            true => Some(self.sc_frames[self.sc_current_frame].render_complete),
            false => None,
        }
    }

    pub(crate) fn frame_fence(&self) -> vk::Fence {
        self.sc_frames[self.sc_current_frame].fence
    }

    pub(crate) fn take_frame_cbuf(&mut self) -> CmdBuffer {
        self.sc_frames[self.sc_current_frame]
            .cbuf
            .take()
            .expect("Frame command buffer already taken")
    }

    pub(crate) fn put_frame_cbuf(&mut self, cbuf: CmdBuffer) {
        self.sc_frames[self.sc_current_frame].cbuf = Some(cbuf);
    }

    /// Seconds between the last two begin_frame calls
    pub fn delta_time(&self) -> f32 {
        self.sc_delta
    }

    /// Start a frame: wait for this slot's previous submission to
    /// clear the GPU, stamp delta time, and acquire the next image.
    ///
    /// The fence is only reset once the acquire succeeds, so an
    /// out-of-date error leaves the slot reusable for the retry.
    pub fn begin_frame(&mut self) -> Result<()> {
        let frame = &self.sc_frames[self.sc_current_frame];

        unsafe {
            self.sc_dev
                .dev
                .wait_for_fences(&[frame.fence], true, u64::MAX)
                .expect("Could not wait for frame fence");
        }

        let now = Instant::now();
        self.sc_delta = match self.sc_last_frame {
            Some(last) => now.duration_since(last).as_secs_f32(),
            None => 0.0,
        };
        self.sc_last_frame = Some(now);

        self.sc_backend.acquire(
            &self.sc_state,
            frame.image_available,
            &mut self.sc_current_image,
        )?;

        unsafe {
            self.sc_dev
                .dev
                .reset_fences(&[frame.fence])
                .expect("Could not reset frame fence");
        }

        Ok(())
    }

    /// Present the current image and move to the next frame slot.
    pub fn present(&mut self) -> Result<()> {
        let wait = self.render_complete_sema();
        let result = self
            .sc_backend
            .present(&self.sc_state, self.sc_current_image, wait);

        // the submission already happened, so the slot advances even
        // when presentation wants a resize
        self.sc_current_frame = (self.sc_current_frame + 1) % FRAMES_IN_FLIGHT;

        result
    }

    /// Recreate the swapchain images after a resize or an out-of-date
    /// error. The graph's on_resize must run after this.
    pub fn recreate(&mut self) -> Result<()> {
        self.sc_dev.wait_idle();
        self.sc_backend.recreate(&mut self.sc_state)?;
        self.sc_current_image = 0;
        log::debug!(
            "Recreated swapchain at {}x{}",
            self.sc_state.extent.width,
            self.sc_state.extent.height
        );

        Ok(())
    }

    /// Explicit resize request from the application.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.sc_backend.set_extent_hint(vk::Extent2D {
            width: width,
            height: height,
        });
        self.recreate()
    }

    /// Read back the raw pixels of the most recently presented image.
    /// Supported by the headless backend for tests.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        self.sc_dev.wait_idle();
        self.sc_backend
            .read_pixels(&self.sc_state, self.sc_current_image)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.sc_dev.wait_idle();

        self.sc_backend.destroy(&mut self.sc_state);

        for frame in self.sc_frames.drain(..) {
            unsafe {
                self.sc_dev.dev.destroy_semaphore(frame.image_available, None);
                self.sc_dev.dev.destroy_semaphore(frame.render_complete, None);
                self.sc_dev.dev.destroy_fence(frame.fence, None);
            }
            if let Some(cbuf) = frame.cbuf {
                self.sc_dev.free_cmd_buffer(cbuf);
            }
        }
    }
}
