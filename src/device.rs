// Vulkan device representation
//
// This stores per-GPU state: the logical device, the graphics /
// compute / transfer queues, per-worker command pools, the transient
// buffer pools, and the long lived pipeline caches.

use ash::vk;

use crate::bufferpool::{BlockAllocation, BufferBlock, BufferPool};
use crate::buffer::Buffer;
use crate::descpool::DescPool;
use crate::image::Image;
use crate::instance::Instance;
use crate::pipeline::{PipelineInstance, PipelineLayout};
use crate::{CreateInfo, CmdBuffer, Result, StratusError};
use utils::log;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The three logical queues of the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// Selects the command pool a recording operation allocates from.
///
/// Pools are sized to `num_threads + 1`, id 0 being the main thread.
/// Passing this explicitly is what lets worker threads record without
/// any thread local state in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerId(pub u32);

/// Size of the backing buffers in the transient pools
const TRANSIENT_BLOCK_SIZE: u64 = 65536;
/// Extra room appended when an allocation overflows a whole block
const TRANSIENT_BLOCK_SPILL: u64 = 4096;

/// Returns an index into the array of memory types for the memory
/// properties
///
/// Memory types specify the location and accessability of memory. Device
/// local memory is resident on the GPU, while host visible memory can be
/// read from the system side.
pub(crate) fn find_memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    reqs: &vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    for (i, ref mem_type) in props.memory_types.iter().enumerate() {
        // Bit i of memory_type_bits will be set if the resource supports
        // the ith memory type in props.
        if (reqs.memory_type_bits >> i) & 1 == 1 && mem_type.property_flags.contains(flags) {
            return Some(i as u32);
        }
    }
    None
}

/// The queue family trio we run on.
///
/// When two families collide the same vkQueue handle is shared, which
/// the submission and scheduling code checks through the family ids.
pub(crate) struct Queues {
    pub(crate) graphics_family: u32,
    pub(crate) compute_family: u32,
    pub(crate) transfer_family: u32,
    pub(crate) graphics: vk::Queue,
    pub(crate) compute: vk::Queue,
    pub(crate) transfer: vk::Queue,
}

/// Stratus Device
///
/// This holds all of the Vulkan logic for one GPU.
pub struct Device {
    pub(crate) inst: Arc<Instance>,
    /// the logical device we are using
    pub(crate) dev: ash::Device,
    /// the physical device selected to render with
    pub(crate) pdev: vk::PhysicalDevice,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,
    pub(crate) pdev_props: vk::PhysicalDeviceProperties,
    pub(crate) d_queues: Queues,
    /// chosen from the CreateInfo's candidate list
    pub(crate) d_depth_format: vk::Format,
    pub(crate) d_headless: bool,
    /// the caller's window system, used by the swapchain to create
    /// its surface
    pub(crate) d_window_system: Option<Box<dyn crate::WindowSystem>>,
    d_num_pools: u32,
    /// Externally synchronized and mutable state
    pub(crate) d_internal: RwLock<DeviceInternal>,
}

/// The set of per-device data that needs to be "externally synchronized"
/// according to Vulkan, plus the mutable caches. One coarse lock guards
/// it all: pipeline layouts, pipeline instances, descriptor pools,
/// buffer pool lease/recycle, and queue submission.
pub(crate) struct DeviceInternal {
    pub(crate) graphics_cmd_pools: Vec<vk::CommandPool>,
    /// empty when compute shares the graphics family
    pub(crate) compute_cmd_pools: Vec<vk::CommandPool>,
    pub(crate) transfer_cmd_pools: Vec<vk::CommandPool>,

    pub(crate) ubo_pool: BufferPool,
    pub(crate) vbo_pool: BufferPool,
    pub(crate) ibo_pool: BufferPool,

    /// combined-set-layout hash -> refcounted shared layouts. Buckets
    /// hold more than one entry only when hashes collide; lookups
    /// compare the retained full key.
    pub(crate) pipeline_layouts: HashMap<u64, Vec<LayoutEntry>>,
    /// pipeline hash ^ renderpass compat hash -> concrete pipelines,
    /// bucketed the same way
    pub(crate) pipeline_instances: HashMap<u64, Vec<Arc<PipelineInstance>>>,
}

pub(crate) struct LayoutEntry {
    pub(crate) layout: Arc<PipelineLayout>,
    /// one descriptor pool per set index of this layout
    pub(crate) pools: Vec<DescPool>,
    pub(crate) refs: u32,
}

/// Which transient pool a command buffer allocation comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransientKind {
    Ubo,
    Vbo,
    Ibo,
}

impl Device {
    /// Find queue family indices for the graphics, compute, and
    /// transfer queues.
    fn find_queue_families(inst: &ash::Instance, pdev: vk::PhysicalDevice) -> Option<(u32, u32, u32)> {
        let props = unsafe { inst.get_physical_device_queue_family_properties(pdev) };

        let find = |flags: vk::QueueFlags| {
            props
                .iter()
                .enumerate()
                .filter_map(|(index, info)| match info.queue_flags.contains(flags) {
                    true => Some(index as u32),
                    false => None,
                })
                .nth(0)
        };

        Some((
            find(vk::QueueFlags::GRAPHICS)?,
            find(vk::QueueFlags::COMPUTE)?,
            find(vk::QueueFlags::TRANSFER)?,
        ))
    }

    /// Choose a vkPhysicalDevice.
    ///
    /// The first device with a complete set of queue families wins.
    fn select_pdev(inst: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let pdevices = unsafe {
            inst.enumerate_physical_devices()
                .expect("Physical device error")
        };

        pdevices
            .iter()
            .find(|&&pdev| Self::find_queue_families(inst, pdev).is_some())
            .copied()
            .ok_or(StratusError::NO_SUITABLE_DEVICE)
    }

    /// Create a vkDevice from a vkPhysicalDevice
    ///
    /// One queue is created in each distinct family of the trio. The
    /// swapchain extension is only requested when a surface will exist.
    fn create_device(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        families: &[u32],
        headless: bool,
    ) -> ash::Device {
        let mut dev_extension_names = Vec::new();
        if !headless {
            dev_extension_names.push(ash::extensions::khr::Swapchain::name().as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder().build();

        let priorities = [1.0];
        let mut queue_infos = Vec::new();
        let mut seen: Vec<u32> = Vec::new();
        for family in families {
            if seen.contains(family) {
                continue;
            }
            seen.push(*family);
            queue_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*family)
                    .queue_priorities(&priorities)
                    .build(),
            );
        }

        let dev_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(queue_infos.as_ref())
            .enabled_extension_names(dev_extension_names.as_slice())
            .enabled_features(&features)
            .build();

        unsafe { inst.create_device(pdev, &dev_create_info, None).unwrap() }
    }

    /// Walk the candidate list and return the first depth format the
    /// physical device can use as a depth-stencil attachment.
    fn find_depth_format(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        candidates: &[vk::Format],
    ) -> Result<vk::Format> {
        for format in candidates {
            let props = unsafe { inst.get_physical_device_format_properties(pdev, *format) };
            if props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            {
                return Ok(*format);
            }
        }

        Err(StratusError::INVALID_FORMAT)
    }

    /// returns a new vkCommandPool for the queue family
    ///
    /// Command buffers are allocated from command pools. That's about
    /// all they do. They just manage memory.
    fn create_command_pool(
        dev: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> vk::CommandPool {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family);

        unsafe { dev.create_command_pool(&pool_create_info, None).unwrap() }
    }

    /// Create a new Device from the runtime configuration
    ///
    /// Returns an Arc since command buffers, the graph, and the
    /// swapchain all keep a reference to the device that made them.
    pub fn new(mut info: CreateInfo) -> Result<Arc<Self>> {
        let instance = Arc::new(Instance::new(&info));
        let pdev = Self::select_pdev(&instance.inst)?;
        let (graphics_family, compute_family, transfer_family) =
            Self::find_queue_families(&instance.inst, pdev).ok_or(StratusError::NO_SUITABLE_QUEUE)?;

        let mem_props = unsafe { instance.inst.get_physical_device_memory_properties(pdev) };
        let pdev_props = unsafe { instance.inst.get_physical_device_properties(pdev) };

        let dev = Self::create_device(
            &instance.inst,
            pdev,
            &[graphics_family, compute_family, transfer_family],
            info.headless,
        );

        let queues = unsafe {
            Queues {
                graphics_family: graphics_family,
                compute_family: compute_family,
                transfer_family: transfer_family,
                graphics: dev.get_device_queue(graphics_family, 0),
                compute: dev.get_device_queue(compute_family, 0),
                transfer: dev.get_device_queue(transfer_family, 0),
            }
        };

        let depth_format =
            Self::find_depth_format(&instance.inst, pdev, &info.depth_format_candidates)?;
        log::debug!("Selected depth format {:?}", depth_format);

        // One pool per worker thread plus the main thread
        let num_pools = info.num_threads + 1;

        let graphics_cmd_pools: Vec<_> = (0..num_pools)
            .map(|_| {
                Self::create_command_pool(
                    &dev,
                    graphics_family,
                    vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                )
            })
            .collect();
        let compute_cmd_pools: Vec<_> = match compute_family == graphics_family {
            true => Vec::new(),
            false => (0..num_pools)
                .map(|_| {
                    Self::create_command_pool(
                        &dev,
                        compute_family,
                        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                    )
                })
                .collect(),
        };
        let transfer_cmd_pools: Vec<_> = (0..num_pools)
            .map(|_| {
                Self::create_command_pool(
                    &dev,
                    transfer_family,
                    vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                        | vk::CommandPoolCreateFlags::TRANSIENT,
                )
            })
            .collect();

        // The UBO pool has to respect the device's offset alignment
        // since its sub-ranges are bound with dynamic offsets
        let ubo_align = std::cmp::max(
            16,
            pdev_props.limits.min_uniform_buffer_offset_alignment,
        );

        Ok(Arc::new(Self {
            inst: instance,
            dev: dev,
            pdev: pdev,
            mem_props: mem_props,
            pdev_props: pdev_props,
            d_queues: queues,
            d_depth_format: depth_format,
            d_headless: info.headless,
            d_window_system: info.window_system.take(),
            d_num_pools: num_pools,
            d_internal: RwLock::new(DeviceInternal {
                graphics_cmd_pools: graphics_cmd_pools,
                compute_cmd_pools: compute_cmd_pools,
                transfer_cmd_pools: transfer_cmd_pools,
                ubo_pool: BufferPool::new(
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    TRANSIENT_BLOCK_SIZE,
                    ubo_align,
                    TRANSIENT_BLOCK_SPILL,
                ),
                vbo_pool: BufferPool::new(
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                    TRANSIENT_BLOCK_SIZE,
                    16,
                    TRANSIENT_BLOCK_SPILL,
                ),
                ibo_pool: BufferPool::new(
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    TRANSIENT_BLOCK_SIZE,
                    16,
                    TRANSIENT_BLOCK_SPILL,
                ),
                pipeline_layouts: HashMap::new(),
                pipeline_instances: HashMap::new(),
            }),
        }))
    }

    /// The preferred depth format resolved from the candidate list
    pub fn depth_format(&self) -> vk::Format {
        self.d_depth_format
    }

    /// The vkQueue handle for a logical queue
    pub(crate) fn queue(&self, ty: QueueType) -> vk::Queue {
        match ty {
            QueueType::Graphics => self.d_queues.graphics,
            QueueType::Compute => self.d_queues.compute,
            QueueType::Transfer => self.d_queues.transfer,
        }
    }

    /// Allocate raw vkCommandBuffers from a worker's pool.
    ///
    /// Command buffers are constructed once and recorded many times.
    /// Command buffer is shortened to `cbuf` in many areas of the code.
    pub(crate) fn allocate_raw_cbufs(
        &self,
        worker: WorkerId,
        queue: QueueType,
        count: u32,
    ) -> Vec<vk::CommandBuffer> {
        assert!(worker.0 < self.d_num_pools);
        let internal = self.d_internal.read().unwrap();
        let pool = internal.cmd_pool(worker, queue, &self.d_queues);

        let cbuf_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(count)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        unsafe {
            self.dev
                .allocate_command_buffers(&cbuf_allocate_info)
                .unwrap()
        }
    }

    pub(crate) fn free_raw_cbuf(&self, worker: WorkerId, queue: QueueType, cbuf: vk::CommandBuffer) {
        let internal = self.d_internal.read().unwrap();
        let pool = internal.cmd_pool(worker, queue, &self.d_queues);
        unsafe { self.dev.free_command_buffers(pool, &[cbuf]) };
    }

    /// Create a command buffer for recording on the given queue.
    pub fn create_cmd_buffer(
        self: &Arc<Self>,
        worker: WorkerId,
        queue: QueueType,
    ) -> Result<CmdBuffer> {
        let raw = self.allocate_raw_cbufs(worker, queue, 1)[0];
        Ok(CmdBuffer::new(self.clone(), raw, worker, queue))
    }

    /// Free a command buffer.
    ///
    /// Waits for the GPU to go idle so the transient blocks it leased
    /// can go straight back to the pools for reuse.
    pub fn free_cmd_buffer(&self, cbuf: CmdBuffer) {
        self.wait_idle();

        let (raw, worker, queue, ubo, vbo, ibo) = cbuf.into_parts();

        self.free_raw_cbuf(worker, queue, raw);

        let mut internal = self.d_internal.write().unwrap();
        for block in ubo {
            internal.ubo_pool.recycle(block);
        }
        for block in vbo {
            internal.vbo_pool.recycle(block);
        }
        for block in ibo {
            internal.ibo_pool.recycle(block);
        }
    }

    /// Carve `size` bytes out of the transient pool of the given kind.
    ///
    /// `blocks` is the command buffer's lease list. The last leased
    /// block is bumped if it fits, otherwise a new block is leased
    /// under the device lock and pushed.
    pub(crate) fn alloc_transient(
        &self,
        kind: TransientKind,
        blocks: &mut Vec<BufferBlock>,
        size: u64,
    ) -> BlockAllocation {
        if let Some(block) = blocks.last_mut() {
            if let Some(alloc) = block.allocate(size) {
                return alloc;
            }
        }

        let mut internal = self.d_internal.write().unwrap();
        let pool = match kind {
            TransientKind::Ubo => &mut internal.ubo_pool,
            TransientKind::Vbo => &mut internal.vbo_pool,
            TransientKind::Ibo => &mut internal.ibo_pool,
        };
        let mut block = pool
            .lease(&self.dev, &self.mem_props, size)
            .expect("Could not grow the transient buffer pool");
        let alloc = block
            .allocate(size)
            .expect("Freshly leased block must fit the allocation");
        blocks.push(block);

        alloc
    }

    /// Submits a command buffer to a queue.
    ///
    /// Queue submission is externally synchronized so it happens under
    /// the device lock.
    pub(crate) fn submit_raw(
        &self,
        cbuf: vk::CommandBuffer,
        queue: QueueType,
        wait_semas: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semas: &[vk::Semaphore],
        fence: vk::Fence,
    ) {
        assert!(wait_semas.len() == wait_stages.len());

        let cbufs = [cbuf];
        let submit_info = [vk::SubmitInfo::builder()
            .wait_semaphores(wait_semas)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(&cbufs)
            .signal_semaphores(signal_semas)
            .build()];

        let _internal = self.d_internal.write().unwrap();
        unsafe {
            self.dev
                .queue_submit(self.queue(queue), &submit_info, fence)
                .expect("Could not submit buffer to queue");
        }
    }

    /// Writes `data` to `memory` at `offset`
    ///
    /// This is a helper for mapping and updating the value stored
    /// in device memory. Memory needs to be host visible and coherent.
    pub(crate) fn update_memory<T: Copy>(&self, memory: vk::DeviceMemory, offset: u64, data: &[T]) {
        if data.len() == 0 {
            return;
        }

        let data_size = std::mem::size_of_val(data) as u64;
        unsafe {
            let ptr = self
                .dev
                .map_memory(memory, offset, data_size, vk::MemoryMapFlags::empty())
                .unwrap();

            // rust doesn't have a raw memcpy, so we need to transform the void
            // ptr to a slice. This is unsafe as the length needs to be correct
            let dst = std::slice::from_raw_parts_mut(ptr as *mut T, data.len());
            dst.copy_from_slice(data);

            self.dev.unmap_memory(memory);
        }
    }

    /// One-shot staged upload into a device local buffer.
    ///
    /// Copies through a throwaway staging buffer on the transfer queue
    /// and blocks on a dedicated fence until the copy lands.
    pub fn transfer_to_buffer<T: Copy>(
        &self,
        worker: WorkerId,
        buffer: &Buffer,
        offset: u64,
        data: &[T],
    ) {
        let size = std::mem::size_of_val(data) as u64;
        let (staging, staging_mem) = self.create_buffer_raw(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            size,
        );
        self.update_memory(staging_mem, 0, data);

        self.one_shot_transfer(worker, |dev, cbuf| unsafe {
            let region = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(offset)
                .size(size)
                .build();
            dev.cmd_copy_buffer(cbuf, staging, buffer.b_buffer, &[region]);
        });

        unsafe {
            self.dev.destroy_buffer(staging, None);
            self.dev.free_memory(staging_mem, None);
        }
    }

    /// One-shot staged upload of pixel data into an image.
    ///
    /// Transitions the whole image to transfer-dst, copies the tightly
    /// packed `data` into the given mip/layer, then transitions to
    /// shader-read. Compressed block formats pass row counts in blocks.
    pub fn transfer_to_image<T: Copy>(
        &self,
        worker: WorkerId,
        image: &mut Image,
        mip_level: u32,
        array_layer: u32,
        data: &[T],
    ) {
        let size = std::mem::size_of_val(data) as u64;
        let (staging, staging_mem) = self.create_buffer_raw(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            size,
        );
        self.update_memory(staging_mem, 0, data);

        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(image.i_aspect)
            .base_mip_level(0)
            .level_count(image.i_mip_count)
            .base_array_layer(0)
            .layer_count(image.i_layer_count)
            .build();

        let vk_image = image.i_image;
        let aspect = image.i_aspect;
        let extent = vk::Extent3D {
            width: std::cmp::max(1, image.i_extent.width >> mip_level),
            height: std::cmp::max(1, image.i_extent.height >> mip_level),
            depth: image.i_depth,
        };

        self.one_shot_transfer(worker, |dev, cbuf| unsafe {
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .image(vk_image)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .subresource_range(subresource_range)
                .build();
            dev.cmd_pipeline_barrier(
                cbuf,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                // 0 means tightly packed
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(aspect)
                        .mip_level(mip_level)
                        .base_array_layer(array_layer)
                        .layer_count(1)
                        .build(),
                )
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(extent)
                .build();
            dev.cmd_copy_buffer_to_image(
                cbuf,
                staging,
                vk_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_shader = vk::ImageMemoryBarrier::builder()
                .image(vk_image)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .subresource_range(subresource_range)
                .build();
            dev.cmd_pipeline_barrier(
                cbuf,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        });

        image.i_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        unsafe {
            self.dev.destroy_buffer(staging, None);
            self.dev.free_memory(staging_mem, None);
        }
    }

    /// Record and submit a transfer queue command buffer, waiting on a
    /// dedicated fence for it to complete.
    fn one_shot_transfer<F: FnOnce(&ash::Device, vk::CommandBuffer)>(
        &self,
        worker: WorkerId,
        record: F,
    ) {
        let cbuf = self.allocate_raw_cbufs(worker, QueueType::Transfer, 1)[0];

        unsafe {
            let fence_info = vk::FenceCreateInfo::builder().build();
            let fence = self.dev.create_fence(&fence_info, None).unwrap();

            let record_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.dev
                .begin_command_buffer(cbuf, &record_info)
                .expect("Could not start command buffer");

            record(&self.dev, cbuf);

            self.dev
                .end_command_buffer(cbuf)
                .expect("Could not end command buffer");

            self.submit_raw(cbuf, QueueType::Transfer, &[], &[], &[], fence);

            self.dev
                .wait_for_fences(&[fence], true, u64::MAX)
                .expect("Could not wait for transfer fence");
            self.dev.destroy_fence(fence, None);
        }

        self.free_raw_cbuf(worker, QueueType::Transfer, cbuf);
    }

    /// Allocates a buffer/memory pair of size `size`.
    ///
    /// This does not fill the buffer with anything.
    pub(crate) fn create_buffer_raw(
        &self,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
        size: u64,
    ) -> (vk::Buffer, vk::DeviceMemory) {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let buffer = unsafe { self.dev.create_buffer(&create_info, None).unwrap() };
        let req = unsafe { self.dev.get_buffer_memory_requirements(buffer) };
        // find the memory type that best suits our requirements
        let index = find_memory_type_index(&self.mem_props, &req, flags).unwrap();

        let alloc_info = vk::MemoryAllocateInfo {
            allocation_size: req.size,
            memory_type_index: index,
            ..Default::default()
        };

        let memory = unsafe { self.dev.allocate_memory(&alloc_info, None).unwrap() };
        unsafe { self.dev.bind_buffer_memory(buffer, memory, 0).unwrap() };

        return (buffer, memory);
    }

    /// Clear the descriptor caches for a new frame.
    ///
    /// Descriptor sets are content addressed within a frame only. The
    /// swapchain calls this from begin_frame once the frame fence has
    /// signaled; pages are retained, their hash maps are cleared.
    pub(crate) fn begin_descriptor_frame(&self) {
        let mut internal = self.d_internal.write().unwrap();
        for bucket in internal.pipeline_layouts.values_mut() {
            for entry in bucket.iter_mut() {
                for pool in entry.pools.iter_mut() {
                    pool.begin_frame();
                }
            }
        }
    }

    pub fn create_fence(&self) -> vk::Fence {
        let info = vk::FenceCreateInfo::builder().build();
        unsafe { self.dev.create_fence(&info, None).unwrap() }
    }

    pub fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.dev.destroy_fence(fence, None) };
    }

    pub fn wait_for_fence(&self, fence: vk::Fence) {
        unsafe {
            self.dev
                .wait_for_fences(&[fence], true, u64::MAX)
                .expect("Could not wait for fence");
            self.dev
                .reset_fences(&[fence])
                .expect("Could not reset fence");
        }
    }

    /// Submit a recorded command buffer on its queue, signaling
    /// `fence` when it completes. For standalone work outside the
    /// graph; the graph does its own semaphore chaining.
    pub fn submit(&self, cbuf: &CmdBuffer, fence: vk::Fence) {
        self.submit_raw(cbuf.cb_cbuf, cbuf.queue_type(), &[], &[], &[], fence);
    }

    /// Block until the GPU has finished all outstanding work
    pub fn wait_idle(&self) {
        let _internal = self.d_internal.write().unwrap();
        unsafe { self.dev.device_wait_idle().unwrap() };
    }
}

impl DeviceInternal {
    /// The command pool for a worker on a queue. Compute redirects to
    /// the graphics pools when the families are shared.
    pub(crate) fn cmd_pool(
        &self,
        worker: WorkerId,
        queue: QueueType,
        queues: &Queues,
    ) -> vk::CommandPool {
        match queue {
            QueueType::Graphics => self.graphics_cmd_pools[worker.0 as usize],
            QueueType::Compute => match queues.compute_family == queues.graphics_family {
                true => self.graphics_cmd_pools[worker.0 as usize],
                false => self.compute_cmd_pools[worker.0 as usize],
            },
            QueueType::Transfer => self.transfer_cmd_pools[worker.0 as usize],
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let mut internal = self.d_internal.write().unwrap();
        let internal = &mut *internal;

        unsafe {
            // first wait for the device to finish working
            self.dev.device_wait_idle().unwrap();

            internal.ubo_pool.destroy(&self.dev);
            internal.vbo_pool.destroy(&self.dev);
            internal.ibo_pool.destroy(&self.dev);

            for (_, bucket) in internal.pipeline_instances.drain() {
                for instance in bucket {
                    self.dev.destroy_pipeline(instance.pi_pipeline, None);
                }
            }

            for (_, bucket) in internal.pipeline_layouts.drain() {
                for mut entry in bucket {
                    for pool in entry.pools.iter_mut() {
                        pool.destroy(&self.dev);
                    }
                    entry.layout.destroy(&self.dev);
                }
            }

            for pool in internal
                .graphics_cmd_pools
                .drain(..)
                .chain(internal.compute_cmd_pools.drain(..))
                .chain(internal.transfer_cmd_pools.drain(..))
            {
                self.dev.destroy_command_pool(pool, None);
            }

            self.dev.destroy_device(None);
        }
    }
}
