// Command buffer recording and state tracking
//
// Binding calls are deferred: they only fill the set x binding
// descriptor matrix and the dynamic offset table. Descriptor sets are
// materialized in flush_descriptors right before a draw or dispatch,
// and only for sets whose contents or offsets actually changed since
// the last flush. That collapses redundant set bindings and lets a
// hundred draws differing only in a uniform update share one set.

use ash::vk;

use crate::bufferpool::BufferBlock;
use crate::buffer::Buffer;
use crate::descpool::{hash_descriptors, Descriptor};
use crate::device::TransientKind;
use crate::graph::RenderPassState;
use crate::image::Image;
use crate::pipeline::{Pipeline, PipelineInstance};
use crate::sampler::Sampler;
use crate::{Device, QueueType, WorkerId, MAX_DESCRIPTOR_BINDINGS, MAX_DESCRIPTOR_SETS};

use fxhash::FxHasher64;
use std::hash::Hasher;
use std::sync::Arc;

/// A buffer region to copy to or from
pub struct BufferCopyView<'a> {
    pub buffer: &'a Buffer,
    pub offset: u64,
    /// row counts are in texels, or blocks for compressed formats;
    /// zero means tightly packed
    pub row_length: u32,
    pub image_height: u32,
}

/// An image subresource to copy to or from
pub struct ImageCopyView<'a> {
    pub image: &'a Image,
    pub mip_level: u32,
    pub array_layer: u32,
    pub offset: vk::Offset3D,
}

/// A recording command buffer
///
/// Owns the transient buffer blocks it leases for uniform and
/// vertex/index data; they go back to the device pools when this is
/// freed through Device::free_cmd_buffer.
pub struct CmdBuffer {
    cb_dev: Arc<Device>,
    pub(crate) cb_cbuf: vk::CommandBuffer,
    cb_worker: WorkerId,
    cb_queue_type: QueueType,

    cb_bound: Option<Arc<PipelineInstance>>,
    cb_current_pass: Option<RenderPassState>,
    cb_viewport: vk::Viewport,

    cb_descriptors: [[Descriptor; MAX_DESCRIPTOR_BINDINGS]; MAX_DESCRIPTOR_SETS],
    cb_dynamic_offsets: [[u32; MAX_DESCRIPTOR_BINDINGS]; MAX_DESCRIPTOR_SETS],
    /// hash of the last materialized descriptor contents, per set
    cb_set_hashes: [u64; MAX_DESCRIPTOR_SETS],
    /// hash of the last bound dynamic offsets, per set
    cb_offset_hashes: [u64; MAX_DESCRIPTOR_SETS],

    cb_ubo_blocks: Vec<BufferBlock>,
    cb_vbo_blocks: Vec<BufferBlock>,
    cb_ibo_blocks: Vec<BufferBlock>,
}

impl CmdBuffer {
    pub(crate) fn new(
        dev: Arc<Device>,
        cbuf: vk::CommandBuffer,
        worker: WorkerId,
        queue: QueueType,
    ) -> Self {
        Self {
            cb_dev: dev,
            cb_cbuf: cbuf,
            cb_worker: worker,
            cb_queue_type: queue,
            cb_bound: None,
            cb_current_pass: None,
            cb_viewport: vk::Viewport::default(),
            cb_descriptors: [[Descriptor::Empty; MAX_DESCRIPTOR_BINDINGS]; MAX_DESCRIPTOR_SETS],
            cb_dynamic_offsets: [[0; MAX_DESCRIPTOR_BINDINGS]; MAX_DESCRIPTOR_SETS],
            cb_set_hashes: [0; MAX_DESCRIPTOR_SETS],
            cb_offset_hashes: [0; MAX_DESCRIPTOR_SETS],
            cb_ubo_blocks: Vec::new(),
            cb_vbo_blocks: Vec::new(),
            cb_ibo_blocks: Vec::new(),
        }
    }

    /// Tear the command buffer apart for Device::free_cmd_buffer
    pub(crate) fn into_parts(
        self,
    ) -> (
        vk::CommandBuffer,
        WorkerId,
        QueueType,
        Vec<BufferBlock>,
        Vec<BufferBlock>,
        Vec<BufferBlock>,
    ) {
        (
            self.cb_cbuf,
            self.cb_worker,
            self.cb_queue_type,
            self.cb_ubo_blocks,
            self.cb_vbo_blocks,
            self.cb_ibo_blocks,
        )
    }

    pub(crate) fn queue_type(&self) -> QueueType {
        self.cb_queue_type
    }

    /// Reset and start recording.
    pub fn begin(&mut self) {
        unsafe {
            self.cb_dev
                .dev
                .reset_command_buffer(self.cb_cbuf, vk::CommandBufferResetFlags::empty())
                .expect("Could not reset command buffer");

            let record_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
            self.cb_dev
                .dev
                .begin_command_buffer(self.cb_cbuf, &record_info)
                .expect("Could not start command buffer");
        }
    }

    /// Finish recording.
    ///
    /// Binding state is cleared and the leased blocks rewound so the
    /// next recording into this buffer starts fresh. The blocks stay
    /// leased; the frame fences keep the GPU ahead of any rewrite.
    pub fn end(&mut self) {
        unsafe {
            self.cb_dev
                .dev
                .end_command_buffer(self.cb_cbuf)
                .expect("Could not end command buffer");
        }

        self.cb_bound = None;
        self.cb_current_pass = None;
        self.cb_set_hashes = [0; MAX_DESCRIPTOR_SETS];
        self.cb_offset_hashes = [0; MAX_DESCRIPTOR_SETS];
        self.cb_viewport = vk::Viewport::default();

        for block in self
            .cb_ubo_blocks
            .iter_mut()
            .chain(self.cb_vbo_blocks.iter_mut())
            .chain(self.cb_ibo_blocks.iter_mut())
        {
            block.reset();
        }
    }

    /// Begin a render pass with the given framebuffer and clears.
    /// The viewport and scissor are seeded from the attachment extent.
    pub(crate) fn begin_render_pass(
        &mut self,
        pass: &RenderPassState,
        framebuffer: vk::Framebuffer,
        clear_values: &[vk::ClearValue],
    ) {
        self.cb_current_pass = Some(*pass);

        let pass_begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.rp_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pass.rp_extent,
            })
            .clear_values(clear_values);

        unsafe {
            self.cb_dev.dev.cmd_begin_render_pass(
                self.cb_cbuf,
                &pass_begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        self.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: pass.rp_extent.width as f32,
            height: pass.rp_extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        self.set_scissor(0, 0, pass.rp_extent.width, pass.rp_extent.height);
    }

    pub(crate) fn end_render_pass(&mut self) {
        self.cb_current_pass = None;
        unsafe { self.cb_dev.dev.cmd_end_render_pass(self.cb_cbuf) };
    }

    /// Emit a batch of pipeline barriers at a pass boundary.
    pub(crate) fn pipeline_barriers(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier],
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.cb_dev.dev.cmd_pipeline_barrier(
                self.cb_cbuf,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                buffer_barriers,
                image_barriers,
            );
        }
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.cb_viewport = viewport;
        unsafe {
            self.cb_dev
                .dev
                .cmd_set_viewport(self.cb_cbuf, 0, &[viewport]);
        }
    }

    pub fn get_viewport(&self) -> vk::Viewport {
        self.cb_viewport
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: x, y: y },
            extent: vk::Extent2D {
                width: width,
                height: height,
            },
        };
        unsafe { self.cb_dev.dev.cmd_set_scissor(self.cb_cbuf, 0, &[scissor]) };
    }

    /// Bind a pipeline, materializing the concrete instance for the
    /// current render pass compatibility (graphics) or the pipeline
    /// itself (compute). Clears all deferred binding state.
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        self.cb_descriptors =
            [[Descriptor::Empty; MAX_DESCRIPTOR_BINDINGS]; MAX_DESCRIPTOR_SETS];
        self.cb_dynamic_offsets = [[0; MAX_DESCRIPTOR_BINDINGS]; MAX_DESCRIPTOR_SETS];
        self.cb_set_hashes = [0; MAX_DESCRIPTOR_SETS];
        self.cb_offset_hashes = [0; MAX_DESCRIPTOR_SETS];

        let instance = match pipeline.p_bind_point {
            vk::PipelineBindPoint::GRAPHICS => {
                let pass = self
                    .cb_current_pass
                    .as_ref()
                    .expect("Graphics pipelines must be bound inside a render pass");
                self.cb_dev.request_graphics_pipeline_instance(pipeline, pass)
            }
            _ => self.cb_dev.request_compute_pipeline_instance(pipeline),
        };

        unsafe {
            self.cb_dev.dev.cmd_bind_pipeline(
                self.cb_cbuf,
                instance.pi_bind_point,
                instance.pi_pipeline,
            );
        }
        self.cb_bound = Some(instance);
    }

    /// Copy uniform data into a fresh transient sub-range and point
    /// the binding's descriptor at it.
    ///
    /// The sub-range's offset becomes the binding's dynamic offset, so
    /// repeated binds of the same set shape only change offsets and
    /// reuse the cached descriptor set.
    pub fn bind_uniform<T: Copy>(&mut self, data: &T, set: u32, binding: u32) {
        assert!((set as usize) < MAX_DESCRIPTOR_SETS);
        assert!((binding as usize) < MAX_DESCRIPTOR_BINDINGS);

        let size = std::mem::size_of::<T>() as u64;
        let alloc = self
            .cb_dev
            .alloc_transient(TransientKind::Ubo, &mut self.cb_ubo_blocks, size);

        unsafe {
            std::ptr::copy_nonoverlapping(
                data as *const T as *const u8,
                alloc.ba_mapping,
                size as usize,
            );
        }

        self.cb_dynamic_offsets[set as usize][binding as usize] = alloc.ba_offset as u32;
        self.cb_descriptors[set as usize][binding as usize] = Descriptor::Buffer(
            vk::DescriptorBufferInfo::builder()
                .buffer(alloc.ba_buffer)
                .offset(0)
                .range(alloc.ba_padded_size)
                .build(),
        );
    }

    /// Point a binding's descriptor at an image view.
    ///
    /// Depth images are referenced in their read-only depth layout,
    /// everything else as shader-read-only.
    pub fn bind_image(&mut self, image: &Image, set: u32, binding: u32) {
        assert!((set as usize) < MAX_DESCRIPTOR_SETS);
        assert!((binding as usize) < MAX_DESCRIPTOR_BINDINGS);

        let layout = match image.i_aspect.contains(vk::ImageAspectFlags::DEPTH) {
            true => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            false => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };

        self.cb_descriptors[set as usize][binding as usize] = Descriptor::Image(
            vk::DescriptorImageInfo::builder()
                .image_view(image.i_view)
                .image_layout(layout)
                .build(),
        );
    }

    /// Set the sampler of a binding slot, preserving an already bound
    /// image view so image + sampler can be bound in either order for
    /// combined bindings.
    pub fn bind_sampler(&mut self, sampler: &Sampler, set: u32, binding: u32) {
        assert!((set as usize) < MAX_DESCRIPTOR_SETS);
        assert!((binding as usize) < MAX_DESCRIPTOR_BINDINGS);

        let slot = &mut self.cb_descriptors[set as usize][binding as usize];
        match slot {
            Descriptor::Image(info) => info.sampler = sampler.s_sampler,
            _ => {
                *slot = Descriptor::Image(
                    vk::DescriptorImageInfo::builder()
                        .sampler(sampler.s_sampler)
                        .build(),
                );
            }
        }
    }

    /// Bind an image and sampler together for a combined binding.
    pub fn bind_image_sampler(
        &mut self,
        image: &Image,
        sampler: &Sampler,
        set: u32,
        binding: u32,
    ) {
        self.bind_image(image, set, binding);
        self.bind_sampler(sampler, set, binding);
    }

    /// Point a binding's descriptor at a storage buffer.
    pub fn bind_storage_buffer(&mut self, buffer: &Buffer, set: u32, binding: u32) {
        assert!((set as usize) < MAX_DESCRIPTOR_SETS);
        assert!((binding as usize) < MAX_DESCRIPTOR_BINDINGS);

        self.cb_descriptors[set as usize][binding as usize] = Descriptor::Buffer(
            vk::DescriptorBufferInfo::builder()
                .buffer(buffer.b_buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)
                .build(),
        );
    }

    pub fn bind_vertex_buffer(&self, buffer: &Buffer, offset: u64) {
        unsafe {
            self.cb_dev
                .dev
                .cmd_bind_vertex_buffers(self.cb_cbuf, 0, &[buffer.b_buffer], &[offset]);
        }
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer, index_type: vk::IndexType, offset: u64) {
        unsafe {
            self.cb_dev
                .dev
                .cmd_bind_index_buffer(self.cb_cbuf, buffer.b_buffer, offset, index_type);
        }
    }

    /// Copy an immediate vertex stream into transient space and bind
    /// the sub-range. The block stays leased until this command buffer
    /// is freed.
    pub fn bind_vertex_data<T: Copy>(&mut self, data: &[T]) {
        let size = std::mem::size_of_val(data) as u64;
        let alloc = self
            .cb_dev
            .alloc_transient(TransientKind::Vbo, &mut self.cb_vbo_blocks, size);

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr() as *const u8,
                alloc.ba_mapping,
                size as usize,
            );
            self.cb_dev.dev.cmd_bind_vertex_buffers(
                self.cb_cbuf,
                0,
                &[alloc.ba_buffer],
                &[alloc.ba_offset],
            );
        }
    }

    /// Copy immediate index data into transient space and bind it.
    pub fn bind_index_data<T: Copy>(&mut self, data: &[T], index_type: vk::IndexType) {
        let size = std::mem::size_of_val(data) as u64;
        let alloc = self
            .cb_dev
            .alloc_transient(TransientKind::Ibo, &mut self.cb_ibo_blocks, size);

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr() as *const u8,
                alloc.ba_mapping,
                size as usize,
            );
            self.cb_dev.dev.cmd_bind_index_buffer(
                self.cb_cbuf,
                alloc.ba_buffer,
                alloc.ba_offset,
                index_type,
            );
        }
    }

    /// Update push constants across every range the bound pipeline's
    /// layout declares.
    pub fn push_constants<T: Copy>(&self, data: &T) {
        let instance = self
            .cb_bound
            .as_ref()
            .expect("A pipeline must be bound before pushing constants");

        unsafe {
            let bytes = std::slice::from_raw_parts(
                data as *const T as *const u8,
                std::mem::size_of::<T>(),
            );
            for range in instance.pi_layout.pl_push_constants.iter() {
                let end = std::cmp::min(bytes.len(), (range.offset + range.size) as usize);
                self.cb_dev.dev.cmd_push_constants(
                    self.cb_cbuf,
                    instance.pi_layout.pl_layout,
                    range.stage_flags,
                    range.offset,
                    &bytes[range.offset as usize..end],
                );
            }
        }
    }

    /// Materialize and bind descriptor sets for the bound pipeline.
    ///
    /// For each set in the layout: hash the bound descriptor slots and
    /// the dynamic offsets of its dynamic uniform bindings. Sets whose
    /// hashes match the last flush are skipped entirely; everything
    /// else is fetched from the content addressed pool and rebound
    /// with the current offsets.
    fn flush_descriptors(&mut self) {
        let instance = self
            .cb_bound
            .as_ref()
            .expect("A pipeline must be bound before drawing")
            .clone();
        let layout = &instance.pi_layout;

        for (i, set) in layout.pl_sets.iter().enumerate() {
            if set.bindings.is_empty() {
                continue;
            }
            let binding_count = set
                .bindings
                .iter()
                .map(|b| b.binding + 1)
                .max()
                .unwrap() as usize;

            let descriptors_hash = hash_descriptors(&self.cb_descriptors[i][0..binding_count]);

            // gather dynamic offsets in binding order
            let mut dynamic_offsets: Vec<u32> = Vec::new();
            let mut offset_hasher = FxHasher64::default();
            for binding in set.bindings.iter() {
                if binding.descriptor_type == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC {
                    let offset = self.cb_dynamic_offsets[i][binding.binding as usize];
                    offset_hasher.write_u32(offset);
                    dynamic_offsets.push(offset);
                }
            }
            let offset_hash = offset_hasher.finish();

            if self.cb_set_hashes[i] == descriptors_hash
                && (dynamic_offsets.is_empty() || self.cb_offset_hashes[i] == offset_hash)
            {
                continue;
            }
            self.cb_set_hashes[i] = descriptors_hash;
            self.cb_offset_hashes[i] = offset_hash;

            let desc_set = {
                let mut internal = self.cb_dev.d_internal.write().unwrap();
                let entry = internal
                    .pipeline_layouts
                    .get_mut(&layout.pl_hash)
                    .and_then(|bucket| {
                        bucket.iter_mut().find(|e| Arc::ptr_eq(&e.layout, layout))
                    })
                    .expect("Pipeline layout must have descriptor pools");
                entry.pools[i].alloc(
                    &self.cb_dev.dev,
                    &self.cb_descriptors[i][0..binding_count],
                    descriptors_hash,
                )
            };

            unsafe {
                self.cb_dev.dev.cmd_bind_descriptor_sets(
                    self.cb_cbuf,
                    instance.pi_bind_point,
                    layout.pl_layout,
                    i as u32,
                    &[desc_set],
                    dynamic_offsets.as_slice(),
                );
            }
        }
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.flush_descriptors();
        unsafe {
            self.cb_dev.dev.cmd_draw(
                self.cb_cbuf,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.flush_descriptors();
        unsafe {
            self.cb_dev.dev.cmd_draw_indexed(
                self.cb_cbuf,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.flush_descriptors();
        unsafe {
            self.cb_dev
                .dev
                .cmd_dispatch(self.cb_cbuf, group_count_x, group_count_y, group_count_z);
        }
    }

    pub fn copy_buffer_to_buffer(
        &self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        let region = vk::BufferCopy::builder()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size)
            .build();
        unsafe {
            self.cb_dev
                .dev
                .cmd_copy_buffer(self.cb_cbuf, src.b_buffer, dst.b_buffer, &[region]);
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        src: &BufferCopyView,
        dst: &ImageCopyView,
        extent: vk::Extent3D,
    ) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(src.offset)
            .buffer_row_length(src.row_length)
            .buffer_image_height(src.image_height)
            .image_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(dst.image.i_aspect)
                    .mip_level(dst.mip_level)
                    .base_array_layer(dst.array_layer)
                    .layer_count(1)
                    .build(),
            )
            .image_offset(dst.offset)
            .image_extent(extent)
            .build();

        unsafe {
            self.cb_dev.dev.cmd_copy_buffer_to_image(
                self.cb_cbuf,
                src.buffer.b_buffer,
                dst.image.i_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    pub fn copy_image_to_buffer(
        &self,
        src: &ImageCopyView,
        dst: &BufferCopyView,
        extent: vk::Extent3D,
    ) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(dst.offset)
            .buffer_row_length(dst.row_length)
            .buffer_image_height(dst.image_height)
            .image_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(src.image.i_aspect)
                    .mip_level(src.mip_level)
                    .base_array_layer(src.array_layer)
                    .layer_count(1)
                    .build(),
            )
            .image_offset(src.offset)
            .image_extent(extent)
            .build();

        unsafe {
            self.cb_dev.dev.cmd_copy_image_to_buffer(
                self.cb_cbuf,
                src.image.i_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.buffer.b_buffer,
                &[region],
            );
        }
    }

    pub fn copy_image_to_image(
        &self,
        src: &ImageCopyView,
        dst: &ImageCopyView,
        extent: vk::Extent3D,
    ) {
        let region = vk::ImageCopy::builder()
            .src_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(src.image.i_aspect)
                    .mip_level(src.mip_level)
                    .base_array_layer(src.array_layer)
                    .layer_count(1)
                    .build(),
            )
            .src_offset(src.offset)
            .dst_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(dst.image.i_aspect)
                    .mip_level(dst.mip_level)
                    .base_array_layer(dst.array_layer)
                    .layer_count(1)
                    .build(),
            )
            .dst_offset(dst.offset)
            .extent(extent)
            .build();

        unsafe {
            self.cb_dev.dev.cmd_copy_image(
                self.cb_cbuf,
                src.image.i_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.image.i_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    pub fn fill_buffer(&self, buffer: &Buffer, offset: u64, range: u64, data: u32) {
        unsafe {
            self.cb_dev
                .dev
                .cmd_fill_buffer(self.cb_cbuf, buffer.b_buffer, offset, range, data);
        }
    }
}
