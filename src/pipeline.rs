// Pipelines and the layout / instance caches
//
// A Pipeline is only a hashable description: SPIR-V blobs plus fixed
// function state. Concrete vkPipelines are materialized lazily per
// render pass compatibility and cached on the device. Pipeline layouts
// are deduplicated across pipelines by the hash of their combined set
// layouts and refcounted so two pipelines with the same interface
// share one layout and one family of descriptor pools.

use ash::vk;
use fxhash::FxHasher64;

use crate::descpool::{DescPool, DescriptorData};
use crate::device::LayoutEntry;
use crate::graph::RenderPassState;
use crate::shader::{SetInfo, Shader, VertexAttribute};
use crate::{Device, Result, StratusError};

use std::hash::Hasher;
use std::sync::Arc;

/// Fixed function state for a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsPipelineInfo {
    pub blending: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_bias: bool,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
}

impl Default for GraphicsPipelineInfo {
    fn default() -> Self {
        Self {
            blending: false,
            depth_test: false,
            depth_write: false,
            depth_bias: false,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
        }
    }
}

/// A pipeline description
///
/// Created from SPIR-V, destroyed explicitly through
/// Device::destroy_pipeline. The concrete vkPipeline objects derived
/// from this are owned by the device's instance cache.
pub struct Pipeline {
    pub(crate) p_bind_point: vk::PipelineBindPoint,
    pub(crate) p_info: GraphicsPipelineInfo,
    pub(crate) p_shaders: Vec<Shader>,
    pub(crate) p_hash: u64,
    pub(crate) p_layout: Arc<PipelineLayout>,
}

/// The shared interface of one or more pipelines: combined set
/// layouts, push constant ranges, descriptor update templates.
///
/// Owned by the device's layout cache, shared out by Arc. Destruction
/// is refcounted through the cache, not through Drop.
pub(crate) struct PipelineLayout {
    pub(crate) pl_layout: vk::PipelineLayout,
    pub(crate) pl_sets: Vec<SetInfo>,
    pub(crate) pl_set_layouts: Vec<vk::DescriptorSetLayout>,
    pub(crate) pl_update_templates: Vec<vk::DescriptorUpdateTemplate>,
    pub(crate) pl_push_constants: Vec<vk::PushConstantRange>,
    pub(crate) pl_hash: u64,
}

/// A concrete vkPipeline specialized to one render pass compatibility
pub(crate) struct PipelineInstance {
    pub(crate) pi_pipeline: vk::Pipeline,
    pub(crate) pi_bind_point: vk::PipelineBindPoint,
    pub(crate) pi_layout: Arc<PipelineLayout>,
    /// the (pipeline, compat) pair is the cache's full key; the xor of
    /// the two only selects the bucket
    pub(crate) pi_pipeline_hash: u64,
    pub(crate) pi_compat_hash: u64,
}

impl PipelineLayout {
    /// Explicit destructor, called by the cache when the last
    /// reference is released.
    pub(crate) fn destroy(&self, dev: &ash::Device) {
        unsafe {
            for template in self.pl_update_templates.iter() {
                dev.destroy_descriptor_update_template(*template, None);
            }
            for layout in self.pl_set_layouts.iter() {
                dev.destroy_descriptor_set_layout(*layout, None);
            }
            dev.destroy_pipeline_layout(self.pl_layout, None);
        }
    }
}

/// Full-key equality for the layout cache: a hash hit only counts if
/// the combined bindings and push constant ranges actually match, a
/// colliding hash is treated as a miss.
fn layout_key_eq(
    layout: &PipelineLayout,
    sets: &[SetInfo],
    push_constants: &[vk::PushConstantRange],
) -> bool {
    let binding_eq = |a: &vk::DescriptorSetLayoutBinding, b: &vk::DescriptorSetLayoutBinding| {
        a.binding == b.binding
            && a.descriptor_type == b.descriptor_type
            && a.descriptor_count == b.descriptor_count
            && a.stage_flags == b.stage_flags
    };
    let range_eq = |a: &vk::PushConstantRange, b: &vk::PushConstantRange| {
        a.stage_flags == b.stage_flags && a.offset == b.offset && a.size == b.size
    };

    layout.pl_sets.len() == sets.len()
        && layout.pl_push_constants.len() == push_constants.len()
        && layout.pl_sets.iter().zip(sets.iter()).all(|(x, y)| {
            x.index == y.index
                && x.bindings.len() == y.bindings.len()
                && x.bindings
                    .iter()
                    .zip(y.bindings.iter())
                    .all(|(a, b)| binding_eq(a, b))
        })
        && layout
            .pl_push_constants
            .iter()
            .zip(push_constants.iter())
            .all(|(a, b)| range_eq(a, b))
}

/// Merge the per-shader set tables into the pipeline's combined set
/// layouts: union of bindings by index, OR of stage flags. Shaders
/// disagreeing on a binding's type or count is an error.
pub(crate) fn combine_set_layouts(
    shaders: &[Shader],
) -> Result<(Vec<SetInfo>, Vec<vk::PushConstantRange>, u64)> {
    let mut push_constants: Vec<vk::PushConstantRange> = Vec::new();
    for shader in shaders {
        push_constants.extend_from_slice(&shader.sh_info.push_constants);
    }

    let set_count = shaders
        .iter()
        .flat_map(|s| s.sh_info.sets.iter())
        .map(|set| set.index + 1)
        .max()
        .unwrap_or(0);

    let mut sets: Vec<SetInfo> = (0..set_count)
        .map(|index| SetInfo {
            index: index,
            bindings: Vec::new(),
        })
        .collect();

    for shader in shaders {
        for shader_set in shader.sh_info.sets.iter() {
            let set = &mut sets[shader_set.index as usize];

            for sbinding in shader_set.bindings.iter() {
                match set
                    .bindings
                    .iter_mut()
                    .find(|b| b.binding == sbinding.binding)
                {
                    Some(binding) => {
                        if binding.descriptor_type != sbinding.descriptor_type
                            || binding.descriptor_count != sbinding.descriptor_count
                        {
                            return Err(StratusError::MISMATCHED_BINDING);
                        }
                        binding.stage_flags |= sbinding.stage_flags;
                    }
                    None => set.bindings.push(*sbinding),
                }
            }
        }
    }

    for set in sets.iter_mut() {
        set.bindings.sort_by_key(|b| b.binding);
    }

    let mut hasher = FxHasher64::default();
    for set in sets.iter() {
        for b in set.bindings.iter() {
            hasher.write_u32(b.binding);
            hasher.write_i32(b.descriptor_type.as_raw());
            hasher.write_u32(b.descriptor_count);
            hasher.write_u32(b.stage_flags.as_raw());
        }
    }
    for pc in push_constants.iter() {
        hasher.write_u32(pc.stage_flags.as_raw());
        hasher.write_u32(pc.offset);
        hasher.write_u32(pc.size);
    }

    Ok((sets, push_constants, hasher.finish()))
}

/// Hash of the pipeline description: code bytes plus the fixed
/// function state.
pub(crate) fn hash_pipeline(code: &[&[u8]], info: &GraphicsPipelineInfo) -> u64 {
    let mut hasher = FxHasher64::default();
    for blob in code {
        hasher.write(blob);
    }
    hasher.write_u8(info.blending as u8);
    hasher.write_u8(info.depth_test as u8);
    hasher.write_u8(info.depth_write as u8);
    hasher.write_u8(info.depth_bias as u8);
    hasher.write_u32(info.cull_mode.as_raw());
    hasher.write_i32(info.front_face.as_raw());
    hasher.write_u32(info.line_width.to_bits());

    hasher.finish()
}

/// The packed vertex input layout implied by the vertex shader's
/// attributes in location order.
pub(crate) fn vertex_input_description(
    attributes: &[VertexAttribute],
) -> (u32, Vec<vk::VertexInputAttributeDescription>) {
    let mut offset = 0;
    let mut descs = Vec::with_capacity(attributes.len());

    for (location, attr) in attributes.iter().enumerate() {
        descs.push(
            vk::VertexInputAttributeDescription::builder()
                .location(location as u32)
                .binding(0)
                .format(attr.format)
                .offset(offset)
                .build(),
        );
        offset += attr.size;
    }

    (offset, descs)
}

impl Device {
    /// Create a graphics pipeline description from vertex and fragment
    /// SPIR-V. No vkPipeline exists until the first draw against a
    /// render pass.
    pub fn create_graphics_pipeline(
        &self,
        vertex_code: &[u8],
        fragment_code: &[u8],
        info: &GraphicsPipelineInfo,
    ) -> Result<Pipeline> {
        let shaders = vec![
            Shader::new(self, vertex_code)?,
            Shader::new(self, fragment_code)?,
        ];
        let hash = hash_pipeline(&[vertex_code, fragment_code], info);
        let layout = self.request_pipeline_layout(&shaders)?;

        Ok(Pipeline {
            p_bind_point: vk::PipelineBindPoint::GRAPHICS,
            p_info: *info,
            p_shaders: shaders,
            p_hash: hash,
            p_layout: layout,
        })
    }

    /// Create a compute pipeline description from SPIR-V.
    pub fn create_compute_pipeline(&self, code: &[u8]) -> Result<Pipeline> {
        let shaders = vec![Shader::new(self, code)?];
        let hash = hash_pipeline(&[code], &GraphicsPipelineInfo::default());
        let layout = self.request_pipeline_layout(&shaders)?;

        Ok(Pipeline {
            p_bind_point: vk::PipelineBindPoint::COMPUTE,
            p_info: GraphicsPipelineInfo::default(),
            p_shaders: shaders,
            p_hash: hash,
            p_layout: layout,
        })
    }

    /// Destroy a pipeline description: its shader modules, any cached
    /// pipeline instances derived from it, and its reference on the
    /// shared layout.
    pub fn destroy_pipeline(&self, pipeline: Pipeline) {
        self.wait_idle();

        {
            let mut internal = self.d_internal.write().unwrap();

            for bucket in internal.pipeline_instances.values_mut() {
                for instance in bucket
                    .iter()
                    .filter(|i| i.pi_pipeline_hash == pipeline.p_hash)
                {
                    unsafe { self.dev.destroy_pipeline(instance.pi_pipeline, None) };
                }
                bucket.retain(|i| i.pi_pipeline_hash != pipeline.p_hash);
            }
            internal.pipeline_instances.retain(|_, bucket| !bucket.is_empty());
        }

        for shader in pipeline.p_shaders.iter() {
            shader.destroy(self);
        }

        self.release_pipeline_layout(&pipeline.p_layout);
    }

    /// Get the shared layout for this combination of shaders.
    ///
    /// On a cache hit the full key is compared and the refcount
    /// bumped; two pipelines with the same combined layouts share one
    /// layout and its descriptor pools.
    fn request_pipeline_layout(&self, shaders: &[Shader]) -> Result<Arc<PipelineLayout>> {
        let (sets, push_constants, hash) = combine_set_layouts(shaders)?;

        let mut internal = self.d_internal.write().unwrap();
        if let Some(bucket) = internal.pipeline_layouts.get_mut(&hash) {
            if let Some(entry) = bucket
                .iter_mut()
                .find(|e| layout_key_eq(&e.layout, &sets, &push_constants))
            {
                entry.refs += 1;
                return Ok(entry.layout.clone());
            }
        }

        // construct the set layouts
        let set_layouts: Vec<vk::DescriptorSetLayout> = sets
            .iter()
            .map(|set| {
                let info =
                    vk::DescriptorSetLayoutCreateInfo::builder().bindings(&set.bindings);
                unsafe { self.dev.create_descriptor_set_layout(&info, None).unwrap() }
            })
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constants);
        let vk_layout = unsafe { self.dev.create_pipeline_layout(&layout_info, None).unwrap() };

        // one update template per set, writing out of the command
        // buffer's descriptor slot array
        let stride = std::mem::size_of::<DescriptorData>();
        let update_templates: Vec<vk::DescriptorUpdateTemplate> = sets
            .iter()
            .enumerate()
            .map(|(i, set)| {
                let entries: Vec<vk::DescriptorUpdateTemplateEntry> = set
                    .bindings
                    .iter()
                    .map(|binding| {
                        vk::DescriptorUpdateTemplateEntry::builder()
                            .dst_binding(binding.binding)
                            .dst_array_element(0)
                            .descriptor_count(binding.descriptor_count)
                            .descriptor_type(binding.descriptor_type)
                            .offset(binding.binding as usize * stride)
                            .stride(stride)
                            .build()
                    })
                    .collect();

                let template_info = vk::DescriptorUpdateTemplateCreateInfo::builder()
                    .descriptor_update_entries(&entries)
                    .template_type(vk::DescriptorUpdateTemplateType::DESCRIPTOR_SET)
                    .descriptor_set_layout(set_layouts[i])
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .pipeline_layout(vk_layout)
                    .set(i as u32)
                    .build();

                unsafe {
                    self.dev
                        .create_descriptor_update_template(&template_info, None)
                        .unwrap()
                }
            })
            .collect();

        // one descriptor pool per set index
        let pools: Vec<DescPool> = sets
            .iter()
            .enumerate()
            .map(|(i, set)| {
                DescPool::new(&self.dev, set_layouts[i], update_templates[i], &set.bindings)
            })
            .collect();

        let layout = Arc::new(PipelineLayout {
            pl_layout: vk_layout,
            pl_sets: sets,
            pl_set_layouts: set_layouts,
            pl_update_templates: update_templates,
            pl_push_constants: push_constants,
            pl_hash: hash,
        });
        internal
            .pipeline_layouts
            .entry(hash)
            .or_default()
            .push(LayoutEntry {
                layout: layout.clone(),
                pools: pools,
                refs: 1,
            });

        Ok(layout)
    }

    /// Drop one reference on a shared layout, destroying it and its
    /// descriptor pools when the count hits zero.
    fn release_pipeline_layout(&self, layout: &Arc<PipelineLayout>) {
        let mut internal = self.d_internal.write().unwrap();

        let bucket = match internal.pipeline_layouts.get_mut(&layout.pl_hash) {
            Some(b) => b,
            None => return,
        };
        let pos = match bucket.iter().position(|e| Arc::ptr_eq(&e.layout, layout)) {
            Some(p) => p,
            None => return,
        };

        bucket[pos].refs -= 1;
        if bucket[pos].refs > 0 {
            return;
        }

        let mut entry = bucket.swap_remove(pos);
        let bucket_empty = bucket.is_empty();
        if bucket_empty {
            internal.pipeline_layouts.remove(&layout.pl_hash);
        }

        for pool in entry.pools.iter_mut() {
            pool.destroy(&self.dev);
        }
        entry.layout.destroy(&self.dev);
    }

    /// Materialize (or fetch) the concrete pipeline for this render
    /// pass compatibility. Cached under hash(pipeline) ^ hash(compat).
    pub(crate) fn request_graphics_pipeline_instance(
        &self,
        pipeline: &Pipeline,
        pass: &RenderPassState,
    ) -> Arc<PipelineInstance> {
        let key = pipeline.p_hash ^ pass.rp_compat_hash;

        {
            let internal = self.d_internal.read().unwrap();
            if let Some(bucket) = internal.pipeline_instances.get(&key) {
                if let Some(instance) = bucket.iter().find(|i| {
                    i.pi_pipeline_hash == pipeline.p_hash
                        && i.pi_compat_hash == pass.rp_compat_hash
                }) {
                    return instance.clone();
                }
            }
        }

        let vk_pipeline = self.create_graphics_instance(pipeline, pass);
        let instance = Arc::new(PipelineInstance {
            pi_pipeline: vk_pipeline,
            pi_bind_point: vk::PipelineBindPoint::GRAPHICS,
            pi_layout: pipeline.p_layout.clone(),
            pi_pipeline_hash: pipeline.p_hash,
            pi_compat_hash: pass.rp_compat_hash,
        });

        let mut internal = self.d_internal.write().unwrap();
        internal
            .pipeline_instances
            .entry(key)
            .or_default()
            .push(instance.clone());

        instance
    }

    /// Compute instances key on the pipeline hash alone.
    pub(crate) fn request_compute_pipeline_instance(
        &self,
        pipeline: &Pipeline,
    ) -> Arc<PipelineInstance> {
        let key = pipeline.p_hash;

        {
            let internal = self.d_internal.read().unwrap();
            if let Some(bucket) = internal.pipeline_instances.get(&key) {
                if let Some(instance) = bucket
                    .iter()
                    .find(|i| i.pi_pipeline_hash == pipeline.p_hash && i.pi_compat_hash == 0)
                {
                    return instance.clone();
                }
            }
        }

        let shader = &pipeline.p_shaders[0];
        let entry_name = std::ffi::CString::new("main").unwrap();
        let stage_info = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.sh_module)
            .name(&entry_name)
            .build();
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage_info)
            .layout(pipeline.p_layout.pl_layout)
            .build();

        let vk_pipeline = unsafe {
            self.dev
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .unwrap()[0]
        };

        let instance = Arc::new(PipelineInstance {
            pi_pipeline: vk_pipeline,
            pi_bind_point: vk::PipelineBindPoint::COMPUTE,
            pi_layout: pipeline.p_layout.clone(),
            pi_pipeline_hash: pipeline.p_hash,
            pi_compat_hash: 0,
        });

        let mut internal = self.d_internal.write().unwrap();
        internal
            .pipeline_instances
            .entry(key)
            .or_default()
            .push(instance.clone());

        instance
    }

    /// Build the concrete graphics pipeline against a render pass.
    fn create_graphics_instance(
        &self,
        pipeline: &Pipeline,
        pass: &RenderPassState,
    ) -> vk::Pipeline {
        let options = &pipeline.p_info;
        let entry_name = std::ffi::CString::new("main").unwrap();

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = pipeline
            .p_shaders
            .iter()
            .map(|shader| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(shader.sh_info.stage)
                    .module(shader.sh_module)
                    .name(&entry_name)
                    .build()
            })
            .collect();

        // the vertex layout comes from reflection, packed in location
        // order
        let vertex_shader = pipeline
            .p_shaders
            .iter()
            .find(|s| s.sh_info.stage == vk::ShaderStageFlags::VERTEX)
            .expect("Graphics pipeline must have a vertex shader");
        let (stride, attributes) =
            vertex_input_description(&vertex_shader.sh_info.vertex_attributes);

        let binding_descriptions = [vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(stride)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()];

        let mut vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();
        if stride > 0 {
            vertex_input_info = vertex_input_info
                .vertex_binding_descriptions(&binding_descriptions)
                .vertex_attribute_descriptions(&attributes);
        }
        let vertex_input_info = vertex_input_info.build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
            .build();

        // viewport and scissor are dynamic state, these are ignored
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: pass.rp_extent.width as f32,
            height: pass.rp_extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: pass.rp_extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors)
            .build();

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(options.line_width)
            .cull_mode(options.cull_mode)
            .front_face(options.front_face)
            .depth_bias_enable(options.depth_bias)
            .build();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(pass.rp_sample_count)
            .min_sample_shading(1.0)
            .build();

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(options.depth_test)
            .depth_write_enable(options.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .build();

        let blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(options.blending)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )
            .build();
        let blend_attachments: Vec<_> = std::iter::repeat(blend_attachment)
            .take(pass.rp_color_count as usize)
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments)
            .build();

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
            vk::DynamicState::DEPTH_BIAS,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(pipeline.p_layout.pl_layout)
            .render_pass(pass.rp_pass)
            .subpass(0)
            .build();

        unsafe {
            self.dev
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .unwrap()[0]
        }
    }
}
