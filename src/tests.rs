/// Stratus tests
///
/// These exercise the device independent halves of the core: SPIR-V
/// reflection, the graph schedule, the transient block arithmetic,
/// and the content hashing that backs the caches. Everything here
/// runs without a GPU.
use ash::vk;

use crate::bufferpool::{round_up, BufferBlock};
use crate::descpool::{hash_descriptors, Descriptor};
use crate::graph::{
    build_schedule, PassStage, ReadKind, ScheduleInput, SchedulePassDecl, ScheduleResourceDecl,
    WriteKind,
};
use crate::pipeline::{combine_set_layouts, hash_pipeline, vertex_input_description};
use crate::shader::{reflect_words, Shader, ShaderInfo};
use crate::{GraphicsPipelineInfo, QueueType, StratusError};

// ---------------------------------------------------------------
// SPIR-V assembly helpers

fn inst(op: u16, operands: &[u32]) -> Vec<u32> {
    let mut words = vec![(((operands.len() + 1) as u32) << 16) | op as u32];
    words.extend_from_slice(operands);
    words
}

fn module(instructions: &[Vec<u32>]) -> Vec<u32> {
    // magic, version 1.0, generator, bound, schema
    let mut words = vec![0x0723_0203, 0x0001_0000, 0, 100, 0];
    for i in instructions {
        words.extend_from_slice(i);
    }
    words
}

/// A vertex shader interface: a uniform block at (0, 0), a combined
/// image sampler at (0, 1), two vertex inputs, and a push constant
/// block of 20 bytes.
fn vertex_module() -> Vec<u32> {
    module(&[
        // OpEntryPoint Vertex %1 "main"
        inst(15, &[0, 1, 0x6e69616d, 0]),
        // decorations
        inst(71, &[6, 2]),      // %6 Block
        inst(71, &[8, 34, 0]),  // %8 DescriptorSet 0
        inst(71, &[8, 33, 0]),  // %8 Binding 0
        inst(72, &[6, 0, 35, 0]),  // member 0 Offset 0
        inst(72, &[6, 1, 35, 16]), // member 1 Offset 16
        inst(71, &[12, 34, 0]), // %12 DescriptorSet 0
        inst(71, &[12, 33, 1]), // %12 Binding 1
        inst(71, &[14, 30, 0]), // %14 Location 0
        inst(71, &[16, 30, 1]), // %16 Location 1
        inst(72, &[17, 0, 35, 0]),  // push constant member offsets
        inst(72, &[17, 1, 35, 16]),
        // types
        inst(22, &[2, 32]),    // %2 = float32
        inst(23, &[3, 2, 3]),  // %3 = vec3
        inst(23, &[4, 2, 2]),  // %4 = vec2
        inst(23, &[5, 2, 4]),  // %5 = vec4
        inst(30, &[6, 5, 2]),  // %6 = struct { vec4, float }
        inst(32, &[7, 2, 6]),  // %7 = ptr Uniform %6
        inst(59, &[7, 8, 2]),  // %8 = var Uniform
        inst(25, &[9, 2, 1, 0, 0, 0, 1, 0]), // %9 = image 2d sampled
        inst(27, &[10, 9]),    // %10 = sampled image
        inst(32, &[11, 0, 10]), // %11 = ptr UniformConstant %10
        inst(59, &[11, 12, 0]), // %12 = var UniformConstant
        inst(32, &[13, 1, 3]), // %13 = ptr Input vec3
        inst(59, &[13, 14, 1]), // %14 = var Input
        inst(32, &[15, 1, 4]), // %15 = ptr Input vec2
        inst(59, &[15, 16, 1]), // %16 = var Input
        inst(30, &[17, 5, 2]), // %17 = struct { vec4, float }
        inst(32, &[18, 9, 17]), // %18 = ptr PushConstant %17
        inst(59, &[18, 19, 9]), // %19 = var PushConstant
    ])
}

/// A fragment shader reading the same uniform block plus a storage
/// buffer at (1, 0).
fn fragment_module() -> Vec<u32> {
    module(&[
        // OpEntryPoint Fragment %1 "main"
        inst(15, &[4, 1, 0x6e69616d, 0]),
        inst(71, &[6, 2]),     // Block
        inst(71, &[8, 34, 0]), // set 0
        inst(71, &[8, 33, 0]), // binding 0
        inst(72, &[6, 0, 35, 0]),
        inst(72, &[6, 1, 35, 16]),
        inst(71, &[21, 3]),     // %21 BufferBlock
        inst(71, &[22, 34, 1]), // set 1
        inst(71, &[22, 33, 0]), // binding 0
        inst(22, &[2, 32]),
        inst(23, &[5, 2, 4]),
        inst(30, &[6, 5, 2]),
        inst(32, &[7, 2, 6]),
        inst(59, &[7, 8, 2]),
        inst(30, &[21, 5]),     // %21 = struct { vec4 }
        inst(32, &[23, 2, 21]), // ptr Uniform %21
        inst(59, &[23, 22, 2]), // var
    ])
}

/// A fragment shader whose push constant block starts past the bytes
/// another stage uses: a float at offset 32 and a vec4 at offset 48.
fn offset_push_constant_module() -> Vec<u32> {
    module(&[
        // OpEntryPoint Fragment %1 "main"
        inst(15, &[4, 1, 0x6e69616d, 0]),
        inst(72, &[6, 0, 35, 32]), // member 0 Offset 32
        inst(72, &[6, 1, 35, 48]), // member 1 Offset 48
        inst(22, &[2, 32]),        // %2 = float32
        inst(23, &[5, 2, 4]),      // %5 = vec4
        inst(30, &[6, 2, 5]),      // %6 = struct { float, vec4 }
        inst(32, &[7, 9, 6]),      // %7 = ptr PushConstant %6
        inst(59, &[7, 8, 9]),      // %8 = var PushConstant
    ])
}

fn shader_from_info(info: ShaderInfo) -> Shader {
    Shader {
        sh_module: vk::ShaderModule::null(),
        sh_info: info,
    }
}

// ---------------------------------------------------------------
// Reflection

#[test]
fn reflect_vertex_shader() {
    let info = reflect_words(&vertex_module()).unwrap();

    assert_eq!(info.stage, vk::ShaderStageFlags::VERTEX);

    assert_eq!(info.sets.len(), 1);
    let set = &info.sets[0];
    assert_eq!(set.index, 0);
    assert_eq!(set.bindings.len(), 2);

    // uniform blocks are promoted to dynamic
    assert_eq!(set.bindings[0].binding, 0);
    assert_eq!(
        set.bindings[0].descriptor_type,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
    );
    assert_eq!(set.bindings[0].descriptor_count, 1);
    assert_eq!(set.bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);

    assert_eq!(set.bindings[1].binding, 1);
    assert_eq!(
        set.bindings[1].descriptor_type,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    );

    // push constant block: vec4 at 0, float at 16
    assert_eq!(info.push_constants.len(), 1);
    assert_eq!(info.push_constants[0].offset, 0);
    assert_eq!(info.push_constants[0].size, 20);

    // inputs in location order with packed sizes
    assert_eq!(info.vertex_attributes.len(), 2);
    assert_eq!(info.vertex_attributes[0].format, vk::Format::R32G32B32_SFLOAT);
    assert_eq!(info.vertex_attributes[0].size, 12);
    assert_eq!(info.vertex_attributes[1].format, vk::Format::R32G32_SFLOAT);
    assert_eq!(info.vertex_attributes[1].size, 8);
}

#[test]
fn reflect_fragment_shader() {
    let info = reflect_words(&fragment_module()).unwrap();

    assert_eq!(info.stage, vk::ShaderStageFlags::FRAGMENT);
    assert_eq!(info.sets.len(), 2);
    assert_eq!(
        info.sets[1].bindings[0].descriptor_type,
        vk::DescriptorType::STORAGE_BUFFER
    );
    assert!(info.vertex_attributes.is_empty());
}

#[test]
fn push_constants_follow_member_offsets() {
    let info = reflect_words(&offset_push_constant_module()).unwrap();

    // the range starts at the block's lowest member offset, and the
    // size only covers the declared members: float at 32, vec4 ending
    // at 64
    assert_eq!(info.push_constants.len(), 1);
    assert_eq!(info.push_constants[0].offset, 32);
    assert_eq!(info.push_constants[0].size, 32);
    assert_eq!(info.push_constants[0].stage_flags, vk::ShaderStageFlags::FRAGMENT);
}

#[test]
fn reflect_rejects_garbage() {
    assert_eq!(
        reflect_words(&[1, 2, 3]).unwrap_err(),
        StratusError::INVALID_SPIRV
    );

    assert!(crate::shader::spirv_words(&[0u8; 7]).is_err());
    assert!(crate::shader::spirv_words(&[0u8; 24]).is_err());
}

#[test]
fn vertex_layout_is_packed() {
    let info = reflect_words(&vertex_module()).unwrap();
    let (stride, attrs) = vertex_input_description(&info.vertex_attributes);

    assert_eq!(stride, 20);
    assert_eq!(attrs[0].offset, 0);
    assert_eq!(attrs[1].offset, 12);
    assert_eq!(attrs[1].location, 1);
}

// ---------------------------------------------------------------
// Combined set layouts

#[test]
fn combined_layouts_merge_stages() {
    let vert = shader_from_info(reflect_words(&vertex_module()).unwrap());
    let frag = shader_from_info(reflect_words(&fragment_module()).unwrap());

    let (sets, push_constants, _) = combine_set_layouts(&[vert, frag]).unwrap();

    assert_eq!(sets.len(), 2);
    // the shared uniform block picks up both stages
    assert_eq!(
        sets[0].bindings[0].stage_flags,
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
    );
    // the sampler stays vertex only
    assert_eq!(sets[0].bindings[1].stage_flags, vk::ShaderStageFlags::VERTEX);
    // the storage buffer is fragment only in set 1
    assert_eq!(
        sets[1].bindings[0].stage_flags,
        vk::ShaderStageFlags::FRAGMENT
    );

    assert_eq!(push_constants.len(), 1);
}

#[test]
fn combined_layouts_hash_identically() {
    let make = || {
        let vert = shader_from_info(reflect_words(&vertex_module()).unwrap());
        let frag = shader_from_info(reflect_words(&fragment_module()).unwrap());
        combine_set_layouts(&[vert, frag]).unwrap().2
    };

    // two pipelines with identical shader interfaces share a layout
    assert_eq!(make(), make());
}

#[test]
fn combined_layouts_reject_mismatch() {
    let vert = shader_from_info(reflect_words(&vertex_module()).unwrap());

    // same binding slot, different descriptor type
    let mut bad_info = reflect_words(&vertex_module()).unwrap();
    bad_info.stage = vk::ShaderStageFlags::FRAGMENT;
    bad_info.sets[0].bindings[1].descriptor_type = vk::DescriptorType::STORAGE_IMAGE;
    let frag = shader_from_info(bad_info);

    assert_eq!(
        combine_set_layouts(&[vert, frag]).unwrap_err(),
        StratusError::MISMATCHED_BINDING
    );
}

#[test]
fn pipeline_hash_covers_state() {
    let code: &[u8] = &[1, 2, 3, 4];
    let base = GraphicsPipelineInfo::default();
    let mut blended = base;
    blended.blending = true;

    assert_eq!(hash_pipeline(&[code], &base), hash_pipeline(&[code], &base));
    assert_ne!(
        hash_pipeline(&[code], &base),
        hash_pipeline(&[code], &blended)
    );
    assert_ne!(
        hash_pipeline(&[code], &base),
        hash_pipeline(&[&[4, 3, 2, 1]], &base)
    );
}

// ---------------------------------------------------------------
// Graph scheduling

fn image_decl() -> ScheduleResourceDecl {
    ScheduleResourceDecl {
        external: false,
        is_image: true,
        is_depth: false,
    }
}

fn depth_decl() -> ScheduleResourceDecl {
    ScheduleResourceDecl {
        external: false,
        is_image: true,
        is_depth: true,
    }
}

fn buffer_decl() -> ScheduleResourceDecl {
    ScheduleResourceDecl {
        external: false,
        is_image: false,
        is_depth: false,
    }
}

fn backbuffer_decl() -> ScheduleResourceDecl {
    ScheduleResourceDecl {
        external: true,
        is_image: true,
        is_depth: false,
    }
}

#[test]
fn single_color_pass() {
    let input = ScheduleInput {
        resources: vec![backbuffer_decl()],
        passes: vec![SchedulePassDecl {
            stage: PassStage::Graphics,
            reads: vec![],
            writes: vec![(WriteKind::ColorAttachment, 0)],
        }],
        unified_queues: false,
    };

    let schedule = build_schedule(&input).unwrap();

    // one submission, no barriers: the render pass object does the
    // undefined -> color transition itself
    assert_eq!(schedule.order, vec![0]);
    assert!(schedule.barriers[0].is_empty());
    assert_eq!(schedule.submissions.len(), 1);
    assert_eq!(schedule.submissions[0].queue, QueueType::Graphics);
    assert_eq!(schedule.present_pass, Some(0));
    assert_eq!(
        schedule.attachments[0][0].initial_layout,
        vk::ImageLayout::UNDEFINED
    );
}

/// The forward-plus shape: depth prepass, compute light culling over
/// the depth buffer, then a color pass consuming both.
fn forward_plus_input() -> ScheduleInput {
    ScheduleInput {
        resources: vec![backbuffer_decl(), depth_decl(), buffer_decl()],
        passes: vec![
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![],
                writes: vec![(WriteKind::DepthStencilAttachment, 1)],
            },
            SchedulePassDecl {
                stage: PassStage::Compute,
                reads: vec![(ReadKind::SampledImage, 1)],
                writes: vec![(WriteKind::StorageBuffer, 2)],
            },
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![(ReadKind::StorageBuffer, 2)],
                writes: vec![
                    (WriteKind::DepthStencilAttachment, 1),
                    (WriteKind::ColorAttachment, 0),
                ],
            },
        ],
        unified_queues: false,
    }
}

#[test]
fn forward_plus_schedule() {
    let schedule = build_schedule(&forward_plus_input()).unwrap();

    assert_eq!(schedule.order, vec![0, 1, 2]);

    // graphics, compute, graphics: three submissions, which implies
    // two queue crossing semaphores at execute time
    let queues: Vec<QueueType> = schedule.submissions.iter().map(|s| s.queue).collect();
    assert_eq!(
        queues,
        vec![QueueType::Graphics, QueueType::Compute, QueueType::Graphics]
    );

    // the prepass needs no barriers at all
    assert!(schedule.barriers[0].is_empty());

    // light culling: exactly one depth transition, attachment ->
    // depth read
    assert_eq!(schedule.barriers[1].len(), 1);
    let depth_barrier = &schedule.barriers[1][0];
    assert_eq!(depth_barrier.resource, 1);
    assert_eq!(
        depth_barrier.old_layout,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    );
    assert_eq!(
        depth_barrier.new_layout,
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    );

    // color pass: the storage buffer crosses compute -> fragment
    assert_eq!(schedule.barriers[2].len(), 1);
    let light_barrier = &schedule.barriers[2][0];
    assert_eq!(light_barrier.resource, 2);
    assert!(!light_barrier.is_image);
    assert_eq!(light_barrier.src_access, vk::AccessFlags::SHADER_WRITE);
    assert_eq!(light_barrier.dst_access, vk::AccessFlags::SHADER_READ);
    assert_eq!(
        light_barrier.src_stage,
        vk::PipelineStageFlags::COMPUTE_SHADER
    );
    assert_eq!(
        light_barrier.dst_stage,
        vk::PipelineStageFlags::FRAGMENT_SHADER
    );

    // the color pass re-binds depth as an attachment, transitioning
    // back through the render pass, not a barrier
    assert_eq!(schedule.attachments[2].len(), 2);
    assert_eq!(
        schedule.attachments[2][0].initial_layout,
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    );

    assert_eq!(schedule.present_pass, Some(2));
}

#[test]
fn unified_queues_collapse_submissions() {
    let mut input = forward_plus_input();
    input.unified_queues = true;

    let schedule = build_schedule(&input).unwrap();
    assert_eq!(schedule.submissions.len(), 1);
    assert_eq!(schedule.submissions[0].queue, QueueType::Graphics);
}

#[test]
fn schedule_is_deterministic() {
    // baking an unchanged graph must produce an identical plan, and
    // resizing never touches the schedule inputs at all
    let a = build_schedule(&forward_plus_input()).unwrap();
    let b = build_schedule(&forward_plus_input()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn writers_order_after_readers() {
    // A writes R; B reads R; C writes R again. C must come after B
    // even though nothing C reads depends on B.
    let input = ScheduleInput {
        resources: vec![backbuffer_decl(), image_decl()],
        passes: vec![
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![],
                writes: vec![(WriteKind::ColorAttachment, 1)],
            },
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![(ReadKind::SampledImage, 1)],
                writes: vec![(WriteKind::ColorAttachment, 0)],
            },
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![],
                writes: vec![(WriteKind::ColorAttachment, 1)],
            },
        ],
        unified_queues: false,
    };

    let schedule = build_schedule(&input).unwrap();
    assert_eq!(schedule.order, vec![0, 1, 2]);
}

#[test]
fn double_writer_is_an_error() {
    let input = ScheduleInput {
        resources: vec![backbuffer_decl(), image_decl()],
        passes: vec![
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![],
                writes: vec![(WriteKind::ColorAttachment, 1)],
            },
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![],
                writes: vec![(WriteKind::ColorAttachment, 1)],
            },
        ],
        unified_queues: false,
    };

    assert_eq!(
        build_schedule(&input).unwrap_err(),
        StratusError::DOUBLE_WRITER
    );
}

#[test]
fn unwritten_read_is_an_error() {
    let input = ScheduleInput {
        resources: vec![backbuffer_decl(), image_decl()],
        passes: vec![SchedulePassDecl {
            stage: PassStage::Graphics,
            reads: vec![(ReadKind::SampledImage, 1)],
            writes: vec![(WriteKind::ColorAttachment, 0)],
        }],
        unified_queues: false,
    };

    assert_eq!(
        build_schedule(&input).unwrap_err(),
        StratusError::UNWRITTEN_RESOURCE
    );
}

#[test]
fn transfer_reads_get_transfer_layouts() {
    // render to an image, blit it to the backbuffer
    let input = ScheduleInput {
        resources: vec![backbuffer_decl(), image_decl()],
        passes: vec![
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![],
                writes: vec![(WriteKind::ColorAttachment, 1)],
            },
            SchedulePassDecl {
                stage: PassStage::Graphics,
                reads: vec![(ReadKind::ImageTransfer, 1)],
                writes: vec![(WriteKind::ImageTransfer, 0)],
            },
        ],
        unified_queues: false,
    };

    let schedule = build_schedule(&input).unwrap();
    let batch = &schedule.barriers[1];
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    assert_eq!(batch[1].new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    assert_eq!(batch[1].old_layout, vk::ImageLayout::UNDEFINED);
}

// ---------------------------------------------------------------
// Transient blocks

fn test_block(size: u64, alignment: u64) -> BufferBlock {
    BufferBlock {
        bb_buffer: vk::Buffer::null(),
        bb_mem: vk::DeviceMemory::null(),
        bb_mapping: std::ptr::null_mut(),
        bb_size: size,
        bb_offset: 0,
        bb_alignment: alignment,
    }
}

#[test]
fn round_up_behaves() {
    assert_eq!(round_up(0, 256), 0);
    assert_eq!(round_up(1, 256), 256);
    assert_eq!(round_up(256, 256), 256);
    assert_eq!(round_up(257, 16), 272);
}

#[test]
fn block_allocations_are_aligned() {
    let mut block = test_block(1024, 256);

    let a = block.allocate(100).unwrap();
    assert_eq!(a.ba_offset, 0);
    assert_eq!(a.ba_padded_size, 256);

    let b = block.allocate(256).unwrap();
    assert_eq!(b.ba_offset, 256);

    let c = block.allocate(300).unwrap();
    assert_eq!(c.ba_offset, 512);
    assert_eq!(c.ba_padded_size, 512);

    // 1024 bytes are spoken for now
    assert!(block.allocate(1).is_none());

    block.reset();
    assert_eq!(block.allocate(1024).unwrap().ba_offset, 0);
}

#[test]
fn steady_state_block_count() {
    // 10k uniform binds of 256 bytes into 64KiB blocks should settle
    // at ceil(10000 * 256 / 65536) + 1 blocks at most
    let count = 10_000u64;
    let size = 256u64;
    let block_size = 65536u64;

    let mut blocks: Vec<BufferBlock> = Vec::new();
    for _ in 0..count {
        let fits = match blocks.last_mut() {
            Some(block) => block.allocate(size).is_some(),
            None => false,
        };
        if !fits {
            let mut block = test_block(block_size, 256);
            block.allocate(size).unwrap();
            blocks.push(block);
        }
    }

    let limit = (count * size + block_size - 1) / block_size + 1;
    assert!(blocks.len() as u64 <= limit);
}

// ---------------------------------------------------------------
// Descriptor hashing

#[test]
fn descriptor_hash_is_content_addressed() {
    let buffer = Descriptor::Buffer(
        vk::DescriptorBufferInfo::builder()
            .buffer(vk::Buffer::null())
            .offset(0)
            .range(256)
            .build(),
    );
    let image = Descriptor::Image(
        vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build(),
    );

    // identical contents, identical hash: the pool returns the same
    // set twice within a frame
    assert_eq!(
        hash_descriptors(&[buffer, image]),
        hash_descriptors(&[buffer, image])
    );

    // any difference changes the hash
    let moved = Descriptor::Buffer(
        vk::DescriptorBufferInfo::builder()
            .buffer(vk::Buffer::null())
            .offset(0)
            .range(512)
            .build(),
    );
    assert_ne!(
        hash_descriptors(&[buffer, image]),
        hash_descriptors(&[moved, image])
    );

    // binding order matters
    assert_ne!(
        hash_descriptors(&[buffer, image]),
        hash_descriptors(&[image, buffer])
    );

    // an empty slot is distinct from any filled one
    assert_ne!(
        hash_descriptors(&[Descriptor::Empty]),
        hash_descriptors(&[buffer])
    );
}

#[test]
fn descriptor_full_keys_compare() {
    // the caches only trust a hash hit after comparing the retained
    // descriptors, so equality has to see through to the contents
    let a = Descriptor::Buffer(
        vk::DescriptorBufferInfo::builder()
            .buffer(vk::Buffer::null())
            .offset(0)
            .range(256)
            .build(),
    );
    let b = Descriptor::Buffer(
        vk::DescriptorBufferInfo::builder()
            .buffer(vk::Buffer::null())
            .offset(0)
            .range(512)
            .build(),
    );
    let img = Descriptor::Image(
        vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build(),
    );

    assert_eq!(a, a);
    assert_ne!(a, b);
    assert_ne!(a, img);
    assert_ne!(a, Descriptor::Empty);
    assert_eq!(Descriptor::Empty, Descriptor::Empty);

    assert_eq!(vec![a, img].as_slice(), &[a, img][..]);
    assert_ne!(vec![a, img].as_slice(), &[b, img][..]);
}

#[test]
fn set_info_bindings_stay_sorted() {
    let info = reflect_words(&fragment_module()).unwrap();
    for set in info.sets.iter() {
        let bindings: Vec<u32> = set.bindings.iter().map(|b| b.binding).collect();
        let mut sorted = bindings.clone();
        sorted.sort();
        assert_eq!(bindings, sorted);
    }
}
