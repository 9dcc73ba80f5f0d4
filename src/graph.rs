// The frame render graph
//
// Passes declare what they read and write by resource name; baking
// turns those declarations into a topological pass order, a barrier
// batch per pass, render pass and framebuffer objects for the graphics
// passes, and a submission plan that groups consecutive same-queue
// passes and chains queue changes with semaphores. Execution then
// replays that plan every frame, invoking the user's builder callbacks
// to record the actual commands.
//
// Baking is split in two: `build_schedule` is pure bookkeeping over
// the declarations (no Vulkan calls), `realize` creates the objects.
// Everything order- or barrier-related is decided in the pure half.

use ash::vk;
use fxhash::FxHasher64;

use crate::buffer::{Buffer, BufferCreateInfo, BufferMemory, BufferUsage};
use crate::cmdbuf::CmdBuffer;
use crate::image::{Image, ImageAspect, ImageCreateInfo, ImageUsage};
use crate::swapchain::Swapchain;
use crate::{Device, QueueType, Result, StratusError, WorkerId};
use utils::log;

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

pub type PassId = usize;
pub(crate) type ResourceId = usize;

/// The backbuffer is always resource 0, injected from the swapchain
/// each frame.
pub(crate) const BACKBUFFER: ResourceId = 0;
const BACKBUFFER_NAME: &str = "backbuffer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStage {
    /// All-graphics: executes inside a render pass on the graphics queue
    Graphics,
    /// Compute dispatches on the compute queue
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    SampledImage,
    ImageTransfer,
    StorageBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    ColorAttachment,
    DepthStencilAttachment,
    StorageBuffer,
    ImageTransfer,
}

/// Graph image extents are either tied to the backbuffer, in which
/// case a resize recreates them, or fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphExtent {
    Swapchain,
    Absolute { width: u32, height: u32 },
}

pub struct GraphImageInfo {
    pub extent: GraphExtent,
    pub format: vk::Format,
    /// usage beyond what the pass declarations imply
    pub usage: ImageUsage,
    pub aspect: ImageAspect,
    pub mip_count: u32,
    pub layer_count: u32,
    pub sample_count: u32,
}

impl Default for GraphImageInfo {
    fn default() -> Self {
        Self {
            extent: GraphExtent::Swapchain,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: ImageUsage::empty(),
            aspect: ImageAspect::COLOR,
            mip_count: 1,
            layer_count: 1,
            sample_count: 1,
        }
    }
}

pub struct GraphBufferInfo {
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: BufferMemory,
}

enum ResourceKind {
    /// The swapchain color image, bound externally per frame
    Backbuffer,
    Image {
        info: GraphImageInfo,
        physical: Option<Image>,
    },
    Buffer {
        info: GraphBufferInfo,
        physical: Option<Buffer>,
    },
    /// Caller owned buffer, referenced by handle
    ExternalBuffer { buffer: vk::Buffer },
}

struct GraphResource {
    name: String,
    kind: ResourceKind,
}

impl GraphResource {
    fn is_image(&self) -> bool {
        match self.kind {
            ResourceKind::Backbuffer | ResourceKind::Image { .. } => true,
            _ => false,
        }
    }

    fn is_external(&self) -> bool {
        match self.kind {
            ResourceKind::Backbuffer | ResourceKind::ExternalBuffer { .. } => true,
            _ => false,
        }
    }

    fn is_depth(&self) -> bool {
        match &self.kind {
            ResourceKind::Image { info, .. } => info.aspect.contains(ImageAspect::DEPTH),
            _ => false,
        }
    }
}

type BuilderFn = Box<dyn FnMut(&mut CmdBuffer)>;
type ColorClearFn = Box<dyn Fn() -> vk::ClearColorValue>;
type DepthClearFn = Box<dyn Fn() -> vk::ClearDepthStencilValue>;

struct Pass {
    name: String,
    stage: PassStage,
    reads: Vec<(ReadKind, String)>,
    writes: Vec<(WriteKind, String)>,
    builder: Option<BuilderFn>,
    color_clearers: Vec<Option<ColorClearFn>>,
    depth_clearer: Option<DepthClearFn>,
}

//--------------------------------------------------------------------------------------------------
// The pure schedule

/// Pass declarations reduced to resource indices, the input to
/// `build_schedule`.
pub(crate) struct ScheduleInput {
    pub(crate) passes: Vec<SchedulePassDecl>,
    pub(crate) resources: Vec<ScheduleResourceDecl>,
    /// graphics and compute share one queue family
    pub(crate) unified_queues: bool,
}

pub(crate) struct SchedulePassDecl {
    pub(crate) stage: PassStage,
    pub(crate) reads: Vec<(ReadKind, ResourceId)>,
    pub(crate) writes: Vec<(WriteKind, ResourceId)>,
}

pub(crate) struct ScheduleResourceDecl {
    pub(crate) external: bool,
    pub(crate) is_image: bool,
    pub(crate) is_depth: bool,
}

/// One layout/access transition at a pass boundary. Attachment
/// transitions are not here, they ride on the render pass objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BarrierSpec {
    pub(crate) resource: ResourceId,
    pub(crate) is_image: bool,
    pub(crate) src_access: vk::AccessFlags,
    pub(crate) dst_access: vk::AccessFlags,
    pub(crate) src_stage: vk::PipelineStageFlags,
    pub(crate) dst_stage: vk::PipelineStageFlags,
    pub(crate) old_layout: vk::ImageLayout,
    pub(crate) new_layout: vk::ImageLayout,
}

/// The layout an attachment is in when its pass begins, for the render
/// pass object's initialLayout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttachmentInit {
    pub(crate) resource: ResourceId,
    pub(crate) initial_layout: vk::ImageLayout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Submission {
    pub(crate) queue: QueueType,
    /// indexes into `GraphSchedule::order`
    pub(crate) range: std::ops::Range<usize>,
}

/// Everything bake decides before any Vulkan object exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GraphSchedule {
    /// passes in execution order
    pub(crate) order: Vec<PassId>,
    /// barrier batch per pass, parallel to `order`
    pub(crate) barriers: Vec<Vec<BarrierSpec>>,
    /// attachment initial layouts per pass, parallel to `order`
    pub(crate) attachments: Vec<Vec<AttachmentInit>>,
    pub(crate) submissions: Vec<Submission>,
    /// the last pass writing the backbuffer, whose render pass
    /// finalizes into the present layout
    pub(crate) present_pass: Option<PassId>,
}

/// Image layout, access mask, and pipeline stage implied by one
/// read declaration.
fn read_state(
    kind: ReadKind,
    stage: PassStage,
    is_depth: bool,
) -> (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) {
    let shader_stage = match stage {
        PassStage::Graphics => vk::PipelineStageFlags::FRAGMENT_SHADER,
        PassStage::Compute => vk::PipelineStageFlags::COMPUTE_SHADER,
    };

    match kind {
        ReadKind::SampledImage => (
            match is_depth {
                true => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                false => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
            vk::AccessFlags::SHADER_READ,
            shader_stage,
        ),
        ReadKind::ImageTransfer => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ReadKind::StorageBuffer => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::SHADER_READ,
            shader_stage,
        ),
    }
}

/// Same for write declarations.
fn write_state(
    kind: WriteKind,
    stage: PassStage,
) -> (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) {
    let shader_stage = match stage {
        PassStage::Graphics => vk::PipelineStageFlags::FRAGMENT_SHADER,
        PassStage::Compute => vk::PipelineStageFlags::COMPUTE_SHADER,
    };

    match kind {
        WriteKind::ColorAttachment => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        WriteKind::DepthStencilAttachment => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        WriteKind::StorageBuffer => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::SHADER_WRITE,
            shader_stage,
        ),
        WriteKind::ImageTransfer => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
    }
}

fn is_attachment(kind: WriteKind) -> bool {
    match kind {
        WriteKind::ColorAttachment | WriteKind::DepthStencilAttachment => true,
        _ => false,
    }
}

/// Attachments with a clear callback clear on load, first uses
/// discard, everything else loads what a prior pass left behind.
fn attachment_load_op(has_clearer: bool, initial: vk::ImageLayout) -> vk::AttachmentLoadOp {
    if has_clearer {
        vk::AttachmentLoadOp::CLEAR
    } else if initial == vk::ImageLayout::UNDEFINED {
        vk::AttachmentLoadOp::DONT_CARE
    } else {
        vk::AttachmentLoadOp::LOAD
    }
}

/// Turn validated declarations into the execution plan.
pub(crate) fn build_schedule(input: &ScheduleInput) -> Result<GraphSchedule> {
    let pass_count = input.passes.len();

    // Producer bookkeeping in declaration order. Two writers of the
    // same resource with no read in between is a declaration error.
    let mut last_writer: Vec<Option<PassId>> = vec![None; input.resources.len()];
    let mut read_since_write: Vec<bool> = vec![true; input.resources.len()];
    let mut readers_since_write: Vec<Vec<PassId>> = vec![Vec::new(); input.resources.len()];
    let mut edges: Vec<Vec<PassId>> = vec![Vec::new(); pass_count];
    let mut indegree: Vec<usize> = vec![0; pass_count];

    fn add_edge(edges: &mut Vec<Vec<PassId>>, indegree: &mut Vec<usize>, from: PassId, to: PassId) {
        if from != to && !edges[from].contains(&to) {
            edges[from].push(to);
            indegree[to] += 1;
        }
    }

    for (id, pass) in input.passes.iter().enumerate() {
        for (_, res) in pass.reads.iter() {
            match last_writer[*res] {
                Some(producer) => {
                    add_edge(&mut edges, &mut indegree, producer, id);
                }
                None => {
                    if !input.resources[*res].external {
                        return Err(StratusError::UNWRITTEN_RESOURCE);
                    }
                }
            }
            read_since_write[*res] = true;
            readers_since_write[*res].push(id);
        }

        for (_, res) in pass.writes.iter() {
            if let Some(producer) = last_writer[*res] {
                if !read_since_write[*res] && producer != id {
                    return Err(StratusError::DOUBLE_WRITER);
                }
                // order after the previous writer and its readers
                add_edge(&mut edges, &mut indegree, producer, id);
                for reader in readers_since_write[*res].iter() {
                    add_edge(&mut edges, &mut indegree, *reader, id);
                }
            }
            last_writer[*res] = Some(id);
            read_since_write[*res] = false;
            readers_since_write[*res].clear();
        }
    }

    // Topological sort, ties broken by declaration order
    let mut order: Vec<PassId> = Vec::with_capacity(pass_count);
    let mut indegree = indegree;
    let mut ready: Vec<PassId> = (0..pass_count).filter(|&p| indegree[p] == 0).collect();
    while !ready.is_empty() {
        let next = *ready.iter().min().unwrap();
        ready.retain(|&p| p != next);
        order.push(next);

        for &succ in edges[next].iter() {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.push(succ);
            }
        }
    }
    if order.len() != pass_count {
        // a cycle can only come from contradictory declarations
        return Err(StratusError::DOUBLE_WRITER);
    }

    // Walk the ordered passes per resource and emit a barrier wherever
    // the required layout or access differs from the tracked state.
    // Attachment writes transition through the render pass object
    // instead, so they only record their initial layout here.
    struct TrackedState {
        layout: vk::ImageLayout,
        access: vk::AccessFlags,
        stage: vk::PipelineStageFlags,
    }
    let mut tracked: Vec<TrackedState> = input
        .resources
        .iter()
        .map(|_| TrackedState {
            layout: vk::ImageLayout::UNDEFINED,
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        })
        .collect();

    let mut barriers: Vec<Vec<BarrierSpec>> = Vec::with_capacity(pass_count);
    let mut attachments: Vec<Vec<AttachmentInit>> = Vec::with_capacity(pass_count);
    let mut present_pass = None;

    for &id in order.iter() {
        let pass = &input.passes[id];
        let mut batch = Vec::new();
        let mut inits = Vec::new();

        for (kind, res) in pass.reads.iter() {
            let decl = &input.resources[*res];
            let (layout, access, stage) = read_state(*kind, pass.stage, decl.is_depth);
            let state = &mut tracked[*res];

            // first use needs no barrier unless a layout must change
            let layout_changed = decl.is_image && state.layout != layout;
            let access_changed = !state.access.is_empty() && state.access != access;
            if layout_changed || access_changed {
                batch.push(BarrierSpec {
                    resource: *res,
                    is_image: decl.is_image,
                    src_access: state.access,
                    dst_access: access,
                    src_stage: state.stage,
                    dst_stage: stage,
                    old_layout: state.layout,
                    new_layout: layout,
                });
            }
            state.layout = match decl.is_image {
                true => layout,
                false => state.layout,
            };
            state.access = access;
            state.stage = stage;
        }

        for (kind, res) in pass.writes.iter() {
            let decl = &input.resources[*res];
            let (layout, access, stage) = write_state(*kind, pass.stage);
            let state = &mut tracked[*res];

            if is_attachment(*kind) {
                inits.push(AttachmentInit {
                    resource: *res,
                    initial_layout: state.layout,
                });
                state.layout = layout;
                state.access = access;
                state.stage = stage;

                if *res == BACKBUFFER {
                    present_pass = Some(id);
                }
                continue;
            }

            let layout_changed = decl.is_image && state.layout != layout;
            let access_changed = !state.access.is_empty() && state.access != access;
            if layout_changed || access_changed {
                batch.push(BarrierSpec {
                    resource: *res,
                    is_image: decl.is_image,
                    src_access: state.access,
                    dst_access: access,
                    src_stage: state.stage,
                    dst_stage: stage,
                    old_layout: state.layout,
                    new_layout: layout,
                });
            }
            state.layout = match decl.is_image {
                true => layout,
                false => state.layout,
            };
            state.access = access;
            state.stage = stage;
        }

        barriers.push(batch);
        attachments.push(inits);
    }

    // Group consecutive same-queue passes into submissions
    let queue_of = |id: PassId| match input.passes[id].stage {
        PassStage::Graphics => QueueType::Graphics,
        PassStage::Compute => match input.unified_queues {
            true => QueueType::Graphics,
            false => QueueType::Compute,
        },
    };

    let mut submissions: Vec<Submission> = Vec::new();
    for (i, &id) in order.iter().enumerate() {
        let queue = queue_of(id);
        match submissions.last_mut() {
            Some(sub) if sub.queue == queue => sub.range.end = i + 1,
            _ => submissions.push(Submission {
                queue: queue,
                range: i..i + 1,
            }),
        }
    }

    Ok(GraphSchedule {
        order: order,
        barriers: barriers,
        attachments: attachments,
        submissions: submissions,
        present_pass: present_pass,
    })
}

//--------------------------------------------------------------------------------------------------
// Physical state

/// What the command buffer needs to know about the render pass it is
/// recording inside: the handle for pipeline instancing, the extent
/// for the default viewport, and the compatibility key.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderPassState {
    pub(crate) rp_pass: vk::RenderPass,
    pub(crate) rp_extent: vk::Extent2D,
    pub(crate) rp_color_count: u32,
    pub(crate) rp_has_depth: bool,
    pub(crate) rp_sample_count: vk::SampleCountFlags,
    pub(crate) rp_compat_hash: u64,
}

/// Realized per-pass objects
struct PhysicalPass {
    render_pass: Option<vk::RenderPass>,
    /// one per swapchain image when the backbuffer is attached,
    /// otherwise a single entry
    framebuffers: Vec<vk::Framebuffer>,
    state: Option<RenderPassState>,
    uses_backbuffer: bool,
}

/// The frame render graph
///
/// Build once, bake once, then set builder callbacks and execute every
/// frame. Rebaking is only needed when declarations change; a resize
/// only recreates the swapchain-relative images and framebuffers.
pub struct RenderGraph {
    g_dev: Arc<Device>,
    g_resources: Vec<GraphResource>,
    g_res_names: HashMap<String, ResourceId>,
    g_passes: Vec<Pass>,

    g_schedule: Option<GraphSchedule>,
    g_physical: Vec<PhysicalPass>,
    /// boundary semaphores: [frame in flight][submission boundary]
    g_semaphores: Vec<Vec<vk::Semaphore>>,
    /// command buffers: [frame in flight][submission]. The final
    /// graphics submission records into the swapchain's per-frame
    /// primary command buffer instead and is None here.
    g_cbufs: Vec<Vec<Option<CmdBuffer>>>,
    g_dirty: bool,
}

impl RenderGraph {
    pub fn new(dev: Arc<Device>) -> Self {
        let mut ret = Self {
            g_dev: dev,
            g_resources: Vec::new(),
            g_res_names: HashMap::new(),
            g_passes: Vec::new(),
            g_schedule: None,
            g_physical: Vec::new(),
            g_semaphores: Vec::new(),
            g_cbufs: Vec::new(),
            g_dirty: false,
        };

        // the swapchain target is always present
        ret.add_resource(GraphResource {
            name: BACKBUFFER_NAME.to_string(),
            kind: ResourceKind::Backbuffer,
        });

        ret
    }

    fn add_resource(&mut self, res: GraphResource) -> ResourceId {
        let id = self.g_resources.len();
        self.g_res_names.insert(res.name.clone(), id);
        self.g_resources.push(res);
        self.g_dirty = true;
        id
    }

    /// Declare a graph-owned image
    pub fn add_image(&mut self, name: &str, info: GraphImageInfo) {
        self.add_resource(GraphResource {
            name: name.to_string(),
            kind: ResourceKind::Image {
                info: info,
                physical: None,
            },
        });
    }

    /// Declare a graph-owned buffer
    pub fn add_buffer(&mut self, name: &str, info: GraphBufferInfo) {
        self.add_resource(GraphResource {
            name: name.to_string(),
            kind: ResourceKind::Buffer {
                info: info,
                physical: None,
            },
        });
    }

    /// Declare a caller-owned buffer the graph may reference
    pub fn add_external_buffer(&mut self, name: &str, buffer: &Buffer) {
        self.add_resource(GraphResource {
            name: name.to_string(),
            kind: ResourceKind::ExternalBuffer {
                buffer: buffer.b_buffer,
            },
        });
    }

    /// Declare a pass. Reads, writes, and callbacks are attached to
    /// the returned id.
    pub fn add_pass(&mut self, name: &str, stage: PassStage) -> PassId {
        let id = self.g_passes.len();
        self.g_passes.push(Pass {
            name: name.to_string(),
            stage: stage,
            reads: Vec::new(),
            writes: Vec::new(),
            builder: None,
            color_clearers: Vec::new(),
            depth_clearer: None,
        });
        self.g_dirty = true;

        id
    }

    pub fn pass_read(&mut self, pass: PassId, kind: ReadKind, resource: &str) {
        self.g_passes[pass].reads.push((kind, resource.to_string()));
        self.g_dirty = true;
    }

    pub fn pass_write(&mut self, pass: PassId, kind: WriteKind, resource: &str) {
        self.g_passes[pass]
            .writes
            .push((kind, resource.to_string()));
        self.g_dirty = true;
    }

    /// The callback that records the pass's commands each frame.
    /// Setting a new builder does not dirty the bake.
    pub fn set_pass_builder<F: FnMut(&mut CmdBuffer) + 'static>(&mut self, pass: PassId, f: F) {
        self.g_passes[pass].builder = Some(Box::new(f));
    }

    /// Clear callback for the pass's i'th color attachment. Attachments
    /// without a clearer load their previous contents.
    pub fn set_color_clearer<F: Fn() -> vk::ClearColorValue + 'static>(
        &mut self,
        pass: PassId,
        index: usize,
        f: F,
    ) {
        let clearers = &mut self.g_passes[pass].color_clearers;
        if clearers.len() <= index {
            clearers.resize_with(index + 1, || None);
        }
        clearers[index] = Some(Box::new(f));
        self.g_dirty = true;
    }

    pub fn set_depth_stencil_clearer<F: Fn() -> vk::ClearDepthStencilValue + 'static>(
        &mut self,
        pass: PassId,
        f: F,
    ) {
        self.g_passes[pass].depth_clearer = Some(Box::new(f));
        self.g_dirty = true;
    }

    /// Resolve declaration names to resource ids
    fn resolve(&self, name: &str) -> Result<ResourceId> {
        self.g_res_names.get(name).copied().ok_or_else(|| {
            log::error!("Render graph references unknown resource '{}'", name);
            StratusError::UNKNOWN_RESOURCE
        })
    }

    fn schedule_input(&self) -> Result<ScheduleInput> {
        let resources = self
            .g_resources
            .iter()
            .map(|res| ScheduleResourceDecl {
                external: res.is_external(),
                is_image: res.is_image(),
                is_depth: res.is_depth(),
            })
            .collect();

        let mut passes = Vec::with_capacity(self.g_passes.len());
        for pass in self.g_passes.iter() {
            let mut reads = Vec::with_capacity(pass.reads.len());
            for (kind, name) in pass.reads.iter() {
                reads.push((*kind, self.resolve(name)?));
            }
            let mut writes = Vec::with_capacity(pass.writes.len());
            for (kind, name) in pass.writes.iter() {
                writes.push((*kind, self.resolve(name)?));
            }
            passes.push(SchedulePassDecl {
                stage: pass.stage,
                reads: reads,
                writes: writes,
            });
        }

        Ok(ScheduleInput {
            passes: passes,
            resources: resources,
            unified_queues: self.g_dev.d_queues.graphics_family
                == self.g_dev.d_queues.compute_family,
        })
    }

    /// Bake the graph against the swapchain.
    ///
    /// Produces the schedule, materializes graph-owned resources, and
    /// creates render passes, framebuffers, boundary semaphores, and
    /// per-frame command buffers. Baking an unchanged graph is a no-op.
    pub fn bake(&mut self, sc: &Swapchain) -> Result<()> {
        if self.g_schedule.is_some() && !self.g_dirty {
            return Ok(());
        }
        if self.g_passes.is_empty() {
            return Err(StratusError::INVALID);
        }

        let input = self.schedule_input()?;
        let schedule = build_schedule(&input)?;

        self.destroy_physical();
        self.create_resources(&input, sc)?;
        self.realize(&schedule, sc)?;

        self.g_schedule = Some(schedule);
        self.g_dirty = false;

        Ok(())
    }

    /// Create the physical images and buffers behind graph-owned
    /// resources. Usage is the union of the declared extra usage and
    /// whatever the pass declarations imply.
    fn create_resources(&mut self, input: &ScheduleInput, sc: &Swapchain) -> Result<()> {
        // accumulate usage per resource from the declarations
        let mut image_usage: Vec<ImageUsage> = vec![ImageUsage::empty(); self.g_resources.len()];
        for pass in input.passes.iter() {
            for (kind, res) in pass.reads.iter() {
                image_usage[*res] |= match kind {
                    ReadKind::SampledImage => ImageUsage::SAMPLED,
                    ReadKind::ImageTransfer => ImageUsage::TRANSFER_SRC,
                    ReadKind::StorageBuffer => ImageUsage::empty(),
                };
            }
            for (kind, res) in pass.writes.iter() {
                image_usage[*res] |= match kind {
                    WriteKind::ColorAttachment => ImageUsage::COLOR_ATTACHMENT,
                    WriteKind::DepthStencilAttachment => ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                    WriteKind::ImageTransfer => ImageUsage::TRANSFER_DST,
                    WriteKind::StorageBuffer => ImageUsage::empty(),
                };
            }
        }

        let extent = sc.extent();
        for (id, res) in self.g_resources.iter_mut().enumerate() {
            match &mut res.kind {
                ResourceKind::Image { info, physical } => {
                    if physical.is_none() {
                        let (width, height) = match info.extent {
                            GraphExtent::Swapchain => (extent.width, extent.height),
                            GraphExtent::Absolute { width, height } => (width, height),
                        };
                        *physical = Some(self.g_dev.create_image(&ImageCreateInfo {
                            width: width,
                            height: height,
                            depth: 1,
                            sample_count: info.sample_count,
                            mip_count: info.mip_count,
                            layer_count: info.layer_count,
                            format: info.format,
                            usage: info.usage | image_usage[id],
                            aspect: info.aspect,
                        })?);
                    }
                }
                ResourceKind::Buffer { info, physical } => {
                    if physical.is_none() {
                        *physical = Some(self.g_dev.create_buffer(&BufferCreateInfo {
                            usage: info.usage,
                            memory: info.memory,
                            size: info.size,
                        })?);
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Extent of an image resource as realized
    fn image_extent(&self, res: ResourceId, sc: &Swapchain) -> vk::Extent2D {
        match &self.g_resources[res].kind {
            ResourceKind::Backbuffer => sc.extent(),
            ResourceKind::Image { physical, .. } => physical.as_ref().unwrap().i_extent,
            _ => panic!("Resource is not an image"),
        }
    }

    fn image_format(&self, res: ResourceId, sc: &Swapchain) -> vk::Format {
        match &self.g_resources[res].kind {
            ResourceKind::Backbuffer => sc.format(),
            ResourceKind::Image { physical, .. } => physical.as_ref().unwrap().i_format,
            _ => panic!("Resource is not an image"),
        }
    }

    fn image_samples(&self, res: ResourceId) -> vk::SampleCountFlags {
        match &self.g_resources[res].kind {
            ResourceKind::Backbuffer => vk::SampleCountFlags::TYPE_1,
            ResourceKind::Image { physical, .. } => physical.as_ref().unwrap().i_sample_count,
            _ => panic!("Resource is not an image"),
        }
    }

    /// Create the render pass, framebuffers, semaphores, and command
    /// buffers the schedule calls for.
    fn realize(&mut self, schedule: &GraphSchedule, sc: &Swapchain) -> Result<()> {
        let mut physical: Vec<Option<PhysicalPass>> = Vec::new();
        for _ in 0..self.g_passes.len() {
            physical.push(None);
        }

        for (order_idx, &id) in schedule.order.iter().enumerate() {
            if self.g_passes[id].stage != PassStage::Graphics {
                physical[id] = Some(PhysicalPass {
                    render_pass: None,
                    framebuffers: Vec::new(),
                    state: None,
                    uses_backbuffer: false,
                });
                continue;
            }

            physical[id] = Some(self.realize_graphics_pass(
                id,
                &schedule.attachments[order_idx],
                schedule.present_pass == Some(id),
                sc,
            )?);
        }

        self.g_physical = physical.into_iter().map(|p| p.unwrap()).collect();

        // boundary semaphores and command buffers per frame in flight
        let sema_info = vk::SemaphoreCreateInfo::default();
        let boundary_count = schedule.submissions.len().saturating_sub(1);
        self.g_semaphores = (0..crate::FRAMES_IN_FLIGHT)
            .map(|_| {
                (0..boundary_count)
                    .map(|_| unsafe {
                        self.g_dev.dev.create_semaphore(&sema_info, None).unwrap()
                    })
                    .collect()
            })
            .collect();

        let last_sub = schedule.submissions.len() - 1;
        let mut cbufs = Vec::with_capacity(crate::FRAMES_IN_FLIGHT);
        for _ in 0..crate::FRAMES_IN_FLIGHT {
            let mut frame_cbufs = Vec::with_capacity(schedule.submissions.len());
            for (i, sub) in schedule.submissions.iter().enumerate() {
                // the last graphics submission uses the swapchain's
                // frame command buffer
                frame_cbufs.push(match i == last_sub && sub.queue == QueueType::Graphics {
                    true => None,
                    false => Some(self.g_dev.create_cmd_buffer(WorkerId(0), sub.queue)?),
                });
            }
            cbufs.push(frame_cbufs);
        }
        self.g_cbufs = cbufs;

        Ok(())
    }

    /// Build one graphics pass's render pass object and framebuffers.
    ///
    /// Color attachments come in declaration order, the depth
    /// attachment last. Attachments with a clear callback clear on
    /// load, ones first used here discard, everything else loads.
    fn realize_graphics_pass(
        &self,
        id: PassId,
        inits: &[AttachmentInit],
        is_present_pass: bool,
        sc: &Swapchain,
    ) -> Result<PhysicalPass> {
        let pass = &self.g_passes[id];

        let color_writes: Vec<ResourceId> = pass
            .writes
            .iter()
            .filter(|(kind, _)| *kind == WriteKind::ColorAttachment)
            .map(|(_, name)| self.resolve(name))
            .collect::<Result<_>>()?;
        let depth_write: Option<ResourceId> = pass
            .writes
            .iter()
            .find(|(kind, _)| *kind == WriteKind::DepthStencilAttachment)
            .map(|(_, name)| self.resolve(name))
            .transpose()?;

        let initial_layout = |res: ResourceId| {
            inits
                .iter()
                .find(|init| init.resource == res)
                .map(|init| init.initial_layout)
                .unwrap_or(vk::ImageLayout::UNDEFINED)
        };

        // a graphics pass with no attachments (transfer work on the
        // graphics queue) records outside any render pass
        if color_writes.is_empty() && depth_write.is_none() {
            return Ok(PhysicalPass {
                render_pass: None,
                framebuffers: Vec::new(),
                state: None,
                uses_backbuffer: false,
            });
        }

        // all attachments of a pass must agree on extent
        let mut extent: Option<vk::Extent2D> = None;
        for res in color_writes.iter().chain(depth_write.iter()) {
            let this = self.image_extent(*res, sc);
            match extent {
                Some(e) if e != this => {
                    log::error!(
                        "Pass '{}' attachments disagree on extent: {:?} vs {:?}",
                        pass.name,
                        e,
                        this
                    );
                    return Err(StratusError::INCOMPATIBLE_ATTACHMENTS);
                }
                _ => extent = Some(this),
            }
        }
        let extent = extent.ok_or(StratusError::INCOMPATIBLE_ATTACHMENTS)?;

        // attachments share one sample count, taken from the first
        let samples = color_writes
            .iter()
            .chain(depth_write.iter())
            .map(|&res| self.image_samples(res))
            .nth(0)
            .unwrap_or(vk::SampleCountFlags::TYPE_1);

        let mut descriptions: Vec<vk::AttachmentDescription> = Vec::new();
        let mut color_refs: Vec<vk::AttachmentReference> = Vec::new();
        let mut compat_hasher = FxHasher64::default();

        for (i, res) in color_writes.iter().enumerate() {
            let format = self.image_format(*res, sc);
            let init = initial_layout(*res);
            let has_clearer = pass
                .color_clearers
                .get(i)
                .map(|c| c.is_some())
                .unwrap_or(false);

            let final_layout = match is_present_pass && *res == BACKBUFFER {
                true => vk::ImageLayout::PRESENT_SRC_KHR,
                false => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            };

            descriptions.push(
                vk::AttachmentDescription::builder()
                    .format(format)
                    .samples(samples)
                    .load_op(attachment_load_op(has_clearer, init))
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(init)
                    .final_layout(final_layout)
                    .build(),
            );
            color_refs.push(
                vk::AttachmentReference::builder()
                    .attachment(i as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            compat_hasher.write_i32(format.as_raw());
        }

        let mut depth_ref = None;
        if let Some(res) = depth_write {
            let format = self.image_format(res, sc);
            let init = initial_layout(res);

            descriptions.push(
                vk::AttachmentDescription::builder()
                    .format(format)
                    .samples(samples)
                    .load_op(attachment_load_op(pass.depth_clearer.is_some(), init))
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(init)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            depth_ref = Some(
                vk::AttachmentReference::builder()
                    .attachment(color_writes.len() as u32)
                    .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            compat_hasher.write_i32(format.as_raw());
        }
        compat_hasher.write_u32(samples.as_raw());

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(ref depth) = depth_ref {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpasses = [subpass.build()];

        // serialize against whatever touched the attachments before
        // this pass, the barrier batches cover everything else
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let rp_info = vk::RenderPassCreateInfo::builder()
            .attachments(&descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe {
            self.g_dev
                .dev
                .create_render_pass(&rp_info, None)
                .or(Err(StratusError::INVALID))?
        };

        // one framebuffer per swapchain image when the backbuffer is
        // among the attachments
        let uses_backbuffer = color_writes.iter().any(|&res| res == BACKBUFFER);
        let fb_count = match uses_backbuffer {
            true => sc.image_count(),
            false => 1,
        };

        let mut framebuffers = Vec::with_capacity(fb_count);
        for fb_idx in 0..fb_count {
            let views: Vec<vk::ImageView> = color_writes
                .iter()
                .chain(depth_write.iter())
                .map(|&res| match &self.g_resources[res].kind {
                    ResourceKind::Backbuffer => sc.view(fb_idx),
                    ResourceKind::Image { physical, .. } => physical.as_ref().unwrap().i_view,
                    _ => panic!("Attachment is not an image"),
                })
                .collect();

            let fb_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&views)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            framebuffers.push(unsafe {
                self.g_dev
                    .dev
                    .create_framebuffer(&fb_info, None)
                    .or(Err(StratusError::INVALID))?
            });
        }

        Ok(PhysicalPass {
            render_pass: Some(render_pass),
            framebuffers: framebuffers,
            state: Some(RenderPassState {
                rp_pass: render_pass,
                rp_extent: extent,
                rp_color_count: color_writes.len() as u32,
                rp_has_depth: depth_write.is_some(),
                rp_sample_count: samples,
                rp_compat_hash: compat_hasher.finish(),
            }),
            uses_backbuffer: uses_backbuffer,
        })
    }

    /// Swapchain extent changed: recreate the swapchain-relative
    /// images and every framebuffer. The pass order and barrier
    /// schedule only depend on declarations, they are untouched.
    pub fn on_resize(&mut self, sc: &Swapchain) -> Result<()> {
        let schedule = match self.g_schedule.take() {
            Some(s) => s,
            None => return Err(StratusError::GRAPH_NOT_BAKED),
        };

        self.g_dev.wait_idle();

        for res in self.g_resources.iter_mut() {
            if let ResourceKind::Image { info, physical } = &mut res.kind {
                if info.extent == GraphExtent::Swapchain {
                    if let Some(image) = physical.take() {
                        self.g_dev.destroy_image(image);
                    }
                }
            }
        }

        self.destroy_physical();

        let input = self.schedule_input()?;
        self.create_resources(&input, sc)?;
        self.realize(&schedule, sc)?;

        self.g_schedule = Some(schedule);

        Ok(())
    }

    /// Get a graph image's view. The view is valid until the next
    /// execute re-materializes frame state.
    pub fn consume_image(&self, name: &str) -> Result<vk::ImageView> {
        let id = self.resolve(name)?;
        match &self.g_resources[id].kind {
            ResourceKind::Image { physical, .. } => physical
                .as_ref()
                .map(|img| img.i_view)
                .ok_or(StratusError::GRAPH_NOT_BAKED),
            _ => Err(StratusError::UNKNOWN_RESOURCE),
        }
    }

    /// Borrow a graph-owned image
    pub fn get_image(&self, name: &str) -> Result<&Image> {
        let id = self.resolve(name)?;
        match &self.g_resources[id].kind {
            ResourceKind::Image { physical, .. } => {
                physical.as_ref().ok_or(StratusError::GRAPH_NOT_BAKED)
            }
            _ => Err(StratusError::UNKNOWN_RESOURCE),
        }
    }

    /// Borrow a graph-owned buffer
    pub fn get_buffer(&self, name: &str) -> Result<&Buffer> {
        let id = self.resolve(name)?;
        match &self.g_resources[id].kind {
            ResourceKind::Buffer { physical, .. } => {
                physical.as_ref().ok_or(StratusError::GRAPH_NOT_BAKED)
            }
            _ => Err(StratusError::UNKNOWN_RESOURCE),
        }
    }

    /// The vkImage behind an image resource for the current frame
    fn resource_image(&self, res: ResourceId, sc: &Swapchain) -> vk::Image {
        match &self.g_resources[res].kind {
            ResourceKind::Backbuffer => sc.current_image(),
            ResourceKind::Image { physical, .. } => physical.as_ref().unwrap().i_image,
            _ => panic!("Resource is not an image"),
        }
    }

    fn resource_buffer(&self, res: ResourceId) -> vk::Buffer {
        match &self.g_resources[res].kind {
            ResourceKind::Buffer { physical, .. } => physical.as_ref().unwrap().b_buffer,
            ResourceKind::ExternalBuffer { buffer } => *buffer,
            _ => panic!("Resource is not a buffer"),
        }
    }

    fn resource_aspect(&self, res: ResourceId) -> vk::ImageAspectFlags {
        match &self.g_resources[res].kind {
            ResourceKind::Backbuffer => vk::ImageAspectFlags::COLOR,
            ResourceKind::Image { physical, .. } => physical.as_ref().unwrap().i_aspect,
            _ => panic!("Resource is not an image"),
        }
    }

    /// Record one pass's entry barrier batch
    fn record_barriers(&self, cbuf: &CmdBuffer, batch: &[BarrierSpec], sc: &Swapchain) {
        if batch.is_empty() {
            return;
        }

        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();

        for spec in batch.iter() {
            src_stage |= spec.src_stage;
            dst_stage |= spec.dst_stage;

            if spec.is_image {
                image_barriers.push(
                    vk::ImageMemoryBarrier::builder()
                        .image(self.resource_image(spec.resource, sc))
                        .src_access_mask(spec.src_access)
                        .dst_access_mask(spec.dst_access)
                        .old_layout(spec.old_layout)
                        .new_layout(spec.new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .subresource_range(
                            vk::ImageSubresourceRange::builder()
                                .aspect_mask(self.resource_aspect(spec.resource))
                                .level_count(vk::REMAINING_MIP_LEVELS)
                                .layer_count(vk::REMAINING_ARRAY_LAYERS)
                                .build(),
                        )
                        .build(),
                );
            } else {
                buffer_barriers.push(
                    vk::BufferMemoryBarrier::builder()
                        .buffer(self.resource_buffer(spec.resource))
                        .src_access_mask(spec.src_access)
                        .dst_access_mask(spec.dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                        .build(),
                );
            }
        }

        cbuf.pipeline_barriers(src_stage, dst_stage, &buffer_barriers, &image_barriers);
    }

    /// The clear values for a graphics pass, in attachment order
    fn clear_values(&self, id: PassId) -> Vec<vk::ClearValue> {
        let pass = &self.g_passes[id];
        let mut values = Vec::new();

        let color_count = pass
            .writes
            .iter()
            .filter(|(kind, _)| *kind == WriteKind::ColorAttachment)
            .count();
        for i in 0..color_count {
            let color = match pass.color_clearers.get(i).and_then(|c| c.as_ref()) {
                Some(clearer) => clearer(),
                None => vk::ClearColorValue::default(),
            };
            values.push(vk::ClearValue { color: color });
        }

        if pass
            .writes
            .iter()
            .any(|(kind, _)| *kind == WriteKind::DepthStencilAttachment)
        {
            let ds = match pass.depth_clearer.as_ref() {
                Some(clearer) => clearer(),
                None => vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            };
            values.push(vk::ClearValue { depth_stencil: ds });
        }

        values
    }

    /// Record and submit one frame.
    ///
    /// Acquires the next swapchain image, replays the baked plan with
    /// the user's builder callbacks, and presents. Out-of-date
    /// swapchains are recreated and resized transparently.
    pub fn execute(&mut self, sc: &mut Swapchain) -> Result<()> {
        if self.g_schedule.is_none() {
            return Err(StratusError::GRAPH_NOT_BAKED);
        }

        // acquire, recovering from resizes invisibly
        loop {
            match sc.begin_frame() {
                Ok(()) => break,
                Err(StratusError::OUT_OF_DATE) => {
                    sc.recreate()?;
                    self.on_resize(sc)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.g_dev.begin_descriptor_frame();

        let schedule = self.g_schedule.take().unwrap();
        let frame = sc.frame_index();
        let last_sub = schedule.submissions.len() - 1;

        // the frame's cbufs move out for the recording loop so the
        // builder callbacks can borrow self mutably through them
        let mut frame_cbufs = std::mem::take(&mut self.g_cbufs[frame]);
        let mut sc_cbuf = sc.take_frame_cbuf();

        for (sub_idx, sub) in schedule.submissions.iter().enumerate() {
            let cbuf = match frame_cbufs[sub_idx].as_mut() {
                Some(c) => c,
                None => &mut sc_cbuf,
            };
            cbuf.begin();

            for order_idx in sub.range.clone() {
                let id = schedule.order[order_idx];

                self.record_barriers(cbuf, &schedule.barriers[order_idx], sc);

                // compute and attachment-less passes record outside
                // any render pass
                let in_render_pass = self.g_physical[id].state.is_some();
                if in_render_pass {
                    let physical = &self.g_physical[id];
                    let state = physical.state.as_ref().unwrap();
                    let framebuffer = match physical.uses_backbuffer {
                        true => physical.framebuffers[sc.image_index() as usize],
                        false => physical.framebuffers[0],
                    };
                    let clears = self.clear_values(id);
                    cbuf.begin_render_pass(state, framebuffer, &clears);
                }

                if let Some(mut builder) = self.g_passes[id].builder.take() {
                    builder(cbuf);
                    self.g_passes[id].builder = Some(builder);
                }

                if in_render_pass {
                    cbuf.end_render_pass();
                }
            }

            cbuf.end();

            // chain submissions: the first waits on the swapchain
            // acquire, queue changes wait on boundary semaphores, the
            // last signals present and the frame fence
            let mut wait_semas = Vec::new();
            let mut wait_stages = Vec::new();
            if sub_idx == 0 {
                if let Some(sema) = sc.image_available_sema() {
                    wait_semas.push(sema);
                    // compute queues cannot wait at the attachment stage
                    wait_stages.push(match sub.queue {
                        QueueType::Graphics => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                        _ => vk::PipelineStageFlags::ALL_COMMANDS,
                    });
                }
            } else {
                wait_semas.push(self.g_semaphores[frame][sub_idx - 1]);
                wait_stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
            }

            let mut signal_semas = Vec::new();
            if sub_idx < last_sub {
                signal_semas.push(self.g_semaphores[frame][sub_idx]);
            } else if let Some(sema) = sc.render_complete_sema() {
                signal_semas.push(sema);
            }

            let fence = match sub_idx == last_sub {
                true => sc.frame_fence(),
                false => vk::Fence::null(),
            };

            self.g_dev.submit_raw(
                cbuf.cb_cbuf,
                sub.queue,
                &wait_semas,
                &wait_stages,
                &signal_semas,
                fence,
            );
        }

        sc.put_frame_cbuf(sc_cbuf);
        self.g_cbufs[frame] = frame_cbufs;
        self.g_schedule = Some(schedule);

        // present, recovering from resizes invisibly
        match sc.present() {
            Ok(()) => Ok(()),
            Err(StratusError::OUT_OF_DATE) => {
                sc.recreate()?;
                self.on_resize(sc)
            }
            Err(e) => Err(e),
        }
    }

    /// Block until every in-flight frame has completed
    pub fn wait_all(&self) {
        self.g_dev.wait_idle();
    }

    /// Tear down everything realize created
    fn destroy_physical(&mut self) {
        if self.g_physical.is_empty() && self.g_cbufs.is_empty() && self.g_semaphores.is_empty() {
            return;
        }

        self.g_dev.wait_idle();

        unsafe {
            for pass in self.g_physical.drain(..) {
                for fb in pass.framebuffers {
                    self.g_dev.dev.destroy_framebuffer(fb, None);
                }
                if let Some(rp) = pass.render_pass {
                    self.g_dev.dev.destroy_render_pass(rp, None);
                }
            }

            for frame_semas in self.g_semaphores.drain(..) {
                for sema in frame_semas {
                    self.g_dev.dev.destroy_semaphore(sema, None);
                }
            }
        }

        for frame_cbufs in self.g_cbufs.drain(..) {
            for cbuf in frame_cbufs.into_iter().flatten() {
                self.g_dev.free_cmd_buffer(cbuf);
            }
        }
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        self.destroy_physical();

        for res in self.g_resources.drain(..) {
            match res.kind {
                ResourceKind::Image {
                    physical: Some(image),
                    ..
                } => self.g_dev.destroy_image(image),
                ResourceKind::Buffer {
                    physical: Some(buffer),
                    ..
                } => self.g_dev.destroy_buffer(buffer),
                _ => {}
            }
        }
    }
}
