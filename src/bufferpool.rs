// Transient buffer sub-allocator pools
//
// Dynamic uniform, vertex, and index data recorded into command
// buffers is carved out of fixed size blocks with a bump allocator.
// Blocks are leased to a command buffer for its lifetime and recycled
// back here when it is freed, so steady state rendering allocates
// nothing.

use ash::vk;

use crate::device::find_memory_type_index;
use crate::{Result, StratusError};

/// Round `size` up to the next multiple of `align`
pub(crate) fn round_up(size: u64, align: u64) -> u64 {
    (size + align - 1) & !(align - 1)
}

/// One fixed-size backing buffer, persistently mapped.
///
/// The write offset only ever moves forward; `reset` rewinds it when
/// the owning command buffer finishes recording.
pub(crate) struct BufferBlock {
    pub(crate) bb_buffer: vk::Buffer,
    pub(crate) bb_mem: vk::DeviceMemory,
    pub(crate) bb_mapping: *mut u8,
    pub(crate) bb_size: u64,
    pub(crate) bb_offset: u64,
    pub(crate) bb_alignment: u64,
}

// Blocks travel with command buffers, which may be recorded from
// worker threads, and sit in the device pools behind its lock. The
// mapping is only ever written through &mut.
unsafe impl Send for BufferBlock {}
unsafe impl Sync for BufferBlock {}

/// A sub-range handed out by `BufferBlock::allocate`
pub(crate) struct BlockAllocation {
    pub(crate) ba_buffer: vk::Buffer,
    pub(crate) ba_mapping: *mut u8,
    pub(crate) ba_offset: u64,
    pub(crate) ba_padded_size: u64,
}

impl BufferBlock {
    /// Bump-allocate `size` bytes out of this block.
    ///
    /// Returns None if the block does not have enough room left, in
    /// which case the caller should lease a fresh block from the pool.
    pub(crate) fn allocate(&mut self, size: u64) -> Option<BlockAllocation> {
        let padded = round_up(size, self.bb_alignment);
        if self.bb_offset + padded > self.bb_size {
            return None;
        }

        let ret = BlockAllocation {
            ba_buffer: self.bb_buffer,
            ba_mapping: self.bb_mapping.wrapping_add(self.bb_offset as usize),
            ba_offset: self.bb_offset,
            ba_padded_size: padded,
        };
        self.bb_offset += padded;

        Some(ret)
    }

    /// Rewind the write offset so the block can be refilled.
    ///
    /// Only safe once the GPU is known to be done with the previous
    /// contents, which the frame fences guarantee.
    pub(crate) fn reset(&mut self) {
        self.bb_offset = 0;
    }
}

/// A pool of equally sized blocks for one usage (UBO, VBO, or IBO)
///
/// Lives inside the Device behind its lock. Lease hands a block to a
/// command buffer, recycle takes it back without freeing the backing
/// buffer.
pub(crate) struct BufferPool {
    bp_usage: vk::BufferUsageFlags,
    bp_block_size: u64,
    bp_alignment: u64,
    bp_spill_size: u64,
    bp_free: Vec<BufferBlock>,
}

impl BufferPool {
    pub(crate) fn new(
        usage: vk::BufferUsageFlags,
        block_size: u64,
        alignment: u64,
        spill_size: u64,
    ) -> Self {
        assert!(block_size >= alignment);
        assert!(alignment.is_power_of_two());

        Self {
            bp_usage: usage,
            bp_block_size: block_size,
            bp_alignment: alignment,
            bp_spill_size: spill_size,
            bp_free: Vec::new(),
        }
    }

    /// Lease a block with room for at least `size` bytes.
    ///
    /// Prefers a recycled block. If none fits, a new backing buffer is
    /// created, sized `max(block_size, size + spill)` so oversized
    /// requests still leave some room for the allocations that follow.
    pub(crate) fn lease(
        &mut self,
        dev: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: u64,
    ) -> Result<BufferBlock> {
        let padded = round_up(size, self.bp_alignment);

        if let Some(pos) = self.bp_free.iter().position(|b| b.bb_size >= padded) {
            return Ok(self.bp_free.swap_remove(pos));
        }

        let backing_size = std::cmp::max(self.bp_block_size, padded + self.bp_spill_size);

        let create_info = vk::BufferCreateInfo::builder()
            .size(backing_size)
            .usage(self.bp_usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        unsafe {
            let buffer = dev
                .create_buffer(&create_info, None)
                .or(Err(StratusError::COULD_NOT_CREATE_BUFFER))?;
            let reqs = dev.get_buffer_memory_requirements(buffer);
            let memtype = find_memory_type_index(
                mem_props,
                &reqs,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .ok_or(StratusError::OUT_OF_MEMORY)?;

            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(reqs.size)
                .memory_type_index(memtype);
            let mem = dev
                .allocate_memory(&alloc_info, None)
                .or(Err(StratusError::OUT_OF_MEMORY))?;
            dev.bind_buffer_memory(buffer, mem, 0)
                .or(Err(StratusError::OUT_OF_MEMORY))?;

            // the backing buffer stays mapped for its entire life
            let mapping = dev
                .map_memory(mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .or(Err(StratusError::OUT_OF_MEMORY))? as *mut u8;

            Ok(BufferBlock {
                bb_buffer: buffer,
                bb_mem: mem,
                bb_mapping: mapping,
                bb_size: backing_size,
                bb_offset: 0,
                bb_alignment: self.bp_alignment,
            })
        }
    }

    /// Return a block to the free list. The backing buffer survives.
    pub(crate) fn recycle(&mut self, mut block: BufferBlock) {
        block.reset();
        self.bp_free.push(block);
    }

    /// Explicit destructor
    ///
    /// All leased blocks must have been recycled first, which freeing
    /// every command buffer does.
    pub(crate) fn destroy(&mut self, dev: &ash::Device) {
        unsafe {
            for block in self.bp_free.drain(..) {
                dev.unmap_memory(block.bb_mem);
                dev.destroy_buffer(block.bb_buffer, None);
                dev.free_memory(block.bb_mem, None);
            }
        }
    }
}
