// GPU buffer resources
//
// Buffers are typed by their usage and memory class. Host buffers can
// be mapped for direct writes, device buffers are filled through the
// one-shot staged upload path on the Device.

use ash::vk;

use crate::device::find_memory_type_index;
use crate::{Device, Result, StratusError};

bitflags::bitflags! {
    pub struct BufferUsage: u32 {
        const VERTEX = 1;
        const INDEX = 2;
        const UNIFORM = 4;
        const STORAGE = 8;
        const TRANSFER_SRC = 16;
        const TRANSFER_DST = 32;
    }
}

/// Where the buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMemory {
    /// Host visible and coherent, mappable
    Host,
    /// Device local, filled by transfer
    Device,
}

pub struct BufferCreateInfo {
    pub usage: BufferUsage,
    pub memory: BufferMemory,
    pub size: u64,
}

/// A typed GPU buffer handle
///
/// Destroyed explicitly through Device::destroy_buffer.
pub struct Buffer {
    pub(crate) b_buffer: vk::Buffer,
    pub(crate) b_mem: vk::DeviceMemory,
    pub(crate) b_size: u64,
    b_memory: BufferMemory,
    b_mapping: Option<*mut u8>,
}

// the mapping is only written through &mut
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.b_size
    }
}

fn usage_to_vk(usage: BufferUsage, memory: BufferMemory) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    // device local buffers are always filled by transfer
    if memory == BufferMemory::Device {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    flags
}

impl Device {
    /// Create a buffer and bind fresh memory of the requested class.
    pub fn create_buffer(&self, info: &BufferCreateInfo) -> Result<Buffer> {
        let mem_flags = match info.memory {
            BufferMemory::Host => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            BufferMemory::Device => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };

        let create_info = vk::BufferCreateInfo::builder()
            .size(info.size)
            .usage(usage_to_vk(info.usage, info.memory))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        unsafe {
            let buffer = self
                .dev
                .create_buffer(&create_info, None)
                .or(Err(StratusError::COULD_NOT_CREATE_BUFFER))?;
            let reqs = self.dev.get_buffer_memory_requirements(buffer);
            let memtype = find_memory_type_index(&self.mem_props, &reqs, mem_flags)
                .ok_or(StratusError::OUT_OF_MEMORY)?;

            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(reqs.size)
                .memory_type_index(memtype);
            let mem = self
                .dev
                .allocate_memory(&alloc_info, None)
                .or(Err(StratusError::OUT_OF_MEMORY))?;
            self.dev
                .bind_buffer_memory(buffer, mem, 0)
                .or(Err(StratusError::OUT_OF_MEMORY))?;

            Ok(Buffer {
                b_buffer: buffer,
                b_mem: mem,
                b_size: info.size,
                b_memory: info.memory,
                b_mapping: None,
            })
        }
    }

    /// Map a host visible buffer, returning the write pointer.
    ///
    /// The mapping persists until unmap_buffer, repeated calls return
    /// the same pointer.
    pub fn map_buffer(&self, buffer: &mut Buffer) -> *mut u8 {
        assert!(buffer.b_memory == BufferMemory::Host);

        if let Some(ptr) = buffer.b_mapping {
            return ptr;
        }

        let ptr = unsafe {
            self.dev
                .map_memory(buffer.b_mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .expect("Could not map host visible buffer") as *mut u8
        };
        buffer.b_mapping = Some(ptr);

        ptr
    }

    pub fn unmap_buffer(&self, buffer: &mut Buffer) {
        if buffer.b_mapping.take().is_some() {
            unsafe { self.dev.unmap_memory(buffer.b_mem) };
        }
    }

    /// Explicitly destroy a buffer and its memory.
    ///
    /// The caller is responsible for the buffer not being in flight.
    pub fn destroy_buffer(&self, mut buffer: Buffer) {
        self.unmap_buffer(&mut buffer);
        unsafe {
            self.dev.destroy_buffer(buffer.b_buffer, None);
            self.dev.free_memory(buffer.b_mem, None);
        }
    }
}
