// An allocator for descriptor sets
//
// Each pipeline layout gets one of these per set index. Sets are
// content addressed: the command buffer hashes what it bound and
// identical contents within a frame get the same set back instead of
// a fresh allocation. Pages of sets are pre-allocated from backing
// descriptor pools and recycled wholesale at frame boundaries.

use ash::vk::{self, Handle};
use fxhash::FxHasher64;

use crate::MAX_DESCRIPTOR_BINDINGS;

use std::collections::HashMap;
use std::hash::Hasher;

/// Number of descriptor sets pre-allocated per page
pub(crate) const SETS_PER_PAGE: u32 = 16;

/// A GPU-side reference to one resource, bound at a (set, binding)
/// slot in the command buffer. Slots start Empty and are filled by the
/// bind_* calls.
#[derive(Debug, Clone, Copy)]
pub enum Descriptor {
    Empty,
    /// Sampler, view, and layout; which fields matter depends on the
    /// binding's descriptor type
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
}

// the vk info structs don't derive comparison, so spell out the
// field-by-field equality the cache's full-key compare needs
impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Descriptor::Empty, Descriptor::Empty) => true,
            (Descriptor::Image(a), Descriptor::Image(b)) => {
                a.sampler == b.sampler
                    && a.image_view == b.image_view
                    && a.image_layout == b.image_layout
            }
            (Descriptor::Buffer(a), Descriptor::Buffer(b)) => {
                a.buffer == b.buffer && a.offset == b.offset && a.range == b.range
            }
            _ => false,
        }
    }
}

/// The raw layout the descriptor update template reads. Matches the
/// original VkDescriptorImageInfo/VkDescriptorBufferInfo overlay.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union DescriptorData {
    pub(crate) image: vk::DescriptorImageInfo,
    pub(crate) buffer: vk::DescriptorBufferInfo,
}

impl Descriptor {
    pub(crate) fn lower(&self) -> DescriptorData {
        match self {
            Descriptor::Empty => unsafe { std::mem::zeroed() },
            Descriptor::Image(info) => DescriptorData { image: *info },
            Descriptor::Buffer(info) => DescriptorData { buffer: *info },
        }
    }
}

/// Content hash over the bound descriptors of one set.
///
/// Collisions land in the page hash maps where they are treated as
/// plain lookup misses by the command buffer's change detection.
pub(crate) fn hash_descriptors(descs: &[Descriptor]) -> u64 {
    let mut hasher = FxHasher64::default();

    for desc in descs {
        match desc {
            Descriptor::Empty => hasher.write_u64(0),
            Descriptor::Image(info) => {
                hasher.write_u64(1);
                hasher.write_u64(info.sampler.as_raw());
                hasher.write_u64(info.image_view.as_raw());
                hasher.write_i32(info.image_layout.as_raw());
            }
            Descriptor::Buffer(info) => {
                hasher.write_u64(2);
                hasher.write_u64(info.buffer.as_raw());
                hasher.write_u64(info.offset);
                hasher.write_u64(info.range);
            }
        }
    }

    hasher.finish()
}

/// One page of pre-allocated descriptor sets
struct Page {
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    /// next free slot, reset at frame boundaries
    allocated: u32,
    /// content hash -> slot index, for intra-frame reuse
    hashes: HashMap<u64, u32>,
    /// the descriptors each slot was written with, the full key a
    /// hash hit is checked against
    keys: Vec<Vec<Descriptor>>,
}

/// Paged descriptor set allocator for one set layout
///
/// The set layout and update template stay owned by the pipeline
/// layout, this only owns the backing pools.
pub(crate) struct DescPool {
    dp_set_layout: vk::DescriptorSetLayout,
    dp_update_template: vk::DescriptorUpdateTemplate,
    dp_pool_sizes: Vec<vk::DescriptorPoolSize>,
    dp_pages: Vec<Page>,
}

impl DescPool {
    pub(crate) fn new(
        dev: &ash::Device,
        set_layout: vk::DescriptorSetLayout,
        update_template: vk::DescriptorUpdateTemplate,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Self {
        let pool_sizes: Vec<_> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorPoolSize::builder()
                    .ty(binding.descriptor_type)
                    .descriptor_count(binding.descriptor_count * SETS_PER_PAGE)
                    .build()
            })
            .collect();

        let mut ret = Self {
            dp_set_layout: set_layout,
            dp_update_template: update_template,
            dp_pool_sizes: pool_sizes,
            dp_pages: Vec::new(),
        };
        ret.add_page(dev);

        ret
    }

    /// Grow by one page of SETS_PER_PAGE pre-allocated sets
    fn add_page(&mut self, dev: &ash::Device) {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&self.dp_pool_sizes)
            .max_sets(SETS_PER_PAGE);
        let pool = unsafe { dev.create_descriptor_pool(&info, None).unwrap() };

        let layouts: Vec<_> = std::iter::repeat(self.dp_set_layout)
            .take(SETS_PER_PAGE as usize)
            .collect();
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts.as_slice())
            .build();
        let sets = unsafe { dev.allocate_descriptor_sets(&alloc_info).unwrap() };

        self.dp_pages.push(Page {
            pool: pool,
            sets: sets,
            allocated: 0,
            hashes: HashMap::new(),
            keys: vec![Vec::new(); SETS_PER_PAGE as usize],
        });
    }

    /// Get a descriptor set for the given contents.
    ///
    /// On a content hash hit the stored descriptors are compared
    /// against the requested ones and the existing set returned if
    /// they match; a hash collision is just a miss. On a miss the next
    /// free slot is claimed, written through the update template, and
    /// remembered under the hash.
    pub(crate) fn alloc(
        &mut self,
        dev: &ash::Device,
        descriptors: &[Descriptor],
        hash: u64,
    ) -> vk::DescriptorSet {
        assert!(descriptors.len() <= MAX_DESCRIPTOR_BINDINGS);

        for page in self.dp_pages.iter() {
            if let Some(&slot) = page.hashes.get(&hash) {
                if page.keys[slot as usize].as_slice() == descriptors {
                    return page.sets[slot as usize];
                }
            }
        }

        // find a page with a free slot, growing if they're all full
        if self
            .dp_pages
            .iter()
            .all(|page| page.allocated >= SETS_PER_PAGE)
        {
            self.add_page(dev);
        }
        let page = self
            .dp_pages
            .iter_mut()
            .find(|page| page.allocated < SETS_PER_PAGE)
            .unwrap();

        let slot = page.allocated;
        page.allocated += 1;
        page.hashes.insert(hash, slot);
        page.keys[slot as usize] = descriptors.to_vec();
        let set = page.sets[slot as usize];

        let mut data: [DescriptorData; MAX_DESCRIPTOR_BINDINGS] =
            [Descriptor::Empty.lower(); MAX_DESCRIPTOR_BINDINGS];
        for (i, desc) in descriptors.iter().enumerate() {
            data[i] = desc.lower();
        }

        unsafe {
            dev.update_descriptor_set_with_template(
                set,
                self.dp_update_template,
                data.as_ptr() as *const std::os::raw::c_void,
            );
        }

        set
    }

    /// Frame boundary: all sets become reusable, nothing is freed.
    pub(crate) fn begin_frame(&mut self) {
        for page in self.dp_pages.iter_mut() {
            page.allocated = 0;
            page.hashes.clear();
            for key in page.keys.iter_mut() {
                key.clear();
            }
        }
    }

    /// Explicit destructor. The sets die with their pools.
    pub(crate) fn destroy(&mut self, dev: &ash::Device) {
        unsafe {
            for page in self.dp_pages.drain(..) {
                dev.destroy_descriptor_pool(page.pool, None);
            }
        }
    }
}
