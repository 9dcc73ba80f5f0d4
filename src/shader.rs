// Shader modules and SPIR-V reflection
//
// Pipelines are created from raw SPIR-V blobs and everything else is
// derived here: the shader stage, the descriptor bindings per set, the
// push constant ranges, and the vertex input layout. The reflector
// walks the SPIR-V word stream directly, it only needs the type,
// decoration, and variable instructions.

use ash::vk;

use crate::{Device, Result, StratusError, MAX_DESCRIPTOR_BINDINGS, MAX_DESCRIPTOR_SETS};

use std::collections::HashMap;

const SPIRV_MAGIC: u32 = 0x0723_0203;

// the opcodes we care about
const OP_ENTRY_POINT: u16 = 15;
const OP_TYPE_INT: u16 = 21;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_VECTOR: u16 = 23;
const OP_TYPE_MATRIX: u16 = 24;
const OP_TYPE_IMAGE: u16 = 25;
const OP_TYPE_SAMPLER: u16 = 26;
const OP_TYPE_SAMPLED_IMAGE: u16 = 27;
const OP_TYPE_ARRAY: u16 = 28;
const OP_TYPE_RUNTIME_ARRAY: u16 = 29;
const OP_TYPE_STRUCT: u16 = 30;
const OP_TYPE_POINTER: u16 = 32;
const OP_CONSTANT: u16 = 43;
const OP_VARIABLE: u16 = 59;
const OP_DECORATE: u16 = 71;
const OP_MEMBER_DECORATE: u16 = 72;

// decorations
const DEC_ARRAY_STRIDE: u32 = 6;
const DEC_BUILT_IN: u32 = 11;
const DEC_LOCATION: u32 = 30;
const DEC_BINDING: u32 = 33;
const DEC_DESCRIPTOR_SET: u32 = 34;
const DEC_OFFSET: u32 = 35;
const DEC_BLOCK: u32 = 2;
const DEC_BUFFER_BLOCK: u32 = 3;

// storage classes
const SC_UNIFORM_CONSTANT: u32 = 0;
const SC_INPUT: u32 = 1;
const SC_UNIFORM: u32 = 2;
const SC_PUSH_CONSTANT: u32 = 9;
const SC_STORAGE_BUFFER: u32 = 12;

/// Descriptor bindings of one set, in binding order
#[derive(Debug, Clone)]
pub(crate) struct SetInfo {
    pub(crate) index: u32,
    pub(crate) bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

/// One vertex input attribute, listed in location order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VertexAttribute {
    pub(crate) format: vk::Format,
    pub(crate) size: u32,
}

/// Everything reflection pulls out of a shader binary
#[derive(Debug, Clone)]
pub(crate) struct ShaderInfo {
    pub(crate) stage: vk::ShaderStageFlags,
    pub(crate) sets: Vec<SetInfo>,
    pub(crate) push_constants: Vec<vk::PushConstantRange>,
    pub(crate) vertex_attributes: Vec<VertexAttribute>,
}

/// A reflected shader module
pub(crate) struct Shader {
    pub(crate) sh_module: vk::ShaderModule,
    pub(crate) sh_info: ShaderInfo,
}

impl Shader {
    pub(crate) fn new(dev: &Device, code: &[u8]) -> Result<Self> {
        let words = spirv_words(code)?;
        let info = reflect_words(&words)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words).build();
        let module = unsafe {
            dev.dev
                .create_shader_module(&create_info, None)
                .or(Err(StratusError::INVALID_SPIRV))?
        };

        Ok(Self {
            sh_module: module,
            sh_info: info,
        })
    }

    pub(crate) fn destroy(&self, dev: &Device) {
        unsafe { dev.dev.destroy_shader_module(self.sh_module, None) };
    }
}

/// Turn a little-endian SPIR-V byte blob into its word stream.
///
/// Big endian modules are byteswapped based on the magic number.
pub(crate) fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    if code.len() < 20 || code.len() % 4 != 0 {
        return Err(StratusError::INVALID_SPIRV);
    }

    let words: Vec<u32> = match (code[0], code[1], code[2], code[3]) {
        (0x03, 0x02, 0x23, 0x07) => code
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (0x07, 0x23, 0x02, 0x03) => code
            .chunks(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        _ => return Err(StratusError::INVALID_SPIRV),
    };

    if words[0] != SPIRV_MAGIC {
        return Err(StratusError::INVALID_SPIRV);
    }

    Ok(words)
}

#[derive(Debug, Clone)]
enum Ty {
    Int { width: u32 },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    // sampled: 1 means sampled, 2 means storage
    Image { sampled: u32 },
    Sampler,
    SampledImage,
    Array { elem: u32, length_id: u32 },
    RuntimeArray { elem: u32 },
    Struct { members: Vec<u32> },
    Pointer { storage_class: u32, pointee: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
struct Decorations {
    set: Option<u32>,
    binding: Option<u32>,
    location: Option<u32>,
    builtin: bool,
    block: bool,
    buffer_block: bool,
    array_stride: Option<u32>,
}

struct Variable {
    id: u32,
    type_id: u32,
    storage_class: u32,
}

struct Reflector {
    stage: Option<vk::ShaderStageFlags>,
    types: HashMap<u32, Ty>,
    constants: HashMap<u32, u32>,
    decorations: HashMap<u32, Decorations>,
    member_offsets: HashMap<u32, Vec<(u32, u32)>>,
    variables: Vec<Variable>,
}

impl Reflector {
    fn decoration(&self, id: u32) -> Decorations {
        self.decorations.get(&id).copied().unwrap_or_default()
    }

    /// Byte size of a type, following Offset/ArrayStride decorations
    /// where the module provides them.
    fn type_size(&self, id: u32) -> u32 {
        match self.types.get(&id) {
            Some(Ty::Int { width }) | Some(Ty::Float { width }) => width / 8,
            Some(Ty::Vector { component, count }) => self.type_size(*component) * count,
            Some(Ty::Matrix { column, count }) => self.type_size(*column) * count,
            Some(Ty::Array { elem, length_id }) => {
                let len = self.constants.get(length_id).copied().unwrap_or(1);
                let stride = self
                    .decoration(id)
                    .array_stride
                    .unwrap_or_else(|| self.type_size(*elem));
                stride * len
            }
            Some(Ty::Struct { members }) => {
                let offsets = self.member_offsets.get(&id);
                members
                    .iter()
                    .enumerate()
                    .map(|(i, m)| {
                        let off = offsets
                            .and_then(|offs| {
                                offs.iter().find(|(mi, _)| *mi == i as u32).map(|(_, o)| *o)
                            })
                            .unwrap_or(0);
                        off + self.type_size(*m)
                    })
                    .max()
                    .unwrap_or(0)
            }
            _ => 4,
        }
    }

    /// The byte range a push constant block covers: the block's lowest
    /// member offset and the size from there to the end of the block.
    /// A block shared across stages may well not start at zero.
    fn push_constant_range(&self, id: u32) -> (u32, u32) {
        let members = match self.types.get(&id) {
            Some(Ty::Struct { members }) => members,
            _ => return (0, self.type_size(id)),
        };

        let offsets = self.member_offsets.get(&id);
        let member_offset = |i: usize| {
            offsets
                .and_then(|offs| offs.iter().find(|(mi, _)| *mi == i as u32).map(|(_, o)| *o))
                .unwrap_or(0)
        };

        let start = (0..members.len()).map(|i| member_offset(i)).min().unwrap_or(0);
        let end = members
            .iter()
            .enumerate()
            .map(|(i, m)| member_offset(i) + self.type_size(*m))
            .max()
            .unwrap_or(0);

        (start, end - start)
    }

    /// Peel array wrappers off a descriptor's type, returning the
    /// element type and the descriptor count.
    fn peel_arrays(&self, mut id: u32) -> (u32, u32) {
        let mut count = 1;
        loop {
            match self.types.get(&id) {
                Some(Ty::Array { elem, length_id }) => {
                    count *= self.constants.get(length_id).copied().unwrap_or(1);
                    id = *elem;
                }
                Some(Ty::RuntimeArray { elem }) => {
                    id = *elem;
                }
                _ => return (id, count),
            }
        }
    }

    /// Classify the descriptor type of a resource variable.
    ///
    /// Uniform buffers are promoted to the dynamic variant here so
    /// draw-time offsets can be supplied without re-allocating sets.
    fn descriptor_type(&self, var: &Variable, pointee: u32) -> Option<vk::DescriptorType> {
        let dec = self.decoration(pointee);

        match self.types.get(&pointee)? {
            Ty::SampledImage => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            Ty::Sampler => Some(vk::DescriptorType::SAMPLER),
            Ty::Image { sampled } => match sampled {
                2 => Some(vk::DescriptorType::STORAGE_IMAGE),
                _ => Some(vk::DescriptorType::SAMPLED_IMAGE),
            },
            Ty::Struct { .. } => match var.storage_class {
                SC_STORAGE_BUFFER => Some(vk::DescriptorType::STORAGE_BUFFER),
                SC_UNIFORM if dec.buffer_block => Some(vk::DescriptorType::STORAGE_BUFFER),
                SC_UNIFORM if dec.block => Some(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
                _ => None,
            },
            _ => None,
        }
    }

    /// Vertex input format from a scalar or vector input type
    fn attribute_format(&self, id: u32) -> Option<(vk::Format, u32)> {
        let (signed_int, count) = match self.types.get(&id)? {
            Ty::Float { .. } => (None, 1),
            Ty::Int { .. } => (Some(true), 1),
            Ty::Vector { component, count } => match self.types.get(component)? {
                Ty::Float { .. } => (None, *count),
                Ty::Int { .. } => (Some(true), *count),
                _ => return None,
            },
            _ => return None,
        };

        let format = match (signed_int, count) {
            (None, 1) => vk::Format::R32_SFLOAT,
            (None, 2) => vk::Format::R32G32_SFLOAT,
            (None, 3) => vk::Format::R32G32B32_SFLOAT,
            (None, 4) => vk::Format::R32G32B32A32_SFLOAT,
            (Some(_), 1) => vk::Format::R32_SINT,
            (Some(_), 2) => vk::Format::R32G32_SINT,
            (Some(_), 3) => vk::Format::R32G32B32_SINT,
            (Some(_), 4) => vk::Format::R32G32B32A32_SINT,
            _ => return None,
        };

        Some((format, count * 4))
    }
}

/// Reflect a SPIR-V word stream.
///
/// Extracts the stage, the per-set descriptor bindings with stage
/// flags set, the push constant ranges, and for vertex shaders the
/// input attributes in location order.
pub(crate) fn reflect_words(words: &[u32]) -> Result<ShaderInfo> {
    let mut r = Reflector {
        stage: None,
        types: HashMap::new(),
        constants: HashMap::new(),
        decorations: HashMap::new(),
        member_offsets: HashMap::new(),
        variables: Vec::new(),
    };

    // instructions start after the 5 header words
    let mut i = 5;
    while i < words.len() {
        let opcode = (words[i] & 0xffff) as u16;
        let word_count = (words[i] >> 16) as usize;
        if word_count < 1 || i + word_count > words.len() {
            return Err(StratusError::INVALID_SPIRV);
        }
        let operands = &words[i + 1..i + word_count];

        match opcode {
            OP_ENTRY_POINT => {
                if r.stage.is_none() {
                    r.stage = Some(match operands[0] {
                        0 => vk::ShaderStageFlags::VERTEX,
                        1 => vk::ShaderStageFlags::TESSELLATION_CONTROL,
                        2 => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
                        3 => vk::ShaderStageFlags::GEOMETRY,
                        4 => vk::ShaderStageFlags::FRAGMENT,
                        5 => vk::ShaderStageFlags::COMPUTE,
                        _ => return Err(StratusError::INVALID_SPIRV),
                    });
                }
            }
            OP_TYPE_INT => {
                r.types.insert(operands[0], Ty::Int { width: operands[1] });
            }
            OP_TYPE_FLOAT => {
                r.types
                    .insert(operands[0], Ty::Float { width: operands[1] });
            }
            OP_TYPE_VECTOR => {
                r.types.insert(
                    operands[0],
                    Ty::Vector {
                        component: operands[1],
                        count: operands[2],
                    },
                );
            }
            OP_TYPE_MATRIX => {
                r.types.insert(
                    operands[0],
                    Ty::Matrix {
                        column: operands[1],
                        count: operands[2],
                    },
                );
            }
            OP_TYPE_IMAGE => {
                r.types.insert(
                    operands[0],
                    Ty::Image {
                        sampled: operands[6],
                    },
                );
            }
            OP_TYPE_SAMPLER => {
                r.types.insert(operands[0], Ty::Sampler);
            }
            OP_TYPE_SAMPLED_IMAGE => {
                r.types.insert(operands[0], Ty::SampledImage);
            }
            OP_TYPE_ARRAY => {
                r.types.insert(
                    operands[0],
                    Ty::Array {
                        elem: operands[1],
                        length_id: operands[2],
                    },
                );
            }
            OP_TYPE_RUNTIME_ARRAY => {
                r.types
                    .insert(operands[0], Ty::RuntimeArray { elem: operands[1] });
            }
            OP_TYPE_STRUCT => {
                r.types.insert(
                    operands[0],
                    Ty::Struct {
                        members: operands[1..].to_vec(),
                    },
                );
            }
            OP_TYPE_POINTER => {
                r.types.insert(
                    operands[0],
                    Ty::Pointer {
                        storage_class: operands[1],
                        pointee: operands[2],
                    },
                );
            }
            OP_CONSTANT => {
                // only scalar 32-bit constants matter here (array sizes)
                if operands.len() >= 3 {
                    r.constants.insert(operands[1], operands[2]);
                }
            }
            OP_VARIABLE => {
                r.variables.push(Variable {
                    type_id: operands[0],
                    id: operands[1],
                    storage_class: operands[2],
                });
            }
            OP_DECORATE => {
                let dec = r.decorations.entry(operands[0]).or_default();
                match operands[1] {
                    DEC_DESCRIPTOR_SET => dec.set = Some(operands[2]),
                    DEC_BINDING => dec.binding = Some(operands[2]),
                    DEC_LOCATION => dec.location = Some(operands[2]),
                    DEC_BUILT_IN => dec.builtin = true,
                    DEC_BLOCK => dec.block = true,
                    DEC_BUFFER_BLOCK => dec.buffer_block = true,
                    DEC_ARRAY_STRIDE => dec.array_stride = Some(operands[2]),
                    _ => {}
                }
            }
            OP_MEMBER_DECORATE => {
                if operands[2] == DEC_OFFSET {
                    r.member_offsets
                        .entry(operands[0])
                        .or_default()
                        .push((operands[1], operands[3]));
                }
            }
            _ => {}
        }

        i += word_count;
    }

    let stage = r.stage.ok_or(StratusError::INVALID_SPIRV)?;

    let mut sets: Vec<SetInfo> = Vec::new();
    let mut push_constants: Vec<vk::PushConstantRange> = Vec::new();
    let mut attributes: Vec<(u32, VertexAttribute)> = Vec::new();

    for var in r.variables.iter() {
        let (storage_class, pointee) = match r.types.get(&var.type_id) {
            Some(Ty::Pointer {
                storage_class,
                pointee,
            }) => (*storage_class, *pointee),
            _ => continue,
        };
        let dec = r.decoration(var.id);

        match storage_class {
            SC_PUSH_CONSTANT => {
                let (offset, size) = r.push_constant_range(pointee);
                push_constants.push(
                    vk::PushConstantRange::builder()
                        .stage_flags(stage)
                        .offset(offset)
                        .size(size)
                        .build(),
                );
            }
            SC_INPUT if stage == vk::ShaderStageFlags::VERTEX => {
                if dec.builtin {
                    continue;
                }
                let location = match dec.location {
                    Some(l) => l,
                    None => continue,
                };
                if let Some((format, size)) = r.attribute_format(pointee) {
                    attributes.push((
                        location,
                        VertexAttribute {
                            format: format,
                            size: size,
                        },
                    ));
                }
            }
            SC_UNIFORM_CONSTANT | SC_UNIFORM | SC_STORAGE_BUFFER => {
                let (set_index, binding_index) = match (dec.set, dec.binding) {
                    (Some(s), Some(b)) => (s, b),
                    _ => continue,
                };
                assert!(
                    (set_index as usize) < MAX_DESCRIPTOR_SETS
                        && (binding_index as usize) < MAX_DESCRIPTOR_BINDINGS
                );

                let (elem, count) = r.peel_arrays(pointee);
                let desc_type = match r.descriptor_type(var, elem) {
                    Some(t) => t,
                    None => continue,
                };

                let binding = vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding_index)
                    .descriptor_type(desc_type)
                    .descriptor_count(count)
                    .stage_flags(stage)
                    .build();

                match sets.iter_mut().find(|s| s.index == set_index) {
                    Some(set) => set.bindings.push(binding),
                    None => sets.push(SetInfo {
                        index: set_index,
                        bindings: vec![binding],
                    }),
                }
            }
            _ => {}
        }
    }

    sets.sort_by_key(|s| s.index);
    for set in sets.iter_mut() {
        set.bindings.sort_by_key(|b| b.binding);
    }
    attributes.sort_by_key(|(location, _)| *location);

    Ok(ShaderInfo {
        stage: stage,
        sets: sets,
        push_constants: push_constants,
        vertex_attributes: attributes.into_iter().map(|(_, a)| a).collect(),
    })
}
