// Image samplers
//
// Samplers filter data from an image when it is referenced from a
// shader. They are immutable once created and freely shared between
// descriptor sets.

use ash::vk;

use crate::{Device, Result, StratusError};

pub struct SamplerCreateInfo {
    pub anisotropy: bool,
    pub max_lod: f32,
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerCreateInfo {
    fn default() -> Self {
        Self {
            anisotropy: false,
            max_lod: 0.0,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        }
    }
}

pub struct Sampler {
    pub(crate) s_sampler: vk::Sampler,
}

impl Device {
    pub fn create_sampler(&self, info: &SamplerCreateInfo) -> Result<Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            // filter for magnified (oversampled) pixels
            .mag_filter(info.mag_filter)
            // filter for minified (undersampled) pixels
            .min_filter(info.min_filter)
            .address_mode_u(info.address_mode)
            .address_mode_v(info.address_mode)
            .address_mode_w(info.address_mode)
            .anisotropy_enable(info.anisotropy)
            .max_anisotropy(match info.anisotropy {
                true => self.pdev_props.limits.max_sampler_anisotropy,
                false => 1.0,
            })
            .border_color(info.border_color)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(info.max_lod);

        let sampler = unsafe {
            self.dev
                .create_sampler(&create_info, None)
                .or(Err(StratusError::INVALID))?
        };

        Ok(Sampler { s_sampler: sampler })
    }

    pub fn destroy_sampler(&self, sampler: Sampler) {
        unsafe { self.dev.destroy_sampler(sampler.s_sampler, None) };
    }
}
