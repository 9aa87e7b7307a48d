use std::fmt;
use std::sync::Arc;

use crate::hal::SamplerId;
use crate::{Device, Result, RhiError};

#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    #[default]
    Point = 0,
    Linear = 1,
}

impl FilterMode {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Point),
            1 => Ok(Self::Linear),
            other => Err(RhiError::Sampler(format!("unsupported filter mode {other}"))),
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    Wrap = 0,
    Mirror = 1,
    Clamp = 2,
}

impl AddressMode {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Wrap),
            1 => Ok(Self::Mirror),
            2 => Ok(Self::Clamp),
            other => Err(RhiError::Sampler(format!("unsupported address mode {other}"))),
        }
    }

    /// Maps an integer texel coordinate onto `0..size`.
    pub fn resolve(self, coord: i64, size: u32) -> u32 {
        let size = i64::from(size.max(1));
        let resolved = match self {
            AddressMode::Wrap => coord.rem_euclid(size),
            AddressMode::Clamp => coord.clamp(0, size - 1),
            AddressMode::Mirror => {
                let period = coord.rem_euclid(size * 2);
                if period < size {
                    period
                } else {
                    size * 2 - 1 - period
                }
            }
        };
        resolved as u32
    }
}

/// Immutable sampling state. Defaults to point filtering with wrapping on every axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub filter_min: FilterMode,
    pub filter_mag: FilterMode,
}

impl SamplerDesc {
    pub fn new(address: AddressMode, filter: FilterMode) -> Self {
        Self {
            address_u: address,
            address_v: address,
            address_w: address,
            filter_min: filter,
            filter_mag: filter,
        }
    }
}

struct SamplerInner {
    device: Device,
    id: SamplerId,
    desc: SamplerDesc,
}

impl Drop for SamplerInner {
    fn drop(&mut self) {
        let id = self.id;
        self.device.release("sampler", |backend| backend.destroy_sampler(id));
    }
}

#[derive(Clone)]
pub struct Sampler {
    inner: Arc<SamplerInner>,
}

impl Sampler {
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.inner.desc
    }

    pub(crate) fn id(&self) -> SamplerId {
        self.inner.id
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("desc", &self.inner.desc)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Device {
    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<Sampler> {
        let id = self.with_backend(|backend| backend.create_sampler(desc))?;
        tracing::debug!(device = %self.label(), ?desc, ?id, "created sampler");
        Ok(Sampler {
            inner: Arc::new(SamplerInner {
                device: self.clone(),
                id,
                desc: *desc,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_repeats() {
        let resolved: Vec<u32> = (-3..7).map(|c| AddressMode::Wrap.resolve(c, 4)).collect();
        assert_eq!(resolved, vec![1, 2, 3, 0, 1, 2, 3, 0, 1, 2]);
    }

    #[test]
    fn mirror_reflects_at_edges() {
        let resolved: Vec<u32> = (-3..7).map(|c| AddressMode::Mirror.resolve(c, 4)).collect();
        assert_eq!(resolved, vec![2, 1, 0, 0, 1, 2, 3, 3, 2, 1]);
    }

    #[test]
    fn clamp_sticks_to_edges() {
        assert_eq!(AddressMode::Clamp.resolve(-5, 4), 0);
        assert_eq!(AddressMode::Clamp.resolve(2, 4), 2);
        assert_eq!(AddressMode::Clamp.resolve(9, 4), 3);
    }

    #[test]
    fn raw_modes() {
        assert_eq!(AddressMode::from_raw(1).unwrap(), AddressMode::Mirror);
        assert_eq!(FilterMode::from_raw(1).unwrap(), FilterMode::Linear);
        assert!(matches!(AddressMode::from_raw(3), Err(RhiError::Sampler(_))));
        assert!(matches!(FilterMode::from_raw(2), Err(RhiError::Sampler(_))));
    }
}
