//! Native backend selection.

use std::fmt;
use std::str::FromStr;

use crate::hal::BackendLoader;
use crate::{Result, RhiError};

pub mod software;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// CPU reference implementation. Always available.
    Software,
    Vulkan,
    D3D12,
    D3D11,
    Metal,
    Gl,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        Self::Software,
        Self::Vulkan,
        Self::D3D12,
        Self::D3D11,
        Self::Metal,
        Self::Gl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Vulkan => "vulkan",
            Self::D3D12 => "d3d12",
            Self::D3D11 => "d3d11",
            Self::Metal => "metal",
            Self::Gl => "gl",
        }
    }

    /// The native API a build targets when nothing else is configured.
    pub fn platform_default() -> Self {
        if !cfg!(feature = "wgpu") {
            Self::Software
        } else if cfg!(target_os = "windows") {
            Self::D3D12
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            Self::Metal
        } else {
            Self::Vulkan
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Builds the loader for `kind`.
///
/// Fails with [`RhiError::Unsupported`] when the API is not compiled in or has no mapping on
/// this build.
pub fn create_loader(kind: BackendKind) -> Result<Box<dyn BackendLoader>> {
    match kind {
        BackendKind::Software => Ok(Box::new(software::SoftwareLoader::default())),
        #[cfg(feature = "wgpu")]
        BackendKind::Vulkan | BackendKind::D3D12 | BackendKind::Metal | BackendKind::Gl => {
            Ok(Box::new(wgpu_backend::WgpuLoader::new(kind)))
        }
        other => Err(RhiError::Unsupported(format!(
            "backend {other} is not available in this build"
        ))),
    }
}
