//! Presentation to window-system surfaces and to in-memory headless surfaces.

use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::format::PixelFormat;
use crate::hal::{BackendFeatures, SwapchainCreateInfo, SwapchainId};
use crate::heap::HeapKind;
use crate::resource::{Buffer, BufferDesc, CopyDesc, Resource, Texture, TextureDimension};
use crate::{Device, Result, RhiError};

pub const MAX_SWAPCHAIN_BUFFERS: u32 = 16;

#[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
#[derive(Debug, Clone)]
pub(crate) enum SurfaceKind {
    Win32 { hwnd: *mut c_void, hinstance: *mut c_void },
    Xlib { display: *mut c_void, window: u64 },
    Wayland { display: *mut c_void, surface: *mut c_void },
    AppKit { ns_view: *mut c_void },
    Headless(HeadlessSurface),
}

/// A platform surface a swapchain can present to.
#[derive(Debug, Clone)]
pub struct SurfaceHandle {
    pub(crate) kind: SurfaceKind,
}

impl SurfaceHandle {
    /// # Safety
    /// `hwnd` must be a valid window handle and `hinstance` its module handle (or null), both
    /// outliving every swapchain created from this surface.
    pub unsafe fn win32(hwnd: *mut c_void, hinstance: *mut c_void) -> Self {
        Self {
            kind: SurfaceKind::Win32 { hwnd, hinstance },
        }
    }

    /// # Safety
    /// `display` must be an open Xlib `Display*` and `window` a window on it, both outliving
    /// every swapchain created from this surface.
    pub unsafe fn xlib(display: *mut c_void, window: u64) -> Self {
        Self {
            kind: SurfaceKind::Xlib { display, window },
        }
    }

    /// # Safety
    /// `display` and `surface` must be a live `wl_display` and `wl_surface` that outlive every
    /// swapchain created from this surface.
    pub unsafe fn wayland(display: *mut c_void, surface: *mut c_void) -> Self {
        Self {
            kind: SurfaceKind::Wayland { display, surface },
        }
    }

    /// # Safety
    /// `ns_view` must be a live `NSView` that outlives every swapchain created from this surface.
    pub unsafe fn appkit(ns_view: *mut c_void) -> Self {
        Self {
            kind: SurfaceKind::AppKit { ns_view },
        }
    }

    pub fn headless(surface: &HeadlessSurface) -> Self {
        Self {
            kind: SurfaceKind::Headless(surface.clone()),
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.kind, SurfaceKind::Headless(_))
    }
}

#[derive(Debug, Default)]
struct HeadlessState {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    images: Vec<Vec<u8>>,
    next: usize,
    last_frame: Option<Vec<u8>>,
    presented: u64,
    claimed: bool,
}

/// Off-screen surface backed by CPU memory.
///
/// Presented images are tightly packed rows in the swapchain's format. Each present writes into
/// the next image of the ring, so pixels not covered by the presented texture keep whatever that
/// image held before.
///
/// At most one swapchain presents to a surface at a time. Once it is dropped, a new swapchain may
/// take the surface over, starting from cleared images.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                width,
                height,
                ..HeadlessState::default()
            })),
        }
    }

    pub fn width(&self) -> u32 {
        self.lock().width
    }

    pub fn height(&self) -> u32 {
        self.lock().height
    }

    pub fn presented_frames(&self) -> u64 {
        self.lock().presented
    }

    /// Contents of the most recently presented image.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.lock().last_frame.clone()
    }

    fn configure(&self, buffer_count: u32, bytes_per_pixel: u32) -> Result<()> {
        let mut state = self.lock();
        if state.claimed {
            return Err(RhiError::Swapchain(
                "headless surface already has an active swapchain".into(),
            ));
        }
        state.claimed = true;
        let image_size = state.width as usize * state.height as usize * bytes_per_pixel as usize;
        state.bytes_per_pixel = bytes_per_pixel;
        state.images = vec![vec![0; image_size]; buffer_count as usize];
        state.next = 0;
        Ok(())
    }

    fn unclaim(&self) {
        self.lock().claimed = false;
    }

    /// Blits `rows` (`src_width` pixels each) into the next image at `(x, y)`, clipped.
    fn present_rows(&self, src: &[u8], src_pitch: usize, src_width: u32, src_height: u32, x: u32, y: u32) {
        let mut state = self.lock();
        let (width, height, bpp) = (state.width, state.height, state.bytes_per_pixel as usize);
        let index = state.next;
        if let Some(image) = state.images.get_mut(index) {
            if x < width && y < height {
                let columns = src_width.min(width - x) as usize;
                let rows = src_height.min(height - y) as usize;
                for row in 0..rows {
                    let src_start = row * src_pitch;
                    let dst_start = ((y as usize + row) * width as usize + x as usize) * bpp;
                    image[dst_start..dst_start + columns * bpp]
                        .copy_from_slice(&src[src_start..src_start + columns * bpp]);
                }
            }
            let frame = image.clone();
            state.last_frame = Some(frame);
        }
        state.next = (index + 1) % state.images.len().max(1);
        state.presented += 1;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Target {
    Native(SwapchainId),
    Headless {
        surface: HeadlessSurface,
        staging: Mutex<Option<Buffer>>,
    },
}

struct SwapchainInner {
    device: Device,
    target: Target,
    format: PixelFormat,
    buffer_count: u32,
    width: u32,
    height: u32,
}

impl Drop for SwapchainInner {
    fn drop(&mut self) {
        match &self.target {
            Target::Native(id) => {
                let id = *id;
                self.device.release("swapchain", |backend| backend.destroy_swapchain(id));
            }
            Target::Headless { surface, .. } => surface.unclaim(),
        }
    }
}

/// A ring of presentable images bound to one surface.
///
/// The image size is fixed by the surface when the swapchain is created.
#[derive(Clone)]
pub struct Swapchain {
    inner: Arc<SwapchainInner>,
}

impl Swapchain {
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    pub fn buffer_count(&self) -> u32 {
        self.inner.buffer_count
    }

    /// Copies mip 0, slice 0 of `texture` into the next image at `(x, y)` and presents it.
    /// Texels falling outside the image are clipped.
    pub fn present(&self, texture: &Texture, x: u32, y: u32) -> Result<()> {
        let device = self.device();
        device.ensure_same("presented texture", texture.device())?;
        if texture.dimension() != TextureDimension::D2 {
            return Err(RhiError::Swapchain(format!(
                "only 2D textures can be presented, got {}",
                texture.dimension()
            )));
        }
        if texture.format().bytes_per_pixel() != self.inner.format.bytes_per_pixel() {
            return Err(RhiError::Swapchain(format!(
                "texture format {:?} is incompatible with swapchain format {:?}",
                texture.format(),
                self.inner.format
            )));
        }

        match &self.inner.target {
            Target::Native(id) => {
                let (id, texture_id) = (*id, texture.id());
                device.with_backend(|backend| backend.present(id, texture_id, x, y))?;
            }
            Target::Headless { surface, staging } => {
                let mut staging = staging.lock().unwrap_or_else(PoisonError::into_inner);
                let buffer = match staging.take() {
                    Some(buffer) if buffer.size() == texture.size() => buffer,
                    _ => device.create_buffer(&BufferDesc::new(HeapKind::Readback, texture.size()))?,
                };
                texture.copy_to(&buffer, &CopyDesc::new())?;
                let pixels = buffer.readback(0, 0)?;
                *staging = Some(buffer);
                surface.present_rows(
                    &pixels,
                    texture.row_pitch() as usize,
                    texture.width(),
                    texture.height(),
                    x,
                    y,
                );
            }
        }
        device.stats_counters().inc_presents();
        tracing::trace!(device = %device.label(), x, y, "present");
        Ok(())
    }
}

impl fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swapchain")
            .field("format", &self.inner.format)
            .field("buffer_count", &self.inner.buffer_count)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("headless", &matches!(self.inner.target, Target::Headless { .. }))
            .finish()
    }
}

impl Device {
    /// Creates a swapchain on `surface`.
    ///
    /// `size` is only a hint for surfaces that do not report their own extent; headless
    /// surfaces always use their configured size.
    pub fn create_swapchain(
        &self,
        surface: &SurfaceHandle,
        format: PixelFormat,
        buffer_count: u32,
        size: Option<(u32, u32)>,
    ) -> Result<Swapchain> {
        if buffer_count == 0 || buffer_count > MAX_SWAPCHAIN_BUFFERS {
            return Err(RhiError::Swapchain(format!(
                "buffer_count must be in 1..={MAX_SWAPCHAIN_BUFFERS}, got {buffer_count}"
            )));
        }

        let (target, width, height) = match &surface.kind {
            SurfaceKind::Headless(headless) => {
                let (width, height) = (headless.width(), headless.height());
                if width == 0 || height == 0 {
                    return Err(RhiError::Swapchain("headless surface has a zero extent".into()));
                }
                headless.configure(buffer_count, format.bytes_per_pixel())?;
                let target = Target::Headless {
                    surface: headless.clone(),
                    staging: Mutex::new(None),
                };
                (target, width, height)
            }
            _ => {
                self.require(BackendFeatures::PRESENT_NATIVE, "native presentation")?;
                let (width, height) = size.unwrap_or((0, 0));
                let info = SwapchainCreateInfo {
                    surface,
                    format,
                    buffer_count,
                    width,
                    height,
                };
                let allocation = self.with_backend(|backend| backend.create_swapchain(&info))?;
                (Target::Native(allocation.id), allocation.width, allocation.height)
            }
        };

        tracing::debug!(
            device = %self.label(),
            ?format,
            buffer_count,
            width,
            height,
            headless = surface.is_headless(),
            "created swapchain"
        );
        Ok(Swapchain {
            inner: Arc::new(SwapchainInner {
                device: self.clone(),
                target,
                format,
                buffer_count,
                width,
                height,
            }),
        })
    }
}
