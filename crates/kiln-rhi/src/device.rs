use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::backend::BackendKind;
use crate::hal::{
    AdapterInfo, BackendFeatures, BackendLimits, BackendLoader, GpuBackend, NativeDevice,
};
use crate::stats::{DeviceStats, DeviceStatsSnapshot};
use crate::{Result, RhiError};

static NEXT_DEVICE_UID: AtomicU64 = AtomicU64::new(1);

struct DeviceInner {
    uid: u64,
    index: usize,
    info: AdapterInfo,
    loader: Arc<dyn BackendLoader>,
    backend: Mutex<Option<Box<dyn GpuBackend>>>,
    caps: OnceLock<(BackendFeatures, BackendLimits)>,
    lost: AtomicBool,
    stats: DeviceStats,
}

/// One physical adapter exposed by the active backend.
///
/// Cloning is cheap and every clone refers to the same device. The native device is opened
/// on first use, so enumerating adapters does not create any GPU objects.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub(crate) fn new(index: usize, info: AdapterInfo, loader: Arc<dyn BackendLoader>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                uid: NEXT_DEVICE_UID.fetch_add(1, Ordering::Relaxed),
                index,
                info,
                loader,
                backend: Mutex::new(None),
                caps: OnceLock::new(),
                lost: AtomicBool::new(false),
                stats: DeviceStats::new(),
            }),
        }
    }

    /// Position in the instance's discovery order.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn info(&self) -> &AdapterInfo {
        &self.inner.info
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn is_hardware(&self) -> bool {
        self.inner.info.is_hardware
    }

    pub fn is_discrete(&self) -> bool {
        self.inner.info.is_discrete
    }

    pub fn dedicated_video_memory(&self) -> u64 {
        self.inner.info.dedicated_video_memory
    }

    pub fn dedicated_system_memory(&self) -> u64 {
        self.inner.info.dedicated_system_memory
    }

    pub fn shared_system_memory(&self) -> u64 {
        self.inner.info.shared_system_memory
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.loader.kind()
    }

    pub fn features(&self) -> Result<BackendFeatures> {
        self.caps().map(|(features, _)| features)
    }

    pub fn limits(&self) -> Result<BackendLimits> {
        self.caps().map(|(_, limits)| limits)
    }

    /// The native device objects, for creating textures to hand to
    /// [`Device::texture_from_native`]. `None` on the software backend.
    pub fn native_device(&self) -> Result<Option<NativeDevice>> {
        self.with_backend(|backend| Ok(backend.native_device()))
    }

    pub fn stats(&self) -> DeviceStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn is_lost(&self) -> bool {
        self.inner.lost.load(Ordering::Acquire)
    }

    /// Drains validation-layer messages recorded since the previous call.
    ///
    /// Empty unless the instance was created with `debug` enabled.
    pub fn debug_messages(&self) -> Vec<String> {
        let mut guard = self.lock_backend();
        match guard.as_deref_mut() {
            Some(backend) => backend.drain_debug_messages(),
            None => Vec::new(),
        }
    }

    /// Whether `other` is a handle to this very device.
    pub fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn stats_counters(&self) -> &DeviceStats {
        &self.inner.stats
    }

    pub(crate) fn label(&self) -> String {
        format!("{}:{}", self.inner.index, self.inner.info.name)
    }

    /// Fails with [`RhiError::DeviceMismatch`] unless `other` is this device.
    pub(crate) fn ensure_same(&self, what: &'static str, other: &Device) -> Result<()> {
        if self.same_device(other) {
            return Ok(());
        }
        Err(RhiError::DeviceMismatch {
            what,
            expected: self.label(),
            found: other.label(),
        })
    }

    /// Fails with [`RhiError::Unsupported`] unless the backend has every bit of `feature`.
    pub(crate) fn require(&self, feature: BackendFeatures, what: &str) -> Result<()> {
        if self.features()?.contains(feature) {
            Ok(())
        } else {
            Err(RhiError::Unsupported(format!(
                "{what} is not supported by the {} backend",
                self.backend_kind()
            )))
        }
    }

    /// Runs `f` against the opened backend, serialized with every other call on this device.
    ///
    /// A [`RhiError::DeviceLost`] returned by the backend is sticky: every later call fails the
    /// same way without reaching the backend.
    pub(crate) fn with_backend<R>(
        &self,
        f: impl FnOnce(&mut dyn GpuBackend) -> Result<R>,
    ) -> Result<R> {
        if self.is_lost() {
            return Err(RhiError::DeviceLost);
        }
        let mut guard = self.lock_backend();
        if guard.is_none() {
            *guard = Some(self.open_backend()?);
        }
        let result = match guard.as_deref_mut() {
            Some(backend) => f(backend),
            None => Err(RhiError::DeviceLost),
        };
        if matches!(result, Err(RhiError::DeviceLost)) && !self.inner.lost.swap(true, Ordering::AcqRel)
        {
            tracing::warn!(device = %self.label(), "device lost");
        }
        result
    }

    /// Destroys a backend object from a `Drop` impl. Failures are logged, never propagated.
    pub(crate) fn release(&self, what: &'static str, f: impl FnOnce(&mut dyn GpuBackend) -> Result<()>) {
        if self.is_lost() {
            return;
        }
        let mut guard = self.lock_backend();
        if let Some(backend) = guard.as_deref_mut() {
            match f(backend) {
                Ok(()) => tracing::debug!(device = %self.label(), "released {what}"),
                Err(err) => tracing::debug!(device = %self.label(), %err, "failed to release {what}"),
            }
        }
    }

    fn caps(&self) -> Result<(BackendFeatures, BackendLimits)> {
        if let Some(caps) = self.inner.caps.get() {
            return Ok(*caps);
        }
        self.with_backend(|backend| Ok((backend.features(), backend.limits())))
    }

    fn open_backend(&self) -> Result<Box<dyn GpuBackend>> {
        let backend = self.inner.loader.open_device(self.inner.index)?;
        let _ = self.inner.caps.set((backend.features(), backend.limits()));
        tracing::debug!(
            device = %self.label(),
            backend = %backend.kind(),
            features = ?backend.features(),
            "opened device"
        );
        Ok(backend)
    }

    fn lock_backend(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn GpuBackend>>> {
        self.inner
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.uid == other.inner.uid
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.inner.index)
            .field("name", &self.inner.info.name)
            .field("backend", &self.backend_kind())
            .field("is_hardware", &self.inner.info.is_hardware)
            .field("is_discrete", &self.inner.info.is_discrete)
            .finish()
    }
}
