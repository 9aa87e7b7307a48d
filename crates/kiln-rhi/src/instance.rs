use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::create_loader;
use crate::config::InstanceConfig;
use crate::hal::{AdapterInfo, BackendLoader};
use crate::{Device, Result, RhiError};

struct Registry {
    devices: Vec<Device>,
}

/// Owner of the device registry for one backend.
///
/// The backend is loaded and its adapters enumerated on the first call that needs them; the
/// resulting device list is then fixed for the lifetime of the instance. Applications usually
/// create one instance at startup and hand out [`Device`] clones from it.
pub struct Instance {
    config: InstanceConfig,
    loader: Mutex<Option<Box<dyn BackendLoader>>>,
    registry: Mutex<Option<Arc<Registry>>>,
    current: Mutex<Option<Device>>,
}

impl Instance {
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            config,
            loader: Mutex::new(None),
            registry: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    /// Instance driven by a caller-supplied loader instead of the one `config.backend` names.
    /// The loader's own kind wins over `config.backend`.
    pub fn with_loader(config: InstanceConfig, loader: Box<dyn BackendLoader>) -> Self {
        let instance = Self::new(InstanceConfig {
            backend: loader.kind(),
            ..config
        });
        *instance.loader.lock().unwrap_or_else(PoisonError::into_inner) = Some(loader);
        instance
    }

    /// Instance configured from `KILN_BACKEND`, `KILN_DEBUG` and `KILN_DEVICE`.
    pub fn from_env() -> Self {
        Self::new(InstanceConfig::from_env())
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Every adapter exposed by the configured backend, in backend enumeration order.
    pub fn discover_devices(&self) -> Result<Vec<Device>> {
        Ok(self.registry()?.devices.clone())
    }

    pub fn device(&self, index: usize) -> Result<Device> {
        let registry = self.registry()?;
        registry
            .devices
            .get(index)
            .cloned()
            .ok_or(RhiError::DeviceIndex {
                index,
                count: registry.devices.len(),
            })
    }

    /// Makes the device at `index` the instance's current device.
    pub fn select_current(&self, index: usize) -> Result<Device> {
        let device = self.device(index)?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(device.clone());
        tracing::debug!(device = %device.label(), "selected current device");
        Ok(device)
    }

    /// The current device, defaulting to [`Instance::best_device`] on first use.
    pub fn current_device(&self) -> Result<Device> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = current.as_ref() {
            return Ok(device.clone());
        }
        let device = self.best_device()?;
        *current = Some(device.clone());
        Ok(device)
    }

    /// The configured device index if one is pinned, otherwise the highest-ranked adapter:
    /// hardware before software, discrete before integrated, then most dedicated video memory.
    /// Ties keep enumeration order.
    pub fn best_device(&self) -> Result<Device> {
        if let Some(index) = self.config.device_index {
            return self.device(index);
        }
        let registry = self.registry()?;
        let infos: Vec<AdapterInfo> = registry.devices.iter().map(|d| d.info().clone()).collect();
        let index = rank_best(&infos)
            .ok_or_else(|| RhiError::Backend("backend reported no adapters".into()))?;
        Ok(registry.devices[index].clone())
    }

    fn registry(&self) -> Result<Arc<Registry>> {
        let mut guard = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(registry) = guard.as_ref() {
            return Ok(registry.clone());
        }

        let preset = self.loader.lock().unwrap_or_else(PoisonError::into_inner).take();
        let mut loader = match preset {
            Some(loader) => loader,
            None => create_loader(self.config.backend)?,
        };
        if self.config.debug {
            loader.enable_debug();
        }
        let loader: Arc<dyn BackendLoader> = Arc::from(loader);
        let devices: Vec<Device> = loader
            .enumerate_adapters()?
            .into_iter()
            .enumerate()
            .map(|(index, info)| Device::new(index, info, loader.clone()))
            .collect();
        tracing::debug!(
            backend = %self.config.backend,
            count = devices.len(),
            debug = self.config.debug,
            "discovered devices"
        );

        let registry = Arc::new(Registry { devices });
        *guard = Some(registry.clone());
        Ok(registry)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if !self.config.debug {
            return;
        }
        let registry = self
            .registry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        for device in registry.iter().flat_map(|r| r.devices.iter()) {
            for message in device.debug_messages() {
                tracing::warn!(device = %device.label(), "{message}");
            }
        }
    }
}

/// Highest `(hardware, discrete, dedicated memory)` wins; among equal keys the adapter
/// enumerated last is chosen.
pub(crate) fn rank_best(infos: &[AdapterInfo]) -> Option<usize> {
    let key = |info: &AdapterInfo| {
        (
            info.is_hardware,
            info.is_discrete,
            info.dedicated_video_memory,
        )
    };
    infos
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| key(a).cmp(&key(b)).then(ia.cmp(ib)))
        .map(|(index, _)| index)
}
