use std::str::FromStr;

use crate::backend::BackendKind;

/// Selects the native backend. Parsed case-insensitively (`software`, `vulkan`, `d3d12`, ...).
pub const BACKEND_ENV: &str = "KILN_BACKEND";

/// When truthy, native validation is enabled and its messages are logged when the instance drops.
pub const DEBUG_ENV: &str = "KILN_DEBUG";

/// Pins [`crate::Instance::best_device`] to a device index.
pub const DEVICE_ENV: &str = "KILN_DEVICE";

/// `1`, `true`, `yes` or `on`, case-insensitively.
pub fn is_truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

/// Instance-wide settings.
///
/// Consumed by [`crate::Instance::new`]; nothing here can change once the device registry has
/// been touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub backend: BackendKind,
    pub debug: bool,
    pub device_index: Option<usize>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::platform_default(),
            debug: false,
            device_index: None,
        }
    }
}

impl InstanceConfig {
    /// Defaults overridden by `KILN_BACKEND`, `KILN_DEBUG` and `KILN_DEVICE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(BACKEND_ENV) {
            match BackendKind::from_str(&raw) {
                Ok(kind) => config.backend = kind,
                Err(()) => tracing::warn!(value = %raw, "ignoring unknown {BACKEND_ENV}"),
            }
        }
        if let Some(raw) = lookup(DEBUG_ENV) {
            config.debug = is_truthy(&raw);
        }
        if let Some(raw) = lookup(DEVICE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(index) => config.device_index = Some(index),
                Err(err) => tracing::warn!(value = %raw, %err, "ignoring invalid {DEVICE_ENV}"),
            }
        }
        config
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_device_index(mut self, index: usize) -> Self {
        self.device_index = Some(index);
        self
    }
}
