use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ErrorKind;

/// Observer callbacks for host tooling.
///
/// The hooks carry structured logs and telemetry out of the substrate without tying it to a
/// particular shell or IDE. Callbacks can be swapped at any time through a shared reference;
/// they are called synchronously on the thread that triggered the event and must not call back
/// into the runtime that emitted it while holding their own locks.
#[derive(Default, Clone)]
pub struct RuntimeHooks {
    logger: Arc<RwLock<Option<LoggerCallback>>>,
    telemetry: Arc<RwLock<Option<TelemetryCallback>>>,
}

type LoggerCallback = Arc<dyn Fn(&RuntimeLog) + Send + Sync + 'static>;
type TelemetryCallback = Arc<dyn Fn(&TelemetryEvent) + Send + Sync + 'static>;

impl RuntimeHooks {
    /// Registers a structured logger callback.
    pub fn set_logger<F>(&self, hook: F)
    where
        F: Fn(&RuntimeLog) + Send + Sync + 'static,
    {
        *self.logger.write() = Some(Arc::new(hook));
    }

    /// Registers a telemetry callback.
    pub fn set_telemetry<F>(&self, hook: F)
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        *self.telemetry.write() = Some(Arc::new(hook));
    }

    pub fn clear_logger(&self) {
        *self.logger.write() = None;
    }

    pub fn clear_telemetry(&self) {
        *self.telemetry.write() = None;
    }

    /// Emits a runtime log message.
    pub fn emit_log(&self, log: RuntimeLog) {
        let callback = self.logger.read().as_ref().cloned();
        if let Some(callback) = callback {
            callback(&log);
        }
    }

    /// Emits a telemetry event.
    pub fn emit_telemetry(&self, event: TelemetryEvent) {
        let callback = self.telemetry.read().as_ref().cloned();
        if let Some(callback) = callback {
            callback(&event);
        }
    }
}

impl fmt::Debug for RuntimeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHooks").finish_non_exhaustive()
    }
}

/// Structured log entry surfaced to host tooling.
#[derive(Debug, Clone)]
pub struct RuntimeLog {
    pub source: &'static str,
    pub message: String,
}

impl RuntimeLog {
    pub fn new(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

/// Telemetry published for dashboards and test harnesses.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    BuiltinFailed {
        name: String,
        kind: ErrorKind,
    },
    NativeCall {
        address: usize,
        signature: String,
    },
    WatchdogEnabled {
        timeout_secs: f64,
        automatic: bool,
    },
    WatchdogKicked,
    ClockChanged {
        hz: u32,
    },
    BootCodeStored {
        bytes: usize,
        always_exec: bool,
    },
    UsbHidConfigured {
        descriptor_bytes: usize,
    },
    UsbHidReport {
        bytes: usize,
    },
}
