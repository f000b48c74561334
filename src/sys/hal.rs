//! Hardware layer used by the board-control builtins.
//!
//! Scripts can arm a watchdog, change the core clock, store boot code and drive a USB HID
//! endpoint. The [`HardwareLayer`] trait is the seam between those builtins and a concrete
//! board; [`SoftwareHal`] keeps everything in memory so hosts and tests can observe the effects
//! through [`HalSnapshot`] and the runtime's telemetry hooks.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::integration::{RuntimeHooks, TelemetryEvent};
use crate::{SubstrateError, SubstrateResult};

/// Largest interrupt report a full-speed HID endpoint accepts.
pub const MAX_HID_REPORT_BYTES: usize = 64;

/// Core clock frequencies the software layer can switch between.
pub const SUPPORTED_CLOCKS_HZ: [u32; 7] = [
    8_000_000,
    16_000_000,
    32_000_000,
    48_000_000,
    64_000_000,
    84_000_000,
    168_000_000,
];

/// Core interface implemented by all hardware backends.
pub trait HardwareLayer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;
    /// Arms the watchdog. With `automatic` the platform kicks it from its idle loop.
    fn enable_watchdog(&self, timeout_secs: f64, automatic: bool) -> SubstrateResult<()>;
    /// Resets the watchdog countdown.
    fn kick_watchdog(&self) -> SubstrateResult<()>;
    /// Current core clock in hertz.
    fn clock_hz(&self) -> u32;
    /// Requests a core clock and returns the frequency actually selected.
    fn set_clock(&self, hz: u32) -> SubstrateResult<u32>;
    /// Stores code to run at boot. Empty code clears it.
    fn set_boot_code(&self, code: &str, always_exec: bool) -> SubstrateResult<()>;
    /// Installs a HID report descriptor, or removes the endpoint with `None`.
    fn set_usb_hid(&self, descriptor: Option<&[u8]>) -> SubstrateResult<()>;
    /// Queues one HID input report.
    fn send_usb_hid(&self, report: &[u8]) -> SubstrateResult<()>;
}

/// Observable state of a [`SoftwareHal`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HalSnapshot {
    pub watchdog_timeout_secs: Option<f64>,
    pub watchdog_automatic: bool,
    pub watchdog_kicks: u64,
    pub clock_hz: u32,
    pub boot_code: Option<String>,
    pub boot_always_exec: bool,
    pub hid_descriptor: Option<Vec<u8>>,
    pub hid_reports: Vec<Vec<u8>>,
}

/// In-memory hardware layer.
pub struct SoftwareHal {
    hooks: Arc<RuntimeHooks>,
    state: Mutex<HalSnapshot>,
}

impl SoftwareHal {
    /// Creates a layer running at the supported clock closest to `clock_hz`.
    pub fn new(clock_hz: u32, hooks: Arc<RuntimeHooks>) -> Self {
        let state = HalSnapshot {
            clock_hz: nearest_clock(clock_hz),
            ..HalSnapshot::default()
        };
        Self {
            hooks,
            state: Mutex::new(state),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> HalSnapshot {
        self.state.lock().clone()
    }
}

fn nearest_clock(hz: u32) -> u32 {
    SUPPORTED_CLOCKS_HZ
        .iter()
        .copied()
        .min_by_key(|candidate| candidate.abs_diff(hz))
        .unwrap_or(hz)
}

impl HardwareLayer for SoftwareHal {
    fn name(&self) -> &'static str {
        "software"
    }

    #[instrument(skip(self))]
    fn enable_watchdog(&self, timeout_secs: f64, automatic: bool) -> SubstrateResult<()> {
        if !(timeout_secs.is_finite() && timeout_secs > 0.0) {
            return Err(SubstrateError::range(format!(
                "watchdog timeout must be a positive number of seconds, got {timeout_secs}"
            )));
        }
        {
            let mut state = self.state.lock();
            state.watchdog_timeout_secs = Some(timeout_secs);
            state.watchdog_automatic = automatic;
        }
        self.hooks.emit_telemetry(TelemetryEvent::WatchdogEnabled {
            timeout_secs,
            automatic,
        });
        Ok(())
    }

    fn kick_watchdog(&self) -> SubstrateResult<()> {
        {
            let mut state = self.state.lock();
            if state.watchdog_timeout_secs.is_none() {
                return Err(SubstrateError::Hardware("watchdog is not enabled".into()));
            }
            state.watchdog_kicks += 1;
        }
        self.hooks.emit_telemetry(TelemetryEvent::WatchdogKicked);
        Ok(())
    }

    fn clock_hz(&self) -> u32 {
        self.state.lock().clock_hz
    }

    #[instrument(skip(self))]
    fn set_clock(&self, hz: u32) -> SubstrateResult<u32> {
        if hz == 0 {
            return Err(SubstrateError::range("clock frequency must be non-zero"));
        }
        let selected = nearest_clock(hz);
        self.state.lock().clock_hz = selected;
        debug!(requested = hz, selected, "core clock changed");
        self.hooks
            .emit_telemetry(TelemetryEvent::ClockChanged { hz: selected });
        Ok(selected)
    }

    fn set_boot_code(&self, code: &str, always_exec: bool) -> SubstrateResult<()> {
        {
            let mut state = self.state.lock();
            state.boot_code = (!code.is_empty()).then(|| code.to_string());
            state.boot_always_exec = always_exec && !code.is_empty();
        }
        self.hooks.emit_telemetry(TelemetryEvent::BootCodeStored {
            bytes: code.len(),
            always_exec,
        });
        Ok(())
    }

    fn set_usb_hid(&self, descriptor: Option<&[u8]>) -> SubstrateResult<()> {
        if descriptor.is_some_and(<[u8]>::is_empty) {
            return Err(SubstrateError::range("HID report descriptor is empty"));
        }
        {
            let mut state = self.state.lock();
            state.hid_descriptor = descriptor.map(<[u8]>::to_vec);
            state.hid_reports.clear();
        }
        self.hooks.emit_telemetry(TelemetryEvent::UsbHidConfigured {
            descriptor_bytes: descriptor.map_or(0, <[u8]>::len),
        });
        Ok(())
    }

    fn send_usb_hid(&self, report: &[u8]) -> SubstrateResult<()> {
        if report.len() > MAX_HID_REPORT_BYTES {
            return Err(SubstrateError::range(format!(
                "HID report of {} bytes exceeds {MAX_HID_REPORT_BYTES}",
                report.len()
            )));
        }
        {
            let mut state = self.state.lock();
            if state.hid_descriptor.is_none() {
                return Err(SubstrateError::Hardware("USB HID is not configured".into()));
            }
            state.hid_reports.push(report.to_vec());
        }
        self.hooks
            .emit_telemetry(TelemetryEvent::UsbHidReport { bytes: report.len() });
        Ok(())
    }
}
