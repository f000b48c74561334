//==============================================
// File: tests/builtins.rs
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Drive the runtime through scripted builtin names
// Objective: Verify configuration loading, dispatch and exception values
//==============================================

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use solvra_substrate::config::RuntimeConfig;
use solvra_substrate::integration::TelemetryEvent;
use solvra_substrate::sys::{HardwareLayer, SoftwareHal};
use solvra_substrate::{SubstrateRuntime, Value};

fn args(runtime: &SubstrateRuntime, json: serde_json::Value) -> Vec<Value> {
    let list = json.as_array().cloned().unwrap_or_default();
    list.iter()
        .map(|item| runtime.arena().from_json(item).expect("argument"))
        .collect()
}

fn call(runtime: &SubstrateRuntime, name: &str, json: serde_json::Value) -> serde_json::Value {
    let values = args(runtime, json);
    runtime.invoke(name, &values).expect(name).to_json()
}

#[test]
fn runtime_loads_configuration_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "[arena]\ncells = 48\nbuffer_bytes = 32\nlow_memory_percent = 50\n\n[hardware]\ndefault_clock_hz = 16000000"
    )
    .expect("write config");
    let config = RuntimeConfig::load(file.path()).expect("load");
    let runtime = SubstrateRuntime::from_config(config);
    let stats = runtime.stats();
    assert_eq!(stats.cell_capacity, 48);
    assert_eq!(stats.buffer_capacity, 32);
    assert_eq!(runtime.hal().clock_hz(), 16_000_000);

    let exception = runtime
        .invoke_or_exception("toArrayBuffer", &[runtime.arena().string("x".repeat(64)).expect("text")])
        .expect_err("buffer budget");
    assert_eq!(exception.to_json()["name"], json!("OutOfMemory"));
}

#[test]
fn invalid_configuration_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("substrate.toml");
    std::fs::write(&path, "[arena]\ncells = 4\n").expect("write");
    assert!(RuntimeConfig::load(&path).is_err());
    assert!(RuntimeConfig::load(dir.path().join("missing.toml")).is_err());
}

#[test]
fn numeric_builtins_dispatch_by_name() {
    let runtime = SubstrateRuntime::new();
    assert_eq!(call(&runtime, "sum", json!([[1, 2, 3.5]])), json!(6.5));
    assert_eq!(call(&runtime, "variance", json!([[1, 3], 2])), json!(1.0));
    assert_eq!(call(&runtime, "convolve", json!([[1, 1, 1], [1, 1, 1], 1])), json!(2.0));
    assert_eq!(call(&runtime, "interpolate", json!([[10, 20], 0.5])), json!(15.0));
    assert_eq!(call(&runtime, "interpolate2d", json!([[0, 10, 20, 30], 2, 0.5, 0.5])), json!(15.0));
    assert_eq!(call(&runtime, "clip", json!([-3, 0, 1])), json!(0.0));
    assert_eq!(call(&runtime, "reverseByte", json!([1])), json!(128));
    assert_eq!(call(&runtime, "HSBtoRGB", json!([0, 1, 1])), json!(255));
}

#[test]
fn fft_builtin_updates_its_arguments() {
    let runtime = SubstrateRuntime::new();
    let values = args(&runtime, json!([[1, 1, 1, 1], [0, 0, 0, 0]]));
    let result = runtime.invoke("FFT", &values).expect("FFT");
    assert!(result.is_undefined());
    assert_eq!(values[0].to_json(), json!([4.0, 0.0, 0.0, 0.0]));
}

#[test]
fn view_builtins_round_trip_strings() {
    let runtime = SubstrateRuntime::new();
    let arena = runtime.arena();
    let text = arena.string("Hi!").expect("text");
    let buffer = runtime.invoke("toArrayBuffer", &[text]).expect("buffer");
    let name = arena.string("Uint8Array").expect("name");
    let bytes = runtime.invoke("reinterpretView", &[buffer, name]).expect("view");
    assert_eq!(bytes.to_json(), json!([72.0, 105.0, 33.0]));
    let back = runtime.invoke("toString", &[bytes]).expect("string");
    assert_eq!(back.as_string().as_deref(), Some("Hi!"));
    assert_eq!(
        call(&runtime, "toUint8Array", json!([[1, 2], "A", { "data": 0, "count": 2 }])),
        json!([1.0, 2.0, 65.0, 0.0, 0.0])
    );
}

#[test]
fn hardware_builtins_reach_the_layer() {
    let runtime = SubstrateRuntime::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    runtime
        .hooks()
        .set_telemetry(move |event| sink.lock().push(event.clone()));

    call(&runtime, "enableWatchdog", json!([1.5]));
    call(&runtime, "kickWatchdog", json!([]));
    assert_eq!(call(&runtime, "setClock", json!([{ "hz": 30000000 }])), json!(32000000));
    call(&runtime, "setBootCode", json!(["blink()", true]));
    call(&runtime, "setUSBHID", json!([{ "reportDescriptor": [5, 1, 9, 6] }]));
    assert_eq!(call(&runtime, "sendUSBHID", json!([[0, 0, 4, 0]])), json!(1));

    assert_eq!(
        *events.lock(),
        vec![
            TelemetryEvent::WatchdogEnabled {
                timeout_secs: 1.5,
                automatic: true
            },
            TelemetryEvent::WatchdogKicked,
            TelemetryEvent::ClockChanged { hz: 32_000_000 },
            TelemetryEvent::BootCodeStored {
                bytes: 7,
                always_exec: true
            },
            TelemetryEvent::UsbHidConfigured {
                descriptor_bytes: 4
            },
            TelemetryEvent::UsbHidReport { bytes: 4 },
        ]
    );
}

#[test]
fn failures_and_new_arena_flags_reach_the_logger() {
    let runtime = SubstrateRuntime::bootstrap()
        .with_buffer_bytes(16)
        .with_low_memory_percent(0)
        .build();
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = logs.clone();
    runtime
        .hooks()
        .set_logger(move |log| sink.lock().push((log.source, log.message.clone())));

    let text = runtime.arena().string("x".repeat(32)).expect("text");
    for _ in 0..2 {
        assert!(runtime.invoke("toArrayBuffer", std::slice::from_ref(&text)).is_err());
    }
    let logs = logs.lock();
    let sources: Vec<&str> = logs.iter().map(|(source, _)| *source).collect();
    // The MEMORY flag is sticky, so only the first failure reports it.
    assert_eq!(sources, vec!["builtins", "arena", "builtins"]);
    assert!(logs[0].1.starts_with("toArrayBuffer raised OutOfMemory"));
    assert_eq!(logs[1].1, "MEMORY flag raised during toArrayBuffer");
}

#[test]
fn custom_hardware_layers_are_used() {
    let hal = Arc::new(SoftwareHal::new(8_000_000, Default::default()));
    let runtime = SubstrateRuntime::bootstrap().with_hal(hal.clone()).build();
    call(&runtime, "setBootCode", json!(["reset()"]));
    let snapshot = hal.snapshot();
    assert_eq!(snapshot.boot_code.as_deref(), Some("reset()"));
    assert!(!snapshot.boot_always_exec);
    assert_eq!(snapshot.clock_hz, 8_000_000);
}

#[test]
fn failures_become_exception_values() {
    let runtime = SubstrateRuntime::new();
    let cases = [
        ("sum", json!([5]), "TypeMismatchError"),
        ("variance", json!([[1]]), "ArgumentCountError"),
        ("FFT", json!([[1, 2, 3]]), "RangeError"),
        ("FFT", json!([[1, 2], [1, 2, 3, 4]]), "LengthMismatchError"),
        ("toArrayBuffer", json!(["\u{2603}"]), "RangeError"),
        ("sendUSBHID", json!([[1]]), "HardwareError"),
        ("nativeCall", json!([4096, "void"]), "TypeMismatchError"),
    ];
    for (name, input, expected) in cases {
        let values = args(&runtime, input);
        let exception = runtime
            .invoke_or_exception(name, &values)
            .expect_err(name);
        let json = exception.to_json();
        assert_eq!(json["name"], json!(expected), "{name}: {json}");
        assert!(json["message"].as_str().is_some_and(|text| !text.is_empty()));
    }
}

#[cfg(feature = "ffi")]
#[test]
fn native_access_is_opt_in() {
    let mut runtime = SubstrateRuntime::new();
    assert!(!runtime.builtins().contains("memoryArea"));
    // SAFETY: the test only wraps memory it owns and never calls a native address.
    unsafe { runtime.enable_native_access() };
    assert!(runtime.builtins().contains("nativeCall"));

    let mut storage = vec![0u8; 4];
    let address = runtime
        .arena()
        .number(storage.as_mut_ptr() as usize as f64)
        .expect("address");
    let len = runtime.arena().integer(4).expect("len");
    let area = runtime.invoke("memoryArea", &[address, len]).expect("area");
    let name = runtime.arena().string("Uint16Array").expect("name");
    let words = runtime.invoke("reinterpretView", &[area, name]).expect("view");
    words.write_element(0, 0x0102 as f64).expect("write");
    drop(words);
    assert_eq!(storage, vec![2, 1, 0, 0]);

    let bogus = args(&runtime, json!([0, "int(int)"]));
    let exception = runtime
        .invoke_or_exception("nativeFunction", &bogus)
        .expect_err("null address");
    assert_eq!(exception.to_json()["name"], json!("RangeError"));
}

//==============================================
// End of file
//==============================================
