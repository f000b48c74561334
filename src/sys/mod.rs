//! System layer for SolvraSubstrate: the hardware controls reachable from scripts.

pub mod hal;

pub use hal::{HalSnapshot, HardwareLayer, SoftwareHal};
