//! usb2ble - input-report translation core for a USB-to-BLE HID bridge.
//!
//! A wired keyboard or pointing device reports over USB at up to ~1 kHz in
//! bursts; a BLE HID peripheral notifies at a fixed ~133 Hz cadence. This
//! crate sits between the two and preserves input fidelity across that gap:
//!
//! 1. A report-descriptor parser turns the device's HID Report Descriptor
//!    into per-report-id bit-field layouts ([`hid::descriptor`]).
//! 2. A bit-level decoder applies a layout to raw input reports and extracts
//!    buttons and signed axes of arbitrary width ([`hid::decoder`]).
//! 3. A motion resampler integrates the bursty event stream into steady
//!    fixed-cadence frames without losing motion or button edges
//!    ([`resampler`]).
//!
//! The USB host stack and the BLE GATT stack are external collaborators:
//! transport glue feeds descriptor and report bytes into [`HidBridge`] and
//! implements [`HidSink`] for the outbound direction. The crate itself is
//! `no_std`, allocation-free, and host-testable (`cargo test`).

#![cfg_attr(not(test), no_std)]

// Keep this first so the log macros are in scope for every module.
pub(crate) mod fmt;

pub mod bridge;
pub mod config;
pub mod error;
pub mod hid;
pub mod resampler;

pub use bridge::{AttachInfo, DeviceHandle, HidBridge, HidSink, ProtocolHint, RoleFlags};
pub use error::{AttachError, SendError};
pub use hid::decoder::PointingSample;
pub use hid::descriptor::{parse_report_descriptor, BitField, LayoutCatalog, ReportLayout};
pub use resampler::{MotionResampler, ResamplerState, SharedResampler, TickOutcome};
