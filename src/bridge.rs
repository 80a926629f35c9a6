//! Core facade - the contract between the transports and the translation
//! core.
//!
//! Transport glue calls in with descriptor bytes on attach, raw report
//! bytes on input, sink readiness changes, link-interval updates, and a
//! periodic tick; the core calls out exclusively through [`HidSink`].
//! Keyboard reports pass straight through (their cadence is already low),
//! pointing reports are decoded and resampled, and anything else small
//! enough is treated as consumer control and forwarded opaquely.
//!
//! Three tasks may call in concurrently (USB input, tick, sink state);
//! see the locking notes on each method. No call ever fails fatally -
//! problems are absorbed and show up in [`Diagnostics`].

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::config;
use crate::error::{AttachError, SendError};
use crate::fmt::*;
use crate::hid::classify::{classify_with_catalog, DeviceClass};
use crate::hid::consumer::ConsumerReport;
use crate::hid::decoder::{self, Selection};
use crate::hid::descriptor::{parse_report_descriptor, ReportLayout};
use crate::hid::keyboard::KeyboardReport;
use crate::resampler::{SharedResampler, TickOutcome};

/// The transport's idea of what the device is, from the USB interface
/// protocol field. Only consulted when the descriptor gives no verdict or
/// an ambiguous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolHint {
    None,
    Keyboard,
    Pointing,
}

/// Resolved device role(s).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoleFlags {
    pub keyboard: bool,
    pub pointing: bool,
}

/// Opaque handle for an attached device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle(u8);

/// Result of a successful attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttachInfo {
    pub handle: DeviceHandle,
    pub roles: RoleFlags,
}

/// Outbound capability set the transport glue must provide.
///
/// Every send returns synchronously with a categorical result; the core
/// never blocks on the sink. Implementations typically front a GATT
/// notification queue.
pub trait HidSink {
    /// Whether the sink can accept notifications at all (connected,
    /// subscribed, encrypted - whatever the transport requires).
    fn is_ready(&self) -> bool;
    /// 8-byte boot-compatible keyboard report.
    fn send_keyboard(&self, report: &[u8; 8]) -> Result<(), SendError>;
    /// 6-byte pointing report.
    fn send_pointing(&self, report: &[u8; 6]) -> Result<(), SendError>;
    /// 2-byte consumer-control report.
    fn send_consumer(&self, report: &[u8; 2]) -> Result<(), SendError>;
}

/// Monotonic diagnostic counters; never reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    pub send_success: u32,
    pub send_failure: u32,
    pub send_not_ready: u32,
    /// Inbound reports dropped (too short, unknown handle, oversized
    /// layout).
    pub reports_rejected: u32,
    /// Descriptors from which no layout could be parsed.
    pub descriptor_failures: u32,
    /// Pointing events dropped to ring overflow.
    pub ring_overflow: u32,
}

struct DeviceSlot {
    in_use: bool,
    roles: RoleFlags,
    catalog: Vec<ReportLayout, { config::MAX_REPORT_LAYOUTS }>,
}

impl DeviceSlot {
    const fn empty() -> Self {
        Self {
            in_use: false,
            roles: RoleFlags {
                keyboard: false,
                pointing: false,
            },
            catalog: Vec::new(),
        }
    }
}

/// Last (device, report id) -> layout hit. Input reports arrive at up to
/// 1 kHz from the same report id; this skips the catalog scan on the hot
/// path.
#[derive(Clone, Copy)]
struct CachedLayout {
    device: u8,
    report_id: u8,
    skip_id: bool,
    layout: ReportLayout,
}

struct DeviceTable {
    slots: [DeviceSlot; config::MAX_DEVICES],
    cache: Option<CachedLayout>,
}

impl DeviceTable {
    const fn new() -> Self {
        Self {
            slots: [const { DeviceSlot::empty() }; config::MAX_DEVICES],
            cache: None,
        }
    }
}

/// What the input path decided to do with a pointing report, resolved
/// under the table lock.
#[derive(Clone, Copy)]
enum PointingPlan {
    Layout { layout: ReportLayout, skip_id: bool },
    Fallback,
    Reject,
}

/// The translation core. One instance per bridge; safe to share between
/// the USB input task, the tick task, and the sink-state task.
pub struct HidBridge {
    devices: Mutex<CriticalSectionRawMutex, RefCell<DeviceTable>>,
    resampler: SharedResampler,
    send_interval_us: AtomicU32,
    send_success: AtomicU32,
    send_failure: AtomicU32,
    send_not_ready: AtomicU32,
    reports_rejected: AtomicU32,
    descriptor_failures: AtomicU32,
}

impl HidBridge {
    pub const fn new() -> Self {
        Self {
            devices: Mutex::new(RefCell::new(DeviceTable::new())),
            resampler: SharedResampler::new(),
            send_interval_us: AtomicU32::new(
                config::DEFAULT_SEND_INTERVAL_UNITS as u32 * config::LINK_INTERVAL_UNIT_US,
            ),
            send_success: AtomicU32::new(0),
            send_failure: AtomicU32::new(0),
            send_not_ready: AtomicU32::new(0),
            reports_rejected: AtomicU32::new(0),
            descriptor_failures: AtomicU32::new(0),
        }
    }

    /// Register a newly attached device from its report descriptor.
    ///
    /// Parses the descriptor into a layout catalog, classifies the device,
    /// and stores both. With a malformed or missing descriptor the
    /// transport's protocol hint decides the role and the decoder will use
    /// fixed fallback formats. Called from the (serialized) device
    /// management task.
    pub fn on_device_attached(
        &self,
        descriptor: &[u8],
        hint: ProtocolHint,
    ) -> Result<AttachInfo, AttachError> {
        let catalog = parse_report_descriptor(descriptor);
        if catalog.is_empty() {
            self.descriptor_failures.fetch_add(1, Ordering::Relaxed);
        }

        let class = classify_with_catalog(descriptor, &catalog);
        let roles = resolve_roles(class, hint);

        self.devices.lock(|table| {
            let mut table = table.borrow_mut();
            let Some(index) = table.slots.iter().position(|s| !s.in_use) else {
                return Err(AttachError::TableFull);
            };
            let slot = &mut table.slots[index];
            slot.in_use = true;
            slot.roles = roles;
            slot.catalog = catalog;
            table.cache = None;
            info!(
                "device {=usize} attached: keyboard={=bool} pointing={=bool}",
                index, roles.keyboard, roles.pointing
            );
            Ok(AttachInfo {
                handle: DeviceHandle(index as u8),
                roles,
            })
        })
    }

    /// Forget an attached device and its catalog.
    pub fn on_device_detached(&self, handle: DeviceHandle) {
        self.devices.lock(|table| {
            let mut table = table.borrow_mut();
            if let Some(slot) = table.slots.get_mut(usize::from(handle.0)) {
                slot.in_use = false;
                slot.roles = RoleFlags::default();
                slot.catalog.clear();
            }
            table.cache = None;
        });
    }

    /// Route one raw input report. Called from the USB input path; never
    /// blocks (sink sends are synchronous by contract) and holds the
    /// table lock only while copying out one layout.
    pub fn on_input_report<S: HidSink>(
        &self,
        handle: DeviceHandle,
        data: &[u8],
        now_us: u64,
        sink: &S,
    ) {
        let Some(roles) = self.roles_of(handle) else {
            self.reports_rejected.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if roles.keyboard {
            self.forward_keyboard(data, sink);
        } else if roles.pointing {
            self.push_pointing(handle, data, now_us);
        } else {
            self.forward_consumer(data, sink);
        }
    }

    /// Sink readiness changed. A transition to not-ready clears the
    /// resampler so a reconnect does not replay stale motion.
    pub fn on_sink_ready_changed(&self, ready: bool, now_us: u64) {
        if !ready {
            self.resampler.clear(now_us);
        }
    }

    /// The sink negotiated a new link interval. The glue reprograms its
    /// tick timer from [`Self::send_interval_us`]; the first tick at the
    /// new period is due one interval after this call.
    pub fn on_link_interval_updated(&self, units_1_25ms: u16) {
        if units_1_25ms == 0 {
            warn!("ignoring zero link interval");
            return;
        }
        let us = u32::from(units_1_25ms) * config::LINK_INTERVAL_UNIT_US;
        self.send_interval_us.store(us, Ordering::Relaxed);
        info!("send interval now {=u32} us", us);
    }

    /// Current tick period in microseconds.
    pub fn send_interval_us(&self) -> u32 {
        self.send_interval_us.load(Ordering::Relaxed)
    }

    /// One resampler tick. Called by the glue's periodic timer; a tick
    /// either commits a window or leaves every byte of resampler state
    /// untouched.
    pub fn tick<S: HidSink>(&self, now_us: u64, sink: &S) -> TickOutcome {
        if !sink.is_ready() {
            return TickOutcome::Quiet;
        }
        let outcome = self
            .resampler
            .try_send(now_us, |bytes| sink.send_pointing(bytes));
        match outcome {
            TickOutcome::Sent => {
                self.send_success.fetch_add(1, Ordering::Relaxed);
            }
            TickOutcome::NotReady => {
                self.send_not_ready.fetch_add(1, Ordering::Relaxed);
            }
            TickOutcome::Failed => {
                self.send_failure.fetch_add(1, Ordering::Relaxed);
            }
            TickOutcome::Quiet => {}
        }
        outcome
    }

    /// Counter snapshot.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            send_success: self.send_success.load(Ordering::Relaxed),
            send_failure: self.send_failure.load(Ordering::Relaxed),
            send_not_ready: self.send_not_ready.load(Ordering::Relaxed),
            reports_rejected: self.reports_rejected.load(Ordering::Relaxed),
            descriptor_failures: self.descriptor_failures.load(Ordering::Relaxed),
            ring_overflow: self.resampler.overflow_count(),
        }
    }

    /// The resampler, for state inspection.
    pub fn resampler(&self) -> &SharedResampler {
        &self.resampler
    }

    fn roles_of(&self, handle: DeviceHandle) -> Option<RoleFlags> {
        self.devices.lock(|table| {
            let table = table.borrow();
            let slot = table.slots.get(usize::from(handle.0))?;
            slot.in_use.then_some(slot.roles)
        })
    }

    fn forward_keyboard<S: HidSink>(&self, data: &[u8], sink: &S) {
        let Some(report) = KeyboardReport::from_usb_bytes(data) else {
            warn!("keyboard report too short: {=usize} bytes", data.len());
            self.reports_rejected.fetch_add(1, Ordering::Relaxed);
            return;
        };
        self.count_send(sink.send_keyboard(&report.to_bytes()));
    }

    fn push_pointing(&self, handle: DeviceHandle, data: &[u8], now_us: u64) {
        let plan = self.devices.lock(|table| {
            let mut table = table.borrow_mut();
            let report_id = *data.first().unwrap_or(&0);

            if let Some(cached) = table.cache {
                if cached.device == handle.0
                    && cached.report_id == report_id
                    && payload_fits(&cached.layout, data.len(), cached.skip_id)
                {
                    return PointingPlan::Layout {
                        layout: cached.layout,
                        skip_id: cached.skip_id,
                    };
                }
            }

            let plan = match table.slots.get(usize::from(handle.0)) {
                Some(slot) if slot.in_use && !slot.catalog.is_empty() => {
                    match decoder::select_layout(&slot.catalog, data) {
                        Selection::Layout { layout, skip_id } => PointingPlan::Layout {
                            layout: *layout,
                            skip_id,
                        },
                        Selection::Fallback => PointingPlan::Fallback,
                        Selection::Reject => PointingPlan::Reject,
                    }
                }
                Some(slot) if slot.in_use => PointingPlan::Fallback,
                _ => PointingPlan::Reject,
            };

            if let PointingPlan::Layout { layout, skip_id } = plan {
                table.cache = Some(CachedLayout {
                    device: handle.0,
                    report_id,
                    skip_id,
                    layout,
                });
            }
            plan
        });

        let sample = match plan {
            PointingPlan::Layout { layout, skip_id } => {
                let payload = if skip_id { &data[1..] } else { data };
                Some(decoder::decode_with_layout(&layout, payload))
            }
            PointingPlan::Fallback => decoder::decode_fallback(data),
            PointingPlan::Reject => None,
        };

        match sample {
            Some(s) => self.resampler.push(now_us, s.dx, s.dy, s.wheel, s.buttons),
            None => {
                warn!("pointing report rejected: {=usize} bytes", data.len());
                self.reports_rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Anything that is neither keyboard nor pointing: strip the leading
    /// report id and forward payloads that fit the 2-byte consumer
    /// report.
    fn forward_consumer<S: HidSink>(&self, data: &[u8], sink: &S) {
        let payload = match data.split_first() {
            Some((_id, rest)) if rest.len() <= 2 => rest,
            _ => {
                self.reports_rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let report = if payload.is_empty() {
            // Release event: all usages cleared.
            ConsumerReport::default()
        } else {
            match ConsumerReport::from_payload(payload) {
                Some(r) => r,
                None => {
                    self.reports_rejected.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        };
        self.count_send(sink.send_consumer(&report.to_bytes()));
    }

    fn count_send(&self, result: Result<(), SendError>) {
        match result {
            Ok(()) => {
                self.send_success.fetch_add(1, Ordering::Relaxed);
            }
            Err(SendError::NotReady) => {
                self.send_not_ready.fetch_add(1, Ordering::Relaxed);
            }
            Err(SendError::Transient) => {
                self.send_failure.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for HidBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn payload_fits(layout: &ReportLayout, buf_len: usize, skip_id: bool) -> bool {
    let payload_len = if skip_id {
        buf_len.saturating_sub(1)
    } else {
        buf_len
    };
    usize::from(layout.report_size_bits) <= payload_len * 8
}

/// Combine the descriptor verdict with the transport hint.
///
/// The descriptor wins whenever it confirms something; the hint only
/// breaks the composite (keyboard + pointing) tie and covers devices
/// whose descriptor said nothing usable.
fn resolve_roles(class: DeviceClass, hint: ProtocolHint) -> RoleFlags {
    let mut roles = RoleFlags {
        keyboard: class.keyboard,
        pointing: class.pointing,
    };

    if roles.keyboard && roles.pointing {
        match hint {
            ProtocolHint::Keyboard => roles.pointing = false,
            ProtocolHint::Pointing => roles.keyboard = false,
            // No hint: prefer the pointing path, which degrades the most
            // without resampling.
            ProtocolHint::None => roles.keyboard = false,
        }
    } else if !roles.keyboard && !roles.pointing {
        match hint {
            ProtocolHint::Keyboard => roles.keyboard = true,
            ProtocolHint::Pointing => roles.pointing = true,
            ProtocolHint::None => {}
        }
    } else {
        match hint {
            ProtocolHint::Keyboard if roles.pointing && !roles.keyboard => {
                warn!("protocol field says keyboard, descriptor says pointing; trusting descriptor");
            }
            ProtocolHint::Pointing if roles.keyboard && !roles.pointing => {
                warn!("protocol field says pointing, descriptor says keyboard; trusting descriptor");
            }
            _ => {}
        }
    }

    roles
}
