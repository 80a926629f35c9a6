//! Compile-time configuration for the translation core.
//!
//! Ring sizes, catalog limits, and timing constants live here so they can
//! be tuned in one place. The core allocates nothing at runtime; every
//! capacity below is baked in at build time.

// Resampler timing

/// One BLE link-interval unit in microseconds (1.25 ms).
pub const LINK_INTERVAL_UNIT_US: u32 = 1250;

/// Default send interval in 1.25 ms units. 6 = 7.5 ms, roughly 133 Hz,
/// matching the shortest connection interval BLE HID hosts negotiate.
pub const DEFAULT_SEND_INTERVAL_UNITS: u16 = 6;

// Event ring

/// Capacity of the pointing-event ring. Power of two; 128 slots absorb a
/// full 1 kHz burst for over 100 ms before the oldest events are dropped.
pub const EVENT_RING_CAPACITY: usize = 128;

// Layout catalogs

/// Maximum report layouts retained per descriptor.
pub const MAX_REPORT_LAYOUTS: usize = 16;

/// Maximum simultaneously attached devices (typical: keyboard + mouse).
pub const MAX_DEVICES: usize = 4;

/// Depth of the parser's Push/Pop global-state stack.
pub const GLOBAL_STATE_STACK_DEPTH: usize = 4;

/// Maximum usage ranges collected between two Main items.
pub const USAGE_RANGES_PER_ITEM: usize = 8;

// Outbound wire limits

/// Outbound button mask: low 5 bits (left, right, middle, back, forward).
pub const BUTTON_MASK: u8 = 0x1F;

/// Saturation limit for the outbound X/Y fields. The value -32768 is
/// avoided because some hosts interpret it as "no change".
pub const AXIS_LIMIT: i32 = 32767;

/// Saturation limit for the outbound wheel field.
pub const WHEEL_LIMIT: i32 = 127;

// Classifier

/// Minimum cumulative key-codes-page report count for a Keyboard
/// application collection to be confirmed as a real keyboard. Filters
/// composite devices (hubs, dongles) that advertise a Keyboard usage but
/// define only a couple of modifier bits.
pub const KEYBOARD_MIN_KEY_SLOTS: u32 = 3;
