//! HID Report Descriptor parsing into per-report bit-field layouts.
//!
//! A Report Descriptor (HID 1.11, section 6.2.2) is a sequence of short
//! items that declare the structure of a device's reports. This parser
//! performs a single linear scan and produces one [`ReportLayout`] per
//! distinct report id, each describing where the button block and the
//! X/Y/wheel/pan axes live inside that report's payload.
//!
//! Bit offsets are always relative to the first payload byte *after* the
//! report-id byte; the decoder adds the 8-bit skip when an id is present.
//!
//! Parsing is best-effort: a truncated item or an overflowed state stack
//! ends the scan, and whatever layouts were completed up to that point are
//! returned. A descriptor the parser cannot make sense of yields an empty
//! catalog and the caller falls back to fixed report formats.

use heapless::Vec;

use crate::config;
use crate::fmt::*;

/// Usage pages the translation core cares about.
pub(crate) const PAGE_GENERIC_DESKTOP: u16 = 0x01;
pub(crate) const PAGE_KEY_CODES: u16 = 0x07;
pub(crate) const PAGE_BUTTON: u16 = 0x09;
pub(crate) const PAGE_CONSUMER: u16 = 0x0C;

/// Generic Desktop usages.
pub(crate) const USAGE_MOUSE: u16 = 0x02;
pub(crate) const USAGE_KEYBOARD: u16 = 0x06;
pub(crate) const USAGE_X: u16 = 0x30;
pub(crate) const USAGE_Y: u16 = 0x31;
pub(crate) const USAGE_WHEEL: u16 = 0x38;

/// Consumer page AC Pan (horizontal scroll).
pub(crate) const USAGE_AC_PAN: u16 = 0x0238;

pub(crate) const COLLECTION_APPLICATION: u32 = 0x01;

// Input item flag bits (HID 1.11, 6.2.2.5). Bit 0 clear means Data, set
// means Constant (padding).
const INPUT_CONSTANT: u32 = 0x01;
const INPUT_VARIABLE: u32 = 0x02;

/// One extracted field: `bit_size == 0` means the field is absent.
///
/// For the button block, `bit_size` is the number of one-bit buttons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitField {
    /// Offset from the start of the payload, in bits.
    pub bit_offset: u16,
    /// Width in bits; zero when the layout has no such field.
    pub bit_size: u16,
}

impl BitField {
    pub fn is_present(&self) -> bool {
        self.bit_size != 0
    }

    #[cfg(test)]
    fn end_bit(&self) -> u16 {
        self.bit_offset + self.bit_size
    }
}

/// Bit-field layout of one input report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportLayout {
    /// Report id, or 0 when the descriptor uses no report ids.
    pub report_id: u8,
    /// Total payload length in bits, excluding any report-id byte.
    pub report_size_bits: u16,
    /// Button block; `bit_size` is the button count (one bit each).
    pub buttons: BitField,
    /// X displacement, signed.
    pub x: BitField,
    /// Y displacement, signed.
    pub y: BitField,
    /// Vertical wheel, signed.
    pub wheel: BitField,
    /// Horizontal pan (Consumer AC Pan), signed. Parsed for completeness;
    /// the outbound wire format has no pan field.
    pub pan: BitField,
}

impl ReportLayout {
    fn new(report_id: u8) -> Self {
        Self {
            report_id,
            ..Self::default()
        }
    }

    /// A layout that can drive the pointing path needs both axes.
    pub fn has_pointing_axes(&self) -> bool {
        self.x.is_present() && self.y.is_present()
    }
}

/// All layouts extracted from one descriptor, in encounter order.
pub type LayoutCatalog = Vec<ReportLayout, { config::MAX_REPORT_LAYOUTS }>;

/// Short-item classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ItemKind {
    Main,
    Global,
    Local,
    Reserved,
}

/// One decoded descriptor item.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Item {
    pub kind: ItemKind,
    pub tag: u8,
    /// Payload length in bytes (0, 1, 2 or 4).
    pub payload_len: u8,
    /// Payload, zero-extended little-endian.
    pub uval: u32,
    /// Payload, sign-extended by its length.
    pub ival: i32,
}

// Main item tags.
pub(crate) const TAG_INPUT: u8 = 0x8;
pub(crate) const TAG_OUTPUT: u8 = 0x9;
pub(crate) const TAG_COLLECTION: u8 = 0xA;
pub(crate) const TAG_FEATURE: u8 = 0xB;
pub(crate) const TAG_END_COLLECTION: u8 = 0xC;

// Global item tags.
pub(crate) const TAG_USAGE_PAGE: u8 = 0x0;
const TAG_LOGICAL_MIN: u8 = 0x1;
const TAG_LOGICAL_MAX: u8 = 0x2;
pub(crate) const TAG_REPORT_SIZE: u8 = 0x7;
pub(crate) const TAG_REPORT_ID: u8 = 0x8;
pub(crate) const TAG_REPORT_COUNT: u8 = 0x9;
const TAG_PUSH: u8 = 0xA;
const TAG_POP: u8 = 0xB;

// Local item tags.
pub(crate) const TAG_USAGE: u8 = 0x0;
pub(crate) const TAG_USAGE_MIN: u8 = 0x1;
pub(crate) const TAG_USAGE_MAX: u8 = 0x2;

const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Iterator over the short items of a descriptor.
///
/// Long items carry no information we use and are skipped whole. A
/// truncated item ends the iteration.
pub(crate) struct Items<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Items<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl Iterator for Items<'_> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            if self.offset >= self.data.len() {
                return None;
            }
            let prefix = self.data[self.offset];

            if prefix == LONG_ITEM_PREFIX {
                // [0xFE, data_len, long_tag, data...]
                if self.offset + 2 >= self.data.len() {
                    return None;
                }
                let skip = 3 + usize::from(self.data[self.offset + 1]);
                if self.offset + skip > self.data.len() {
                    return None;
                }
                self.offset += skip;
                continue;
            }

            let payload_len: usize = match prefix & 0x03 {
                0 => 0,
                1 => 1,
                2 => 2,
                _ => 4,
            };
            if self.offset + 1 + payload_len > self.data.len() {
                return None;
            }

            let mut uval: u32 = 0;
            for i in 0..payload_len {
                uval |= u32::from(self.data[self.offset + 1 + i]) << (8 * i);
            }
            let ival = match payload_len {
                1 => i32::from(uval as u8 as i8),
                2 => i32::from(uval as u16 as i16),
                _ => uval as i32,
            };

            let kind = match (prefix >> 2) & 0x03 {
                0 => ItemKind::Main,
                1 => ItemKind::Global,
                2 => ItemKind::Local,
                _ => ItemKind::Reserved,
            };

            self.offset += 1 + payload_len;
            return Some(Item {
                kind,
                tag: (prefix >> 4) & 0x0F,
                payload_len: payload_len as u8,
                uval,
                ival,
            });
        }
    }
}

/// Global item state, saved and restored by Push/Pop.
#[derive(Clone, Copy, Default)]
struct GlobalState {
    usage_page: u16,
    logical_min: i32,
    logical_max: i32,
    /// Raw (unsigned) logical maximum, kept to recognise descriptors that
    /// meant an unsigned range but encoded it in too few bytes.
    logical_max_u: u32,
    report_size: u16,
    report_count: u16,
    /// Report id currently in effect; 0 until the first Report ID item.
    report_id: u8,
}

/// A run of usages collected from Local items.
#[derive(Clone, Copy)]
struct UsageRange {
    page: u16,
    min: u16,
    max: u16,
    /// Built from a Usage Minimum / Usage Maximum pair (such ranges may be
    /// extended by an adjacent pair; bare Usage items stay distinct slots).
    from_pair: bool,
}

/// Local item state, reset after every Main item.
struct LocalState {
    ranges: Vec<UsageRange, { config::USAGE_RANGES_PER_ITEM }>,
    pending_min: Option<(u16, u16)>,
    pending_max: Option<(u16, u16)>,
}

impl LocalState {
    fn new() -> Self {
        Self {
            ranges: Vec::new(),
            pending_min: None,
            pending_max: None,
        }
    }

    fn reset(&mut self) {
        self.ranges.clear();
        self.pending_min = None;
        self.pending_max = None;
    }

    fn push_single(&mut self, page: u16, usage: u16) {
        // Contiguous bare usages stay separate: each keeps its own slot
        // when the field is Variable.
        if self
            .ranges
            .push(UsageRange {
                page,
                min: usage,
                max: usage,
                from_pair: false,
            })
            .is_err()
        {
            warn!("usage range list full, dropping usage {=u16:#x}", usage);
        }
    }

    fn complete_pair(&mut self) {
        let (Some((min_page, min)), Some((max_page, max))) = (self.pending_min, self.pending_max)
        else {
            return;
        };
        self.pending_min = None;
        self.pending_max = None;
        if min_page != max_page {
            return;
        }
        let (min, max) = if min <= max { (min, max) } else { (max, min) };

        // Min/max pairs may extend a previous pair-built range when
        // contiguous on the same page.
        if let Some(last) = self.ranges.last_mut() {
            if last.from_pair && last.page == min_page && last.max.wrapping_add(1) == min {
                last.max = max;
                return;
            }
        }
        if self
            .ranges
            .push(UsageRange {
                page: min_page,
                min,
                max,
                from_pair: true,
            })
            .is_err()
        {
            warn!("usage range list full, dropping range {=u16:#x}..{=u16:#x}", min, max);
        }
    }
}

/// Resolve the page of a Usage-class local item: a 4-byte payload carries
/// an explicit page in its high half, otherwise the global page applies.
fn usage_page_of(item: &Item, global_page: u16) -> (u16, u16) {
    if item.payload_len == 4 {
        ((item.uval >> 16) as u16, item.uval as u16)
    } else {
        (global_page, item.uval as u16)
    }
}

/// Parse a HID Report Descriptor into per-report layouts.
///
/// Returns an empty catalog when nothing parseable is found; partial
/// results survive a malformed tail.
pub fn parse_report_descriptor(desc: &[u8]) -> LayoutCatalog {
    let mut layouts = LayoutCatalog::new();
    if desc.is_empty() {
        return layouts;
    }

    let mut global = GlobalState::default();
    let mut stack: Vec<GlobalState, { config::GLOBAL_STATE_STACK_DEPTH }> = Vec::new();
    let mut local = LocalState::new();

    let mut depth: u8 = 0;
    // Depth at which a Mouse application collection opened; sticky until
    // its matching End Collection.
    let mut mouse_depth: Option<u8> = None;

    for item in Items::new(desc) {
        match item.kind {
            ItemKind::Global => match item.tag {
                TAG_USAGE_PAGE => global.usage_page = item.uval as u16,
                TAG_LOGICAL_MIN => global.logical_min = item.ival,
                TAG_LOGICAL_MAX => {
                    global.logical_max = item.ival;
                    global.logical_max_u = item.uval;
                }
                TAG_REPORT_SIZE => global.report_size = item.uval as u16,
                TAG_REPORT_COUNT => global.report_count = item.uval as u16,
                TAG_REPORT_ID => {
                    let id = item.uval as u8;
                    if id != 0 {
                        global.report_id = id;
                        // Create the slot eagerly so the catalog reflects
                        // every id encountered, fields or not.
                        let _ = layout_index(&mut layouts, id);
                    }
                }
                TAG_PUSH => {
                    if stack.push(global).is_err() {
                        warn!("descriptor state stack overflow, stopping parse");
                        break;
                    }
                }
                TAG_POP => {
                    if let Some(saved) = stack.pop() {
                        global = saved;
                    }
                }
                _ => {}
            },
            ItemKind::Local => match item.tag {
                TAG_USAGE => {
                    let (page, usage) = usage_page_of(&item, global.usage_page);
                    local.push_single(page, usage);
                }
                TAG_USAGE_MIN => {
                    // A second minimum without an intervening maximum
                    // overwrites the pending one.
                    local.pending_min = Some(usage_page_of(&item, global.usage_page));
                    local.complete_pair();
                }
                TAG_USAGE_MAX => {
                    local.pending_max = Some(usage_page_of(&item, global.usage_page));
                    local.complete_pair();
                }
                _ => {}
            },
            ItemKind::Main => {
                match item.tag {
                    TAG_COLLECTION => {
                        depth = depth.saturating_add(1);
                        if item.uval == COLLECTION_APPLICATION
                            && mouse_depth.is_none()
                            && local.ranges.iter().any(|r| {
                                r.page == PAGE_GENERIC_DESKTOP
                                    && r.min <= USAGE_MOUSE
                                    && USAGE_MOUSE <= r.max
                            })
                        {
                            mouse_depth = Some(depth);
                        }
                    }
                    TAG_END_COLLECTION => {
                        if mouse_depth == Some(depth) {
                            mouse_depth = None;
                        }
                        depth = depth.saturating_sub(1);
                    }
                    TAG_INPUT => {
                        if apply_input(
                            &mut layouts,
                            global.report_id,
                            &global,
                            &local,
                            mouse_depth.is_some(),
                            item.uval,
                        )
                        .is_err()
                        {
                            break;
                        }
                    }
                    // Output and Feature items consume no input bits.
                    TAG_OUTPUT | TAG_FEATURE => {}
                    _ => {}
                }
                local.reset();
            }
            ItemKind::Reserved => {}
        }
    }

    layouts
}

/// Find or create the layout slot for `report_id`. `None` when the
/// catalog is full (that report's fields are then ignored).
fn layout_index(layouts: &mut LayoutCatalog, report_id: u8) -> Option<usize> {
    if let Some(idx) = layouts.iter().position(|l| l.report_id == report_id) {
        return Some(idx);
    }
    if layouts.push(ReportLayout::new(report_id)).is_err() {
        warn!("layout catalog full, ignoring report id {=u8}", report_id);
        return None;
    }
    Some(layouts.len() - 1)
}

/// Handle one Input main item: classify its usage ranges into layout
/// fields and advance the layout's bit cursor.
///
/// `Err` aborts the scan (malformed descriptor); completed layouts are
/// still returned by the caller.
fn apply_input(
    layouts: &mut LayoutCatalog,
    current_id: u8,
    global: &GlobalState,
    local: &LocalState,
    in_mouse_collection: bool,
    flags: u32,
) -> Result<(), ()> {
    let nbits = u32::from(global.report_size) * u32::from(global.report_count);
    if nbits == 0 {
        // Local items applied to a main item with no controls.
        return Ok(());
    }

    // A logical minimum above the maximum is only legal when the device
    // meant an unsigned range and encoded the maximum in too few bytes
    // (e.g. `25 FF` for 0..255). Anything else is malformed.
    if global.logical_min > global.logical_max
        && !(global.logical_min >= 0 && (global.logical_max_u as i64) >= global.logical_min as i64)
    {
        warn!("logical min {=i32} > max {=i32}, stopping parse", global.logical_min, global.logical_max);
        return Err(());
    }

    // Revisiting an id resumes that layout's bit cursor; descriptors may
    // interleave report ids.
    let Some(idx) = layout_index(layouts, current_id) else {
        return Ok(());
    };
    let layout = &mut layouts[idx];

    let base = u32::from(layout.report_size_bits);
    if base + nbits > u32::from(u16::MAX) {
        warn!("report exceeds {=u16} bits, stopping parse", u16::MAX);
        return Err(());
    }

    let is_constant = flags & INPUT_CONSTANT != 0;
    let is_variable = flags & INPUT_VARIABLE != 0;

    let pointing_context = in_mouse_collection
        || local.ranges.iter().any(|r| {
            matches!(r.page, PAGE_GENERIC_DESKTOP | PAGE_BUTTON | PAGE_CONSUMER)
        });

    if !is_constant && pointing_context {
        if is_variable {
            // Each of the report_count slots takes the next usage in turn.
            let mut slot: u16 = 0;
            'ranges: for range in &local.ranges {
                for usage in range.min..=range.max {
                    if slot >= global.report_count {
                        break 'ranges;
                    }
                    let offset = (base + u32::from(slot) * u32::from(global.report_size)) as u16;
                    assign_variable(layout, range.page, usage, offset, global.report_size);
                    slot += 1;
                }
            }
        } else {
            // Array field: all slots share one offset and the usage range
            // maps to array values. Only the button block is meaningful
            // here; axes require Variable fields.
            for range in &local.ranges {
                if range.page == PAGE_BUTTON && range.min >= 1 {
                    if !layout.buttons.is_present() {
                        layout.buttons.bit_offset = base as u16;
                    }
                    // The usage span cannot claim more bits than the
                    // field actually occupies.
                    let span = (range.max - range.min + 1).min(nbits as u16);
                    layout.buttons.bit_size = layout.buttons.bit_size.max(span);
                }
            }
        }
    }

    // The cursor advances whether or not the field was recognised;
    // constants are padding but still occupy bits.
    layout.report_size_bits = (base + nbits) as u16;
    Ok(())
}

/// Route one variable-field slot into the matching layout field.
/// First occurrence wins, which keeps fields non-overlapping.
fn assign_variable(layout: &mut ReportLayout, page: u16, usage: u16, offset: u16, size: u16) {
    match (page, usage) {
        (PAGE_BUTTON, u) if u >= 1 => {
            if !layout.buttons.is_present() {
                layout.buttons.bit_offset = offset;
            }
            // Multiple button fields extend the count.
            layout.buttons.bit_size += 1;
        }
        (PAGE_GENERIC_DESKTOP, USAGE_X) => {
            if !layout.x.is_present() {
                layout.x = BitField {
                    bit_offset: offset,
                    bit_size: size,
                };
            }
        }
        (PAGE_GENERIC_DESKTOP, USAGE_Y) => {
            if !layout.y.is_present() {
                layout.y = BitField {
                    bit_offset: offset,
                    bit_size: size,
                };
            }
        }
        (PAGE_GENERIC_DESKTOP, USAGE_WHEEL) => {
            if !layout.wheel.is_present() {
                layout.wheel = BitField {
                    bit_offset: offset,
                    bit_size: size,
                };
            }
        }
        (PAGE_CONSUMER, USAGE_AC_PAN) => {
            if !layout.pan.is_present() {
                layout.pan = BitField {
                    bit_offset: offset,
                    bit_size: size,
                };
            }
        }
        _ => {}
    }
}

/// Debug-time check of the layout invariants: fields fit inside the
/// report and do not overlap.
#[cfg(test)]
pub(crate) fn layout_is_well_formed(layout: &ReportLayout) -> bool {
    let fields = [
        layout.buttons,
        layout.x,
        layout.y,
        layout.wheel,
        layout.pan,
    ];
    for (i, a) in fields.iter().enumerate() {
        if !a.is_present() {
            continue;
        }
        if a.end_bit() > layout.report_size_bits {
            return false;
        }
        for b in fields.iter().skip(i + 1) {
            if b.is_present() && a.bit_offset < b.end_bit() && b.bit_offset < a.end_bit() {
                return false;
            }
        }
    }
    true
}
