//! Device classification from the report descriptor.
//!
//! The USB protocol field lies often enough (composite dongles, hubs that
//! advertise a Keyboard usage, mice enumerating as keyboards) that the
//! descriptor itself is the authority. Two independent signals contribute:
//!
//! 1. A layout heuristic: any parsed report with both X and Y axes marks
//!    the device as pointing.
//! 2. A structural scan of the application collections: a Mouse collection
//!    with X/Y input confirms pointing; a Keyboard collection is confirmed
//!    only when it defines enough key-codes-page input slots to be a real
//!    keyboard rather than a hub stub.

use crate::config;
use crate::hid::descriptor::{
    self, Item, ItemKind, Items, ReportLayout, COLLECTION_APPLICATION, PAGE_GENERIC_DESKTOP,
    PAGE_KEY_CODES, TAG_COLLECTION, TAG_END_COLLECTION, TAG_INPUT, TAG_REPORT_COUNT, TAG_USAGE,
    TAG_USAGE_MAX, TAG_USAGE_MIN, TAG_USAGE_PAGE,
};

/// Classification verdict. Both flags may be set for composite devices;
/// neither means the descriptor gave no usable signal and the transport's
/// protocol hint decides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceClass {
    pub keyboard: bool,
    pub pointing: bool,
}

/// Classify a descriptor, parsing it first. Pure function of the bytes.
pub fn classify_descriptor(desc: &[u8]) -> DeviceClass {
    classify_with_catalog(desc, &descriptor::parse_report_descriptor(desc))
}

/// Classify a descriptor against an already-parsed catalog.
pub fn classify_with_catalog(desc: &[u8], catalog: &[ReportLayout]) -> DeviceClass {
    let layout_pointing = catalog.iter().any(ReportLayout::has_pointing_axes);
    let scan = structural_scan(desc);

    DeviceClass {
        keyboard: scan.keyboard_confirmed(),
        pointing: layout_pointing || scan.pointing_confirmed(),
    }
}

#[derive(Default)]
struct ScanState {
    found_keyboard_usage: bool,
    found_mouse_usage: bool,
    key_code_slots: u32,
    xy_input_in_mouse: bool,
}

impl ScanState {
    fn keyboard_confirmed(&self) -> bool {
        self.found_keyboard_usage && self.key_code_slots >= config::KEYBOARD_MIN_KEY_SLOTS
    }

    fn pointing_confirmed(&self) -> bool {
        self.found_mouse_usage && self.xy_input_in_mouse
    }
}

fn structural_scan(desc: &[u8]) -> ScanState {
    let mut out = ScanState::default();

    let mut usage_page: u16 = 0;
    let mut report_count: u16 = 0;
    let mut depth: u8 = 0;
    let mut keyboard_depth: Option<u8> = None;
    let mut mouse_depth: Option<u8> = None;
    // Locals pending before the next Main item.
    let mut pending_keyboard = false;
    let mut pending_mouse = false;
    let mut pending_xy = false;

    for item in Items::new(desc) {
        match item.kind {
            ItemKind::Global => match item.tag {
                TAG_USAGE_PAGE => usage_page = item.uval as u16,
                TAG_REPORT_COUNT => report_count = item.uval as u16,
                _ => {}
            },
            ItemKind::Local => {
                if matches!(item.tag, TAG_USAGE | TAG_USAGE_MIN | TAG_USAGE_MAX) {
                    note_usage(
                        &item,
                        usage_page,
                        &mut pending_keyboard,
                        &mut pending_mouse,
                        &mut pending_xy,
                    );
                }
            }
            ItemKind::Main => {
                match item.tag {
                    TAG_COLLECTION => {
                        depth = depth.saturating_add(1);
                        if item.uval == COLLECTION_APPLICATION {
                            if pending_mouse && mouse_depth.is_none() {
                                out.found_mouse_usage = true;
                                mouse_depth = Some(depth);
                            }
                            if pending_keyboard && keyboard_depth.is_none() {
                                out.found_keyboard_usage = true;
                                keyboard_depth = Some(depth);
                            }
                        }
                    }
                    TAG_END_COLLECTION => {
                        if keyboard_depth == Some(depth) {
                            keyboard_depth = None;
                        }
                        if mouse_depth == Some(depth) {
                            mouse_depth = None;
                        }
                        depth = depth.saturating_sub(1);
                    }
                    TAG_INPUT => {
                        if keyboard_depth.is_some() && usage_page == PAGE_KEY_CODES {
                            out.key_code_slots += u32::from(report_count);
                        }
                        if mouse_depth.is_some() && pending_xy {
                            out.xy_input_in_mouse = true;
                        }
                    }
                    _ => {}
                }
                pending_keyboard = false;
                pending_mouse = false;
                pending_xy = false;
            }
            ItemKind::Reserved => {}
        }
    }

    out
}

fn note_usage(
    item: &Item,
    global_page: u16,
    pending_keyboard: &mut bool,
    pending_mouse: &mut bool,
    pending_xy: &mut bool,
) {
    let (page, usage) = if item.payload_len == 4 {
        ((item.uval >> 16) as u16, item.uval as u16)
    } else {
        (global_page, item.uval as u16)
    };
    if page != PAGE_GENERIC_DESKTOP {
        return;
    }
    match usage {
        descriptor::USAGE_MOUSE => *pending_mouse = true,
        descriptor::USAGE_KEYBOARD => *pending_keyboard = true,
        descriptor::USAGE_X | descriptor::USAGE_Y => *pending_xy = true,
        _ => {}
    }
}
