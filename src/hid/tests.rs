//! Unit tests for the hid module family: descriptor parsing, device
//! classification, and report decoding.

use crate::hid::classify::{classify_descriptor, classify_with_catalog};
use crate::hid::decoder::{decode_pointing, PointingSample};
use crate::hid::descriptor::{layout_is_well_formed, parse_report_descriptor};
use crate::hid::keyboard::{KeyboardReport, KEYBOARD_REPORT_DESCRIPTOR};
use crate::hid::mouse::{PointingReport, POINTING_REPORT_DESCRIPTOR};

/// Classic 3-button, 8-bit boot-style mouse with a scroll wheel.
const BASIC_MOUSE_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (1)
    0x29, 0x03, //     Usage Maximum (3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Constant) - padding
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x01, //     Report Count (1)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// Real-world gaming mouse descriptor: 16 buttons, 16-bit axes, wheel and
/// AC Pan under report id 2, plus consumer (3), system control (4) and a
/// vendor report (8).
const MULTI_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0x85, 0x02, 0x09, 0x01, 0xA1, 0x00, //
    0x05, 0x09, 0x19, 0x01, 0x29, 0x10, 0x15, 0x00, 0x25, 0x01, 0x95, 0x10, //
    0x75, 0x01, 0x81, 0x02, //
    0x05, 0x01, 0x16, 0x01, 0x80, 0x26, 0xFF, 0x7F, 0x75, 0x10, 0x95, 0x02, //
    0x09, 0x30, 0x09, 0x31, 0x81, 0x06, //
    0x15, 0x81, 0x25, 0x7F, 0x75, 0x08, 0x95, 0x01, 0x09, 0x38, 0x81, 0x06, //
    0x05, 0x0C, 0x0A, 0x38, 0x02, 0x95, 0x01, 0x81, 0x06, 0xC0, 0xC0, //
    0x05, 0x0C, 0x09, 0x01, 0xA1, 0x01, 0x85, 0x03, 0x75, 0x10, 0x95, 0x02, //
    0x15, 0x01, 0x26, 0xFF, 0x02, 0x19, 0x01, 0x2A, 0xFF, 0x02, 0x81, 0x00, //
    0xC0, //
    0x05, 0x01, 0x09, 0x80, 0xA1, 0x01, 0x85, 0x04, 0x75, 0x02, 0x95, 0x01, //
    0x15, 0x01, 0x25, 0x03, 0x09, 0x82, 0x09, 0x81, 0x09, 0x83, 0x81, 0x60, //
    0x75, 0x06, 0x81, 0x03, 0xC0, //
    0x06, 0xBC, 0xFF, 0x09, 0x88, 0xA1, 0x01, 0x85, 0x08, 0x19, 0x01, 0x29, //
    0xFF, 0x15, 0x01, 0x26, 0xFF, 0x00, 0x75, 0x08, 0x95, 0x01, 0x81, 0x00, //
    0xC0,
];

/// Mouse with 16 buttons, 12-bit axes and 8 bits of trailing padding
/// under report id 2: 56 payload bits in total.
const TWELVE_BIT_MOUSE_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x02, //   Report ID (2)
    0x05, 0x09, //   Usage Page (Buttons)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x10, //   Usage Maximum (16)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x10, //   Report Count (16)
    0x81, 0x02, //   Input (Data, Variable)
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x16, 0x01, 0xF8, // Logical Minimum (-2047)
    0x26, 0xFF, 0x07, // Logical Maximum (2047)
    0x75, 0x0C, //   Report Size (12)
    0x95, 0x02, //   Report Count (2)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x81, 0x06, //   Input (Data, Variable, Relative)
    0x15, 0x81, //   Logical Minimum (-127)
    0x25, 0x7F, //   Logical Maximum (127)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x09, 0x38, //   Usage (Wheel)
    0x81, 0x06, //   Input (Data, Variable, Relative)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x01, //   Input (Constant) - padding
    0xC0, // End Collection
];

/// Hub-style stub: advertises a Keyboard usage but defines only two
/// modifier bits.
const HUB_STUB_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE1, //   Usage Maximum (Left Shift)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x02, //   Report Count (2)
    0x81, 0x02, //   Input (Data, Variable)
    0xC0, // End Collection
];

// Report types

#[test]
fn keyboard_report_roundtrip() {
    assert!(KeyboardReport::empty().is_empty());

    let raw = [0x02, 0x00, 0x04, 0x05, 0x06, 0x00, 0x00, 0x00, 0xAA];
    let report = KeyboardReport::from_usb_bytes(&raw).unwrap();
    assert_eq!(report.modifier, 0x02);
    assert_eq!(report.keycodes, [0x04, 0x05, 0x06, 0x00, 0x00, 0x00]);
    assert!(!report.is_empty());
    // The vendor tail byte is truncated away.
    assert_eq!(&report.to_bytes()[..], &raw[..8]);

    assert!(KeyboardReport::from_usb_bytes(&raw[..7]).is_none());
}

#[test]
fn pointing_report_serialises_little_endian() {
    let report = PointingReport {
        buttons: 0x03,
        dx: -2,
        dy: 0x0102,
        wheel: -1,
    };
    assert!(!report.is_idle());
    assert_eq!(report.to_bytes(), [0x03, 0xFE, 0xFF, 0x02, 0x01, 0xFF]);
    assert!(PointingReport::default().is_idle());
}

// Descriptor parser

#[test]
fn parses_basic_mouse_layout() {
    let catalog = parse_report_descriptor(BASIC_MOUSE_DESCRIPTOR);
    assert_eq!(catalog.len(), 1);
    let layout = &catalog[0];
    assert_eq!(layout.report_id, 0);
    assert_eq!(layout.report_size_bits, 32);
    assert_eq!((layout.buttons.bit_offset, layout.buttons.bit_size), (0, 3));
    assert_eq!((layout.x.bit_offset, layout.x.bit_size), (8, 8));
    assert_eq!((layout.y.bit_offset, layout.y.bit_size), (16, 8));
    assert_eq!((layout.wheel.bit_offset, layout.wheel.bit_size), (24, 8));
    assert!(!layout.pan.is_present());
    assert!(layout_is_well_formed(layout));
}

#[test]
fn parses_multi_report_descriptor() {
    let catalog = parse_report_descriptor(MULTI_REPORT_DESCRIPTOR);
    assert_eq!(catalog.len(), 4);

    let pointing = catalog.iter().find(|l| l.report_id == 2).unwrap();
    assert_eq!(pointing.report_size_bits, 64);
    assert_eq!((pointing.buttons.bit_offset, pointing.buttons.bit_size), (0, 16));
    assert_eq!((pointing.x.bit_offset, pointing.x.bit_size), (16, 16));
    assert_eq!((pointing.y.bit_offset, pointing.y.bit_size), (32, 16));
    assert_eq!((pointing.wheel.bit_offset, pointing.wheel.bit_size), (48, 8));
    assert_eq!((pointing.pan.bit_offset, pointing.pan.bit_size), (56, 8));
    assert!(layout_is_well_formed(pointing));

    // Consumer and system-control reports exist but carry no pointing
    // fields; the bit cursor still tracked their sizes.
    let consumer = catalog.iter().find(|l| l.report_id == 3).unwrap();
    assert_eq!(consumer.report_size_bits, 32);
    assert!(!consumer.has_pointing_axes());

    let system = catalog.iter().find(|l| l.report_id == 4).unwrap();
    assert_eq!(system.report_size_bits, 8);

    let vendor = catalog.iter().find(|l| l.report_id == 8).unwrap();
    assert_eq!(vendor.report_size_bits, 8);
    assert!(!vendor.buttons.is_present());
}

#[test]
fn parses_outbound_pointing_descriptor() {
    // The crate's own outbound report map must round-trip through its own
    // parser.
    let catalog = parse_report_descriptor(POINTING_REPORT_DESCRIPTOR);
    assert_eq!(catalog.len(), 1);
    let layout = &catalog[0];
    assert_eq!(layout.report_size_bits, 48);
    assert_eq!((layout.buttons.bit_offset, layout.buttons.bit_size), (0, 5));
    assert_eq!((layout.x.bit_offset, layout.x.bit_size), (8, 16));
    assert_eq!((layout.y.bit_offset, layout.y.bit_size), (24, 16));
    assert_eq!((layout.wheel.bit_offset, layout.wheel.bit_size), (40, 8));
}

#[test]
fn keyboard_descriptor_yields_no_pointing_fields() {
    let catalog = parse_report_descriptor(KEYBOARD_REPORT_DESCRIPTOR);
    assert_eq!(catalog.len(), 1);
    let layout = &catalog[0];
    // Modifiers (8) + reserved (8) + six key codes (48); the LED output
    // report does not consume input bits.
    assert_eq!(layout.report_size_bits, 64);
    assert!(!layout.has_pointing_axes());
    assert!(!layout.buttons.is_present());
}

#[test]
fn push_pop_restores_global_state() {
    let desc: &[u8] = &[
        0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, //
        0x05, 0x09, 0x19, 0x01, 0x29, 0x08, 0x15, 0x00, 0x25, 0x01, //
        0x75, 0x01, 0x95, 0x08, 0x81, 0x02, // 8 buttons at bit 0
        0x05, 0x01, 0x15, 0x81, 0x25, 0x7F, 0x75, 0x08, 0x95, 0x02, //
        0xA4, // Push
        0x75, 0x04, 0x95, 0x04, // clobber size/count
        0xB4, // Pop restores size=8 count=2
        0x09, 0x30, 0x09, 0x31, 0x81, 0x06, //
        0xC0,
    ];
    let catalog = parse_report_descriptor(desc);
    assert_eq!(catalog.len(), 1);
    let layout = &catalog[0];
    assert_eq!((layout.x.bit_offset, layout.x.bit_size), (8, 8));
    assert_eq!((layout.y.bit_offset, layout.y.bit_size), (16, 8));
    assert_eq!(layout.report_size_bits, 24);
}

#[test]
fn interleaved_report_ids_resume_their_cursors() {
    let desc: &[u8] = &[
        0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, //
        0x85, 0x01, // Report ID (1)
        0x05, 0x09, 0x19, 0x01, 0x29, 0x08, 0x15, 0x00, 0x25, 0x01, //
        0x75, 0x01, 0x95, 0x08, 0x81, 0x02, //
        0x85, 0x02, // Report ID (2)
        0x05, 0x01, 0x15, 0x81, 0x25, 0x7F, 0x75, 0x08, 0x95, 0x02, //
        0x09, 0x30, 0x09, 0x31, 0x81, 0x06, //
        0x85, 0x01, // back to Report ID (1)
        0x09, 0x38, 0x75, 0x08, 0x95, 0x01, 0x81, 0x06, //
        0xC0,
    ];
    let catalog = parse_report_descriptor(desc);
    assert_eq!(catalog.len(), 2);
    let one = catalog.iter().find(|l| l.report_id == 1).unwrap();
    assert_eq!((one.buttons.bit_offset, one.buttons.bit_size), (0, 8));
    // The wheel field resumes id 1's cursor after id 2's section.
    assert_eq!((one.wheel.bit_offset, one.wheel.bit_size), (8, 8));
    assert_eq!(one.report_size_bits, 16);
    let two = catalog.iter().find(|l| l.report_id == 2).unwrap();
    assert_eq!((two.x.bit_offset, two.x.bit_size), (0, 8));
    assert_eq!((two.y.bit_offset, two.y.bit_size), (8, 8));
}

#[test]
fn truncated_tail_keeps_completed_layouts() {
    // Cut the multi-report descriptor in the middle of the consumer
    // section; the pointing layout for id 2 must survive intact.
    let cut = &MULTI_REPORT_DESCRIPTOR[..80];
    let catalog = parse_report_descriptor(cut);
    let pointing = catalog.iter().find(|l| l.report_id == 2).unwrap();
    assert!(pointing.has_pointing_axes());
    assert_eq!(pointing.report_size_bits, 64);
}

#[test]
fn garbage_and_empty_input_yield_empty_catalogs() {
    assert!(parse_report_descriptor(&[]).is_empty());
    // A lone truncated 2-byte item.
    assert!(parse_report_descriptor(&[0x26, 0xFF]).is_empty());
}

#[test]
fn unsigned_logical_max_in_one_byte_is_tolerated() {
    // `25 FF` means 0..255 even though -1 < 0 when read signed; parsing
    // must not abort.
    let desc: &[u8] = &[
        0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, //
        0x05, 0x09, 0x19, 0x01, 0x29, 0x03, 0x15, 0x00, 0x25, 0xFF, //
        0x75, 0x01, 0x95, 0x03, 0x81, 0x02, //
        0xC0,
    ];
    let catalog = parse_report_descriptor(desc);
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].buttons.bit_size, 3);
}

#[test]
fn parser_handles_all_test_descriptors_without_overlap() {
    for desc in [
        BASIC_MOUSE_DESCRIPTOR,
        MULTI_REPORT_DESCRIPTOR,
        TWELVE_BIT_MOUSE_DESCRIPTOR,
        POINTING_REPORT_DESCRIPTOR,
        KEYBOARD_REPORT_DESCRIPTOR,
        HUB_STUB_DESCRIPTOR,
    ] {
        for layout in parse_report_descriptor(desc).iter() {
            assert!(layout_is_well_formed(layout));
        }
    }
}

// Device classifier

#[test]
fn classifies_mice_as_pointing() {
    for desc in [
        BASIC_MOUSE_DESCRIPTOR,
        MULTI_REPORT_DESCRIPTOR,
        TWELVE_BIT_MOUSE_DESCRIPTOR,
        POINTING_REPORT_DESCRIPTOR,
    ] {
        let class = classify_descriptor(desc);
        assert!(class.pointing, "descriptor should classify as pointing");
        assert!(!class.keyboard);
    }
}

#[test]
fn classifies_keyboard_with_enough_key_slots() {
    let class = classify_descriptor(KEYBOARD_REPORT_DESCRIPTOR);
    assert!(class.keyboard);
    assert!(!class.pointing);
}

#[test]
fn hub_stub_is_not_a_keyboard() {
    let class = classify_descriptor(HUB_STUB_DESCRIPTOR);
    assert!(!class.keyboard);
    assert!(!class.pointing);
}

#[test]
fn classifies_composite_keyboard_and_mouse() {
    // Two application collections in one descriptor.
    let mut combo = heapless::Vec::<u8, 256>::new();
    combo.extend_from_slice(KEYBOARD_REPORT_DESCRIPTOR).unwrap();
    combo.extend_from_slice(BASIC_MOUSE_DESCRIPTOR).unwrap();
    let class = classify_descriptor(&combo);
    assert!(class.keyboard);
    assert!(class.pointing);
}

#[test]
fn classify_accepts_prebuilt_catalog() {
    let catalog = parse_report_descriptor(BASIC_MOUSE_DESCRIPTOR);
    let class = classify_with_catalog(BASIC_MOUSE_DESCRIPTOR, &catalog);
    assert!(class.pointing);
}

// Report decoder

#[test]
fn decodes_basic_mouse_report_via_layout() {
    let catalog = parse_report_descriptor(BASIC_MOUSE_DESCRIPTOR);
    let sample = decode_pointing(&catalog, &[0x01, 0x05, 0xFB, 0x02]).unwrap();
    assert_eq!(
        sample,
        PointingSample {
            buttons: 0x01,
            dx: 5,
            dy: -5,
            wheel: 2,
        }
    );
}

#[test]
fn decodes_twelve_bit_report_with_id() {
    let catalog = parse_report_descriptor(TWELVE_BIT_MOUSE_DESCRIPTOR);
    assert_eq!(catalog.len(), 1);
    let layout = &catalog[0];
    assert_eq!(layout.report_id, 2);
    assert_eq!((layout.buttons.bit_offset, layout.buttons.bit_size), (0, 16));
    assert_eq!((layout.x.bit_offset, layout.x.bit_size), (16, 12));
    assert_eq!((layout.y.bit_offset, layout.y.bit_size), (28, 12));
    assert_eq!((layout.wheel.bit_offset, layout.wheel.bit_size), (40, 8));
    assert_eq!(layout.report_size_bits, 56);

    // Button 2 down, dx = -1 (0xFFF spanning a byte boundary), dy = 0,
    // wheel = +5.
    let report = [0x02, 0x02, 0x00, 0xFF, 0x0F, 0x00, 0x05, 0x00];
    let sample = decode_pointing(&catalog, &report).unwrap();
    assert_eq!(
        sample,
        PointingSample {
            buttons: 0x02,
            dx: -1,
            dy: 0,
            wheel: 5,
        }
    );
}

#[test]
fn rejects_report_shorter_than_its_layout() {
    let catalog = parse_report_descriptor(TWELVE_BIT_MOUSE_DESCRIPTOR);
    // id + 5 payload bytes = 40 bits < 56.
    assert!(decode_pointing(&catalog, &[0x02, 0x01, 0x02, 0x03, 0x04, 0x05]).is_none());
}

#[test]
fn sixteen_bit_axes_decode_signed() {
    let catalog = parse_report_descriptor(MULTI_REPORT_DESCRIPTOR);
    // id 2, buttons 0x0001, dx = -2 (0xFFFE), dy = 300 (0x012C), wheel -1,
    // pan 0 (ignored by the decoder).
    let report = [0x02, 0x01, 0x00, 0xFE, 0xFF, 0x2C, 0x01, 0xFF, 0x00];
    let sample = decode_pointing(&catalog, &report).unwrap();
    assert_eq!(sample.buttons, 0x01);
    assert_eq!(sample.dx, -2);
    assert_eq!(sample.dy, 300);
    assert_eq!(sample.wheel, -1);
}

#[test]
fn parse_then_decode_roundtrip() {
    // Encoding a tuple through the outbound wire format and decoding it
    // through the parsed outbound descriptor must be the identity.
    let catalog = parse_report_descriptor(POINTING_REPORT_DESCRIPTOR);
    let original = PointingReport {
        buttons: 0x15,
        dx: -300,
        dy: 77,
        wheel: -3,
    };
    let sample = decode_pointing(&catalog, &original.to_bytes()).unwrap();
    assert_eq!(sample.buttons, original.buttons);
    assert_eq!(sample.dx, original.dx);
    assert_eq!(sample.dy, original.dy);
    assert_eq!(sample.wheel, original.wheel);
}

// Fallback decoding (no usable catalog)

#[test]
fn fallback_three_byte_boot_report() {
    let sample = decode_pointing(&[], &[0x01, 0x05, 0xFB]).unwrap();
    assert_eq!(
        sample,
        PointingSample {
            buttons: 0x01,
            dx: 5,
            dy: -5,
            wheel: 0,
        }
    );
}

#[test]
fn fallback_four_byte_extended_report() {
    let sample = decode_pointing(&[], &[0x04, 0x80, 0x7F, 0xFF]).unwrap();
    assert_eq!(
        sample,
        PointingSample {
            buttons: 0x04,
            dx: -128,
            dy: 127,
            wheel: -1,
        }
    );
}

#[test]
fn fallback_id_prefixed_reports() {
    // 5-byte and 8-byte variants share the id-prefixed shape; the tail is
    // padding.
    for report in [
        &[0x01, 0x02, 0x0A, 0xF6, 0x01][..],
        &[0x01, 0x02, 0x0A, 0xF6, 0x01, 0x00, 0x00, 0x00][..],
    ] {
        let sample = decode_pointing(&[], report).unwrap();
        assert_eq!(
            sample,
            PointingSample {
                buttons: 0x02,
                dx: 10,
                dy: -10,
                wheel: 1,
            }
        );
    }
}

#[test]
fn fallback_rejects_short_reports() {
    assert!(decode_pointing(&[], &[]).is_none());
    assert!(decode_pointing(&[], &[0x01]).is_none());
    assert!(decode_pointing(&[], &[0x01, 0x02]).is_none());
}

#[test]
fn unknown_report_id_falls_back() {
    let catalog = parse_report_descriptor(TWELVE_BIT_MOUSE_DESCRIPTOR);
    // Id 7 matches nothing in the catalog; length-based fallback applies.
    let sample = decode_pointing(&catalog, &[0x07, 0x01, 0x05, 0xFB, 0x00]).unwrap();
    assert_eq!(sample.buttons, 0x01);
    assert_eq!(sample.dx, 5);
    assert_eq!(sample.dy, -5);
}
