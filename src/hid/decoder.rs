//! Raw input report decoding.
//!
//! With a parsed layout catalog, reports are decoded field-by-field at
//! whatever bit offsets and widths the device declared. Without one (the
//! parser failed or the descriptor was unavailable), fixed fallback
//! formats chosen by report length keep basic devices working.

use crate::hid::bits::{get_bits_s, get_bits_u};
use crate::hid::descriptor::ReportLayout;

/// A decoded pointing report, normalised to the core's working widths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PointingSample {
    /// Raw button bits (masked to the wire width at push time).
    pub buttons: u8,
    pub dx: i16,
    pub dy: i16,
    pub wheel: i8,
}

/// Outcome of layout selection for one raw report.
pub(crate) enum Selection<'a> {
    /// Decode `payload` against this layout.
    Layout {
        layout: &'a ReportLayout,
        /// Whether the first buffer byte was consumed as the report id.
        skip_id: bool,
    },
    /// No catalog entry applies; use the fixed fallback formats.
    Fallback,
    /// A layout matched but the buffer cannot hold it. Never decode a
    /// partial report.
    Reject,
}

/// Pick the layout for a raw report buffer.
///
/// When the catalog multiplexes report ids, the first byte selects the
/// layout. A buffer whose id matches nothing is retried against an id-0
/// layout (some devices drop the id at run time) and otherwise falls back.
pub(crate) fn select_layout<'a>(catalog: &'a [ReportLayout], data: &[u8]) -> Selection<'a> {
    if catalog.is_empty() || data.is_empty() {
        return Selection::Fallback;
    }

    let has_ids = catalog.iter().any(|l| l.report_id != 0);
    if has_ids {
        let id = data[0];
        if let Some(layout) = catalog.iter().find(|l| l.report_id == id) {
            return if layout_fits(layout, data.len() - 1) {
                Selection::Layout {
                    layout,
                    skip_id: true,
                }
            } else {
                Selection::Reject
            };
        }
        if let Some(layout) = catalog
            .iter()
            .find(|l| l.report_id == 0 && layout_fits(l, data.len()))
        {
            return Selection::Layout {
                layout,
                skip_id: false,
            };
        }
        return Selection::Fallback;
    }

    match catalog.iter().find(|l| l.report_id == 0) {
        Some(layout) if layout_fits(layout, data.len()) => Selection::Layout {
            layout,
            skip_id: false,
        },
        Some(_) => Selection::Reject,
        None => Selection::Fallback,
    }
}

fn layout_fits(layout: &ReportLayout, payload_len: usize) -> bool {
    usize::from(layout.report_size_bits) <= payload_len * 8
}

/// Decode a pointing report against the catalog, or `None` for a no-op.
pub fn decode_pointing(catalog: &[ReportLayout], data: &[u8]) -> Option<PointingSample> {
    match select_layout(catalog, data) {
        Selection::Layout { layout, skip_id } => {
            let payload = if skip_id { &data[1..] } else { data };
            Some(decode_with_layout(layout, payload))
        }
        Selection::Fallback => decode_fallback(data),
        Selection::Reject => None,
    }
}

/// Extract the layout's fields from a payload (report id already
/// stripped). The buffer has been size-checked by selection.
pub(crate) fn decode_with_layout(layout: &ReportLayout, payload: &[u8]) -> PointingSample {
    let field_u = |f: crate::hid::descriptor::BitField| {
        get_bits_u(payload, u32::from(f.bit_offset), u32::from(f.bit_size))
    };
    let field_s = |f: crate::hid::descriptor::BitField| {
        if f.is_present() {
            get_bits_s(payload, u32::from(f.bit_offset), u32::from(f.bit_size))
        } else {
            0
        }
    };

    // Sign is preserved through truncation: the extractor already
    // sign-extended to i32.
    PointingSample {
        buttons: field_u(layout.buttons) as u8,
        dx: field_s(layout.x) as i16,
        dy: field_s(layout.y) as i16,
        wheel: field_s(layout.wheel) as i8,
    }
}

/// Fixed layouts by report length, for devices without a usable catalog:
/// 3-byte boot protocol, 4-byte extended, and id-prefixed 5..8-byte
/// variants with trailing padding.
pub(crate) fn decode_fallback(data: &[u8]) -> Option<PointingSample> {
    match data.len() {
        3 => Some(PointingSample {
            buttons: data[0],
            dx: i16::from(data[1] as i8),
            dy: i16::from(data[2] as i8),
            wheel: 0,
        }),
        4 => Some(PointingSample {
            buttons: data[0],
            dx: i16::from(data[1] as i8),
            dy: i16::from(data[2] as i8),
            wheel: data[3] as i8,
        }),
        n if n >= 5 => Some(PointingSample {
            buttons: data[1],
            dx: i16::from(data[2] as i8),
            dy: i16::from(data[3] as i8),
            wheel: data[4] as i8,
        }),
        _ => None,
    }
}
