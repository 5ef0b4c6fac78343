pub type Rgb = (u8, u8, u8);

/// Pin color for a spot somebody has already achieved.
pub const MARKER_ACHIEVED: Rgb = (0xee, 0x00, 0x8c);
/// Pin color for a spot that is still open.
pub const MARKER_PENDING: Rgb = (0x00, 0xcc, 0x55);
/// Stroke color of the active walking route.
pub const ROUTE_LINE: Rgb = (0x3b, 0x9d, 0xdd);

pub fn marker_color(achieved: bool) -> Rgb {
    if achieved {
        MARKER_ACHIEVED
    } else {
        MARKER_PENDING
    }
}

/// `#rrggbb` form used by map styles.
pub fn to_hex((r, g, b): Rgb) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

#[cfg(test)]
mod tests {
    use super::{ROUTE_LINE, marker_color, to_hex};

    #[test]
    fn marker_colors_match_map_style() {
        assert_eq!(to_hex(marker_color(true)), "#ee008c");
        assert_eq!(to_hex(marker_color(false)), "#00cc55");
        assert_eq!(to_hex(ROUTE_LINE), "#3b9ddd");
    }
}
