//! Glyph metrics interface.
//!
//! The font database lives outside the formatting core; this trait is the only
//! way the core learns glyph widths.

/// Mounted font position.
pub type FontId = u16;

/// Optional metrics hook for glyph-accurate widths.
pub trait GlyphMetrics: Send + Sync {
    /// Advance width of `ch` in basic units, or `None` when the font lacks it.
    fn char_width(&self, ch: char, font: FontId, size: i32) -> Option<i32>;

    /// Width of an inter-word space in basic units.
    ///
    /// `space_size` is in twelfths of an em, as set by the space-size request.
    fn space_width(&self, font: FontId, size: i32, space_size: i32) -> i32;

    /// Kerning adjustment between two adjacent glyphs.
    ///
    /// Default reports no kerning.
    fn kern(&self, _left: char, _right: char, _font: FontId, _size: i32) -> Option<i32> {
        None
    }

    /// Whether `font` names a mounted font.
    ///
    /// Default accepts every font.
    fn is_valid_font(&self, _font: FontId) -> bool {
        true
    }
}

/// Fixed-pitch fallback metrics.
///
/// Every glyph is half an em wide; an em equals the point size multiplied by
/// `units_per_point`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedPitchMetrics {
    /// Basic units per typographic point.
    pub units_per_point: i32,
    /// Highest valid font position.
    pub max_font: FontId,
}

impl Default for FixedPitchMetrics {
    fn default() -> Self {
        Self {
            units_per_point: 10,
            max_font: 8,
        }
    }
}

impl FixedPitchMetrics {
    fn em(&self, size: i32) -> i32 {
        size.saturating_mul(self.units_per_point).max(1)
    }
}

impl GlyphMetrics for FixedPitchMetrics {
    fn char_width(&self, ch: char, font: FontId, size: i32) -> Option<i32> {
        if font > self.max_font || ch.is_control() {
            return None;
        }
        Some(self.em(size) / 2)
    }

    fn space_width(&self, _font: FontId, size: i32, space_size: i32) -> i32 {
        // A space is a third of an em at the default size of 12/12.
        self.em(size).saturating_mul(space_size.max(0)) / 36
    }

    fn is_valid_font(&self, font: FontId) -> bool {
        font <= self.max_font
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pitch_widths_follow_point_size() {
        let m = FixedPitchMetrics::default();
        assert_eq!(m.char_width('a', 1, 10), Some(50));
        assert_eq!(m.char_width('a', 1, 20), Some(100));
        assert_eq!(m.space_width(1, 10, 12), 33);
    }

    #[test]
    fn unknown_fonts_and_controls_have_no_glyph() {
        let m = FixedPitchMetrics::default();
        assert_eq!(m.char_width('a', 99, 10), None);
        assert_eq!(m.char_width('\u{7}', 1, 10), None);
        assert!(!m.is_valid_font(99));
    }
}
