use roffline::{FontId, HyphenationLimits, HyphenationMode};
use serde::{Deserialize, Serialize};

/// How filled lines are adjusted to the target length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustMode {
    /// Ragged right.
    Left,
    /// Ragged left.
    Right,
    /// Centered.
    Center,
    /// Stretch interior spaces to both margins.
    #[default]
    Both,
}

/// Hyphenation settings applied to fresh environments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyphenationConfig {
    /// Mode bitmask; 0 disables automatic hyphenation.
    pub mode: u32,
    /// Largest per-space stretch that still makes hyphenation unnecessary in
    /// `Both` adjustment.
    pub space: i32,
    /// Largest right-margin gap that still makes hyphenation unnecessary in
    /// the other adjustment modes.
    pub margin: i32,
    /// Maximum consecutive hyphenated lines; negative means unlimited.
    pub line_max: i32,
    /// Name of the default hyphenation language.
    pub language: String,
    /// Longest word the engine will hyphenate.
    pub max_word_len: usize,
    /// Longest pattern window accepted by the pattern loader.
    pub max_pattern_len: usize,
}

impl Default for HyphenationConfig {
    fn default() -> Self {
        let limits = HyphenationLimits::default();
        Self {
            mode: HyphenationMode::ENABLED,
            space: 0,
            margin: 0,
            line_max: -1,
            language: "en".to_string(),
            max_word_len: limits.max_word_len,
            max_pattern_len: limits.max_pattern_len,
        }
    }
}

impl HyphenationConfig {
    pub fn mode(&self) -> HyphenationMode {
        HyphenationMode(self.mode)
    }

    pub fn limits(&self) -> HyphenationLimits {
        HyphenationLimits {
            max_word_len: self.max_word_len,
            max_pattern_len: self.max_pattern_len,
        }
    }
}

/// Formatting configuration.
///
/// All lengths are basic units; the defaults describe a US-letter page at
/// 720 units per inch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Basic units per inch.
    pub resolution: i32,
    /// Page length.
    pub page_length: i32,
    /// Horizontal offset of every output line.
    pub page_offset: i32,
    /// Line length of fresh environments.
    pub line_length: i32,
    /// Title length of fresh environments.
    pub title_length: i32,
    /// Indent of fresh environments.
    pub indent: i32,
    /// Baseline-to-baseline distance.
    pub vertical_spacing: i32,
    /// Extra space after each output line.
    pub post_vertical_spacing: i32,
    /// Line spacing multiplier (1 is single spaced).
    pub line_spacing: i32,
    /// Point size.
    pub point_size: i32,
    /// Font mounted at startup; must be known to the glyph metrics.
    pub default_font: FontId,
    /// Inter-word space size in twelfths of an em.
    pub space_size: i32,
    /// Additional sentence space size in twelfths of an em.
    pub sentence_space_size: i32,
    /// Adjustment mode.
    pub adjust: AdjustMode,
    /// Start in fill mode.
    pub fill: bool,
    /// Distance between the default repeating left tab stops.
    pub tab_interval: i32,
    /// Hyphenation defaults.
    pub hyphenation: HyphenationConfig,
    /// Macro sprung once at the end of input.
    pub end_macro: Option<String>,
    /// Maximum nesting depth of trap callbacks.
    pub max_trap_depth: usize,
    /// Maximum trap springs tolerated while ejecting one page.
    pub max_page_ejects: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            resolution: 720,
            page_length: 7920,
            page_offset: 720,
            line_length: 4680,
            title_length: 4680,
            indent: 0,
            vertical_spacing: 120,
            post_vertical_spacing: 0,
            line_spacing: 1,
            point_size: 10,
            default_font: 1,
            space_size: 12,
            sentence_space_size: 12,
            adjust: AdjustMode::Both,
            fill: true,
            tab_interval: 360,
            hyphenation: HyphenationConfig::default(),
            end_macro: None,
            max_trap_depth: 64,
            max_page_ejects: 32,
        }
    }
}

impl FormatConfig {
    /// Convenience for a page geometry with sensible defaults.
    pub fn for_page(line_length: i32, page_length: i32) -> Self {
        Self {
            line_length,
            title_length: line_length,
            page_length,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_page_keeps_title_in_step_with_line_length() {
        let cfg = FormatConfig::for_page(700, 1200);
        assert_eq!(cfg.line_length, 700);
        assert_eq!(cfg.title_length, 700);
        assert_eq!(cfg.page_length, 1200);
        assert_eq!(cfg.vertical_spacing, 120);
    }

    #[test]
    fn hyphenation_mode_defaults_to_enabled() {
        let cfg = FormatConfig::default();
        assert!(cfg.hyphenation.mode().is_enabled());
        assert!(cfg.hyphenation.line_max < 0);
    }
}
