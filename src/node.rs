//! Content units ("nodes") and the narrow contract the formatter uses on them.
//!
//! The formatter never inspects a variant directly when deciding widths, breaks or
//! discardability; it goes through the methods on [`Node`].

use smallvec::SmallVec;

use crate::metrics::{FontId, GlyphMetrics};

/// How a unit takes part in automatic hyphenation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HyphenationType {
    /// Part of a word that may be hyphenated.
    Permitted,
    /// Suppresses automatic hyphenation of the adjacent word.
    Inhibited,
    /// A word boundary.
    Unnecessary,
}

/// A single glyph from a mounted font.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Glyph {
    pub ch: char,
    pub width: i32,
    pub font: FontId,
    pub size: i32,
    /// Normalized letter used for hyphenation, `None` for non-letters.
    pub hyphenation_code: Option<char>,
}

/// Inter-word space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Space {
    pub width: i32,
    /// Number of stretch slots this space contributes to justification.
    pub slots: u32,
    /// Frozen spaces are never stretched (tab and field content, already-adjusted lines).
    pub frozen: bool,
}

/// Origin of a discretionary break.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscretionaryKind {
    /// Inserted by the hyphenation engine.
    Auto,
    /// Placed by the user with the hyphenation indicator.
    Explicit,
    /// Zero-width break point, or a break after an explicit hyphen character.
    BreakPoint,
}

/// Break opportunity that contributes nothing unless the line breaks here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discretionary {
    /// Units ending the line when broken here.
    pub pre: Vec<Node>,
    /// Units starting the next line when broken here.
    pub post: Vec<Node>,
    pub kind: DiscretionaryKind,
}

/// Smallest formatted-output element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Glyph(Glyph),
    /// Two glyphs fused by kerning.
    KernPair { left: Glyph, right: Glyph, kern: i32 },
    Space(Space),
    HorizontalMotion { width: i32 },
    Discretionary(Discretionary),
    /// Zero-width marker preventing automatic hyphenation of the following word.
    HyphenInhibitor,
    /// Extra vertical space for the line: negative before it, positive after it.
    ExtraLineSpace(i32),
    /// Recorded line extent of captured output: negative pre, positive post.
    VerticalSize(i32),
}

/// Candidate line-ending position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakCandidate {
    /// Line width if broken here.
    pub width: i32,
    /// Stretchable space slots before the break.
    pub spaces: u32,
    /// Breaking here inserts a hyphen.
    pub hyphenated: bool,
    /// Index of the unit that is split when this candidate is taken.
    pub node_index: usize,
}

/// Break candidates reported by one unit, line-end-most first.
pub type BreakCandidates = SmallVec<[BreakCandidate; 2]>;

/// Vertical extents of one output line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerticalExtent {
    pub pre: i32,
    pub post: i32,
    pub pre_extra: i32,
    pub post_extra: i32,
}

impl VerticalExtent {
    pub fn new(pre: i32, post: i32) -> Self {
        Self {
            pre,
            post,
            pre_extra: 0,
            post_extra: 0,
        }
    }
}

impl Node {
    /// Horizontal advance of this unit when the line does not break at it.
    pub fn width(&self) -> i32 {
        match self {
            Self::Glyph(g) => g.width,
            Self::KernPair { left, right, kern } => {
                left.width.saturating_add(right.width).saturating_add(*kern)
            }
            Self::Space(s) => s.width,
            Self::HorizontalMotion { width } => *width,
            Self::Discretionary(_)
            | Self::HyphenInhibitor
            | Self::ExtraLineSpace(_)
            | Self::VerticalSize(_) => 0,
        }
    }

    /// Whether the unit is dropped at the end (or start) of an output line.
    pub fn is_discardable(&self) -> bool {
        matches!(self, Self::Space(_))
    }

    /// Stretch slots contributed to justification.
    pub fn nspaces(&self) -> u32 {
        match self {
            Self::Space(s) if !s.frozen => s.slots,
            _ => 0,
        }
    }

    pub fn hyphenation_type(&self) -> HyphenationType {
        match self {
            Self::Glyph(_) | Self::KernPair { .. } => HyphenationType::Permitted,
            // A break point after a hyphen character stays inside the word.
            Self::Discretionary(d) if d.kind == DiscretionaryKind::BreakPoint => {
                HyphenationType::Permitted
            }
            Self::HyphenInhibitor | Self::Discretionary(_) => HyphenationType::Inhibited,
            Self::Space(_)
            | Self::HorizontalMotion { .. }
            | Self::ExtraLineSpace(_)
            | Self::VerticalSize(_) => HyphenationType::Unnecessary,
        }
    }

    /// Break candidates inside this unit.
    ///
    /// `width_before` and `spaces_before` are the running totals of everything
    /// preceding the unit on the line.
    pub fn breakpoints(&self, index: usize, width_before: i32, spaces_before: u32) -> BreakCandidates {
        let mut out = BreakCandidates::new();
        match self {
            Self::Space(s) if !s.frozen => out.push(BreakCandidate {
                width: width_before,
                spaces: spaces_before,
                hyphenated: false,
                node_index: index,
            }),
            Self::Discretionary(d) => {
                let pre_width = crate::units::clamped_sum(d.pre.iter().map(Node::width));
                out.push(BreakCandidate {
                    width: width_before.saturating_add(pre_width),
                    spaces: spaces_before,
                    hyphenated: d.kind != DiscretionaryKind::BreakPoint,
                    node_index: index,
                });
            }
            _ => {}
        }
        out
    }

    /// Split at a break: the fragment ending this line and the one starting the next.
    pub fn split(self) -> (Vec<Node>, Vec<Node>) {
        match self {
            Self::Space(_) => (Vec::new(), Vec::new()),
            Self::Discretionary(d) => (d.pre, d.post),
            other => (vec![other], Vec::new()),
        }
    }

    /// Fuse with the following unit when the pair forms one unit.
    pub fn merge_with(&self, next: &Node, metrics: &dyn GlyphMetrics) -> Option<Node> {
        match (self, next) {
            (Self::Space(a), Self::Space(b)) if !a.frozen && !b.frozen => {
                Some(Self::Space(Space {
                    width: a.width.saturating_add(b.width),
                    slots: a.slots.saturating_add(b.slots),
                    frozen: false,
                }))
            }
            (Self::Glyph(a), Self::Glyph(b)) if a.font == b.font && a.size == b.size => {
                let kern = metrics.kern(a.ch, b.ch, a.font, a.size)?;
                Some(Self::KernPair {
                    left: a.clone(),
                    right: b.clone(),
                    kern,
                })
            }
            _ => None,
        }
    }

    /// Stretch an unfrozen space by its share of `desired`, consuming its slots.
    pub fn spread_space(&mut self, remaining_slots: &mut u32, desired: &mut i32) {
        let Self::Space(s) = self else {
            return;
        };
        if s.frozen || s.slots == 0 || *remaining_slots == 0 {
            return;
        }
        let share = if *remaining_slots <= s.slots {
            *desired
        } else {
            crate::units::scale(*desired, s.slots as i32, *remaining_slots as i32)
        };
        s.width = s.width.saturating_add(share);
        *desired -= share;
        *remaining_slots = remaining_slots.saturating_sub(s.slots);
        s.frozen = true;
    }

    /// Exclude a space from later justification.
    pub fn freeze_space(&mut self) {
        if let Self::Space(s) = self {
            s.frozen = true;
        }
    }

    /// Contribute per-unit extents to the line's vertical size.
    pub fn set_vertical_size(&self, v: &mut VerticalExtent) {
        match self {
            Self::ExtraLineSpace(n) if *n < 0 => v.pre_extra = v.pre_extra.max(-*n),
            Self::ExtraLineSpace(n) => v.post_extra = v.post_extra.max(*n),
            Self::VerticalSize(n) if *n < 0 => v.pre = v.pre.max(-*n),
            Self::VerticalSize(n) => v.post = v.post.max(*n),
            _ => {}
        }
    }

    /// Append hyphenation codes for each glyph in this unit.
    pub fn push_hyphenation_codes(&self, out: &mut Vec<Option<char>>) {
        match self {
            Self::Glyph(g) => out.push(g.hyphenation_code),
            Self::KernPair { left, right, .. } => {
                out.push(left.hyphenation_code);
                out.push(right.hyphenation_code);
            }
            _ => {}
        }
    }

    /// Number of glyph positions this unit occupies in a hyphenation word.
    pub fn glyph_count(&self) -> usize {
        match self {
            Self::Glyph(_) => 1,
            Self::KernPair { .. } => 2,
            _ => 0,
        }
    }

    /// Last glyph carried by this unit.
    pub fn last_glyph(&self) -> Option<&Glyph> {
        match self {
            Self::Glyph(g) => Some(g),
            Self::KernPair { right, .. } => Some(right),
            _ => None,
        }
    }

    fn push_text(&self, out: &mut String) {
        match self {
            Self::Glyph(g) => out.push(g.ch),
            Self::KernPair { left, right, .. } => {
                out.push(left.ch);
                out.push(right.ch);
            }
            Self::Space(_) => out.push(' '),
            Self::HorizontalMotion { width } if *width > 0 => out.push(' '),
            _ => {}
        }
    }
}

/// Plain-text rendering of a unit list; leading motions are omitted.
pub fn render_text(nodes: &[Node]) -> String {
    let mut out = String::with_capacity(nodes.len());
    let start = nodes
        .iter()
        .position(|n| !matches!(n, Node::HorizontalMotion { .. }))
        .unwrap_or(nodes.len());
    for node in &nodes[start..] {
        node.push_text(&mut out);
    }
    out
}

/// Sum of leading horizontal motions (the line's indent).
pub fn leading_motion(nodes: &[Node]) -> i32 {
    nodes
        .iter()
        .map_while(|n| match n {
            Node::HorizontalMotion { width } => Some(*width),
            _ => None,
        })
        .fold(0i32, i32::saturating_add)
}

/// Whether the list ends a sentence, looking through closing punctuation.
pub fn ends_sentence(nodes: &[Node]) -> bool {
    for node in nodes.iter().rev() {
        let Some(g) = node.last_glyph() else {
            return false;
        };
        match g.ch {
            '.' | '?' | '!' => return true,
            '"' | '\'' | ')' | ']' | '*' | '\u{2020}' | '\u{2021}' | '\u{201D}' | '\u{2019}' => {}
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FixedPitchMetrics;

    fn glyph(ch: char) -> Node {
        Node::Glyph(Glyph {
            ch,
            width: 50,
            font: 1,
            size: 10,
            hyphenation_code: ch.is_alphabetic().then(|| ch.to_ascii_lowercase()),
        })
    }

    fn space(width: i32) -> Node {
        Node::Space(Space {
            width,
            slots: 1,
            frozen: false,
        })
    }

    struct KerningMetrics;

    impl GlyphMetrics for KerningMetrics {
        fn char_width(&self, _ch: char, _font: FontId, _size: i32) -> Option<i32> {
            Some(50)
        }

        fn space_width(&self, _font: FontId, _size: i32, _space_size: i32) -> i32 {
            33
        }

        fn kern(&self, left: char, right: char, _font: FontId, _size: i32) -> Option<i32> {
            (left == 'A' && right == 'V').then_some(-8)
        }
    }

    #[test]
    fn spaces_merge_and_add_slots() {
        let merged = space(33)
            .merge_with(&space(33), &FixedPitchMetrics::default())
            .unwrap();
        assert_eq!(merged.width(), 66);
        assert_eq!(merged.nspaces(), 2);
    }

    #[test]
    fn kern_pairs_fuse_only_when_metrics_kern() {
        let m = KerningMetrics;
        let pair = glyph('A').merge_with(&glyph('V'), &m).unwrap();
        assert_eq!(pair.width(), 92);
        assert!(glyph('A').merge_with(&glyph('B'), &m).is_none());
        let mut codes = Vec::new();
        pair.push_hyphenation_codes(&mut codes);
        assert_eq!(codes, vec![Some('a'), Some('v')]);
    }

    #[test]
    fn discretionary_breakpoint_counts_pre_width() {
        let d = Node::Discretionary(Discretionary {
            pre: vec![glyph('-')],
            post: Vec::new(),
            kind: DiscretionaryKind::Auto,
        });
        let bps = d.breakpoints(4, 200, 1);
        assert_eq!(bps.len(), 1);
        assert_eq!(bps[0].width, 250);
        assert!(bps[0].hyphenated);
        assert_eq!(d.width(), 0);
    }

    #[test]
    fn frozen_space_is_not_a_breakpoint() {
        let mut s = space(33);
        s.freeze_space();
        assert!(s.breakpoints(0, 0, 0).is_empty());
        assert_eq!(s.nspaces(), 0);
    }

    #[test]
    fn spread_space_hands_remainder_to_last_slot() {
        let mut a = space(10);
        let mut b = space(10);
        let mut remaining = 2;
        let mut desired = 7;
        a.spread_space(&mut remaining, &mut desired);
        b.spread_space(&mut remaining, &mut desired);
        assert_eq!(a.width() + b.width(), 27);
        assert_eq!(desired, 0);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn sentence_end_looks_through_closing_quote() {
        assert!(ends_sentence(&[glyph('a'), glyph('.'), glyph('"')]));
        assert!(!ends_sentence(&[glyph('a'), glyph(',')]));
        assert!(!ends_sentence(&[glyph('.'), space(10)]));
    }

    #[test]
    fn render_skips_leading_motion() {
        let nodes = vec![
            Node::HorizontalMotion { width: 100 },
            glyph('h'),
            glyph('i'),
            space(33),
            glyph('x'),
        ];
        assert_eq!(render_text(&nodes), "hi x");
        assert_eq!(leading_motion(&nodes), 100);
    }

    #[test]
    fn discretionary_candidate_width_saturates() {
        let wide = Node::HorizontalMotion { width: i32::MAX };
        let d = Node::Discretionary(Discretionary {
            pre: vec![wide.clone(), wide],
            post: Vec::new(),
            kind: DiscretionaryKind::Auto,
        });
        let bps = d.breakpoints(4, 10, 0);
        assert_eq!(bps[0].width, i32::MAX);
        assert!(bps[0].hyphenated);
    }
}
