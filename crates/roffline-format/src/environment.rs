//! Formatting state and the pending-line accumulator.
//!
//! An [`Environment`] carries the typographic settings (font, size, indents,
//! spacing, adjustment, hyphenation) and the line being built. It never talks
//! to diversions directly: operations that finish a line hand back an
//! [`OutputLine`] and the session places it, so traps can fire between lines.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use roffline::node::ends_sentence;
use roffline::units;
use roffline::{
    Diagnostic, Diagnostics, Discretionary, DiscretionaryKind, FontId, Glyph, GlyphMetrics,
    HyphenationLanguage, HyphenationMode, HyphenationType, Node, Space,
};

use crate::breakpoint::{choose_breakpoint, distribute_from_start, BreakPolicy, Selection, SpaceSpreader};
use crate::config::{AdjustMode, FormatConfig};
use crate::diversion::OutputLine;
use crate::tabs::{TabAlign, TabStops};

/// Characters after which a line may break without inserting a hyphen.
const BREAK_AFTER: [char; 3] = ['-', '\u{2010}', '\u{2014}'];

/// How the previous input line ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineInterruption {
    #[default]
    None,
    /// Ended with the continuation escape.
    Interrupted,
    /// Ended with the continuation escape while shutting down.
    InterruptedAtExit,
}

/// Per-diversion flags saved on open and restored on close.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScopeFlags {
    pub seen_break: bool,
    pub seen_space: bool,
    pub seen_eol: bool,
    pub suppress_next_eol: bool,
}

/// The line under construction.
///
/// Box diversions take this away on open and give it back on close.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingLine {
    nodes: Vec<Node>,
    started: bool,
    width_total: i32,
    space_total: u32,
    saved_indent: i32,
    target: i32,
    prev_line_interrupted: LineInterruption,
    discarding: bool,
    input_line_start: i32,
}

impl PendingLine {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn width_total(&self) -> i32 {
        self.width_total
    }
}

/// Shared resources a line operation reads, plus the session-wide spreader.
pub struct LineContext<'a> {
    pub metrics: &'a dyn GlyphMetrics,
    pub language: Option<&'a HyphenationLanguage>,
    pub diagnostics: &'a Diagnostics,
    pub spreader: &'a mut SpaceSpreader,
    /// Distance from the current position to the next trap.
    pub distance_to_trap: i32,
}

/// Result of ending an input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEnd {
    /// The line joins the paragraph; run the break loop.
    Fill { spread: bool },
    /// A finished line to place.
    Output(OutputLine),
    /// Nothing to place.
    Nothing,
}

#[derive(Clone, Debug)]
struct TabCapture {
    align: TabAlign,
    distance: i32,
    contents: Vec<Node>,
    width: i32,
    field_spaces: u32,
}

#[derive(Clone, Copy, Debug)]
struct FieldCapture {
    distance: i32,
    pre_width: i32,
    spaces: u32,
    tab_precedes: bool,
}

#[derive(Clone, Debug)]
struct Settings {
    font: FontId,
    prev_font: FontId,
    size: i32,
    prev_size: i32,
    space_size: i32,
    sentence_space_size: i32,
    line_length: i32,
    prev_line_length: i32,
    title_length: i32,
    prev_title_length: i32,
    indent: i32,
    prev_indent: i32,
    vertical_spacing: i32,
    prev_vertical_spacing: i32,
    post_vertical_spacing: i32,
    prev_post_vertical_spacing: i32,
    line_spacing: i32,
    prev_line_spacing: i32,
    fill: bool,
    adjust: AdjustMode,
    adjusting: bool,
    hyphenation_mode: HyphenationMode,
    hyphenation_space: i32,
    hyphenation_margin: i32,
    hyphen_line_max: i32,
    language: String,
    hyphen_char: char,
    fill_color: Arc<str>,
    prev_fill_color: Arc<str>,
    stroke_color: Arc<str>,
    prev_stroke_color: Arc<str>,
    tabs: TabStops,
}

impl Settings {
    fn from_config(config: &FormatConfig) -> Self {
        let default_color: Arc<str> = Arc::from("default");
        Self {
            font: config.default_font,
            prev_font: config.default_font,
            size: config.point_size,
            prev_size: config.point_size,
            space_size: config.space_size,
            sentence_space_size: config.sentence_space_size,
            line_length: config.line_length,
            prev_line_length: config.line_length,
            title_length: config.title_length,
            prev_title_length: config.title_length,
            indent: config.indent,
            prev_indent: config.indent,
            vertical_spacing: config.vertical_spacing,
            prev_vertical_spacing: config.vertical_spacing,
            post_vertical_spacing: config.post_vertical_spacing,
            prev_post_vertical_spacing: config.post_vertical_spacing,
            line_spacing: config.line_spacing.max(1),
            prev_line_spacing: config.line_spacing.max(1),
            fill: config.fill,
            adjust: config.adjust,
            adjusting: true,
            hyphenation_mode: config.hyphenation.mode(),
            hyphenation_space: config.hyphenation.space,
            hyphenation_margin: config.hyphenation.margin,
            hyphen_line_max: config.hyphenation.line_max,
            language: config.hyphenation.language.clone(),
            hyphen_char: '-',
            fill_color: default_color.clone(),
            prev_fill_color: default_color.clone(),
            stroke_color: default_color.clone(),
            prev_stroke_color: default_color,
            tabs: TabStops::every(config.tab_interval),
        }
    }
}

/// Set `current` to `value`, or swap back to `previous` when `value` is `None`.
fn toggle<T: Clone>(current: &mut T, previous: &mut T, value: Option<T>) {
    let next = value.unwrap_or_else(|| previous.clone());
    *previous = mem::replace(current, next);
}

fn default_code(ch: char) -> Option<char> {
    if ch.is_alphabetic() {
        ch.to_lowercase().next()
    } else {
        None
    }
}

/// A named formatting environment.
#[derive(Clone, Debug)]
pub struct Environment {
    name: String,
    settings: Settings,
    pending: PendingLine,
    temporary_indent: Option<i32>,
    tab: Option<TabCapture>,
    field: Option<FieldCapture>,
    spread_flag: bool,
    interrupted: bool,
    prev_text_length: i32,
    hyphen_line_count: i32,
    center_lines: u32,
    right_justify_lines: u32,
    flags: ScopeFlags,
}

impl Environment {
    pub fn new(name: impl Into<String>, config: &FormatConfig) -> Self {
        Self::with_settings(name.into(), Settings::from_config(config))
    }

    fn with_settings(name: String, settings: Settings) -> Self {
        Self {
            name,
            settings,
            pending: PendingLine::default(),
            temporary_indent: None,
            tab: None,
            field: None,
            spread_flag: false,
            interrupted: false,
            prev_text_length: 0,
            hyphen_line_count: 0,
            center_lines: 0,
            right_justify_lines: 0,
            flags: ScopeFlags::default(),
        }
    }

    /// A copy of the settings with an empty line and fresh counters.
    ///
    /// Used to measure strings and build titles without touching this
    /// environment's pending line.
    pub fn scratch(&self) -> Self {
        Self::with_settings(self.name.clone(), self.settings.clone())
    }

    /// Take every setting from `other`, keeping this environment's name and line.
    pub fn copy_settings_from(&mut self, other: &Environment) {
        self.settings = other.settings.clone();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // --- settings -------------------------------------------------------

    pub fn font(&self) -> FontId {
        self.settings.font
    }

    /// Select a font, or the previous one with `None`.
    ///
    /// Returns `false` and leaves the font unchanged when the metrics do not
    /// know it.
    pub fn set_font(&mut self, font: Option<FontId>, metrics: &dyn GlyphMetrics, diagnostics: &Diagnostics) -> bool {
        if let Some(f) = font {
            if !metrics.is_valid_font(f) {
                diagnostics.emit(Diagnostic::InvalidFont { font: f });
                return false;
            }
        }
        toggle(&mut self.settings.font, &mut self.settings.prev_font, font);
        true
    }

    pub fn point_size(&self) -> i32 {
        self.settings.size
    }

    pub fn set_point_size(&mut self, size: Option<i32>) {
        toggle(&mut self.settings.size, &mut self.settings.prev_size, size.map(|s| s.max(1)));
    }

    /// Inter-word and additional sentence space, in twelfths of an em.
    pub fn set_space_size(&mut self, space: i32, sentence: Option<i32>) {
        self.settings.space_size = space.max(0);
        if let Some(s) = sentence {
            self.settings.sentence_space_size = s.max(0);
        }
    }

    pub fn line_length(&self) -> i32 {
        self.settings.line_length
    }

    /// Takes effect from the next line started.
    pub fn set_line_length(&mut self, length: Option<i32>) {
        toggle(&mut self.settings.line_length, &mut self.settings.prev_line_length, length);
    }

    pub fn title_length(&self) -> i32 {
        self.settings.title_length
    }

    pub fn set_title_length(&mut self, length: Option<i32>) {
        toggle(&mut self.settings.title_length, &mut self.settings.prev_title_length, length);
    }

    pub fn indent(&self) -> i32 {
        self.settings.indent
    }

    /// Also cancels a pending temporary indent.
    pub fn set_indent(&mut self, indent: Option<i32>) {
        self.temporary_indent = None;
        toggle(&mut self.settings.indent, &mut self.settings.prev_indent, indent);
    }

    pub fn temporary_indent(&self) -> Option<i32> {
        self.temporary_indent
    }

    /// Indent for the next line only.
    pub fn set_temporary_indent(&mut self, indent: i32) {
        self.temporary_indent = Some(indent);
    }

    pub fn vertical_spacing(&self) -> i32 {
        self.settings.vertical_spacing
    }

    pub fn set_vertical_spacing(&mut self, spacing: Option<i32>) {
        toggle(
            &mut self.settings.vertical_spacing,
            &mut self.settings.prev_vertical_spacing,
            spacing,
        );
    }

    pub fn post_vertical_spacing(&self) -> i32 {
        self.settings.post_vertical_spacing
    }

    pub fn set_post_vertical_spacing(&mut self, spacing: Option<i32>) {
        toggle(
            &mut self.settings.post_vertical_spacing,
            &mut self.settings.prev_post_vertical_spacing,
            spacing,
        );
    }

    pub fn line_spacing(&self) -> i32 {
        self.settings.line_spacing
    }

    pub fn set_line_spacing(&mut self, spacing: Option<i32>) {
        toggle(
            &mut self.settings.line_spacing,
            &mut self.settings.prev_line_spacing,
            spacing.map(|s| s.max(1)),
        );
    }

    /// Post-line space including the extra blank lines of line spacing.
    pub fn total_post_vertical_spacing(&self) -> i32 {
        let extra = self
            .settings
            .vertical_spacing
            .saturating_mul(self.settings.line_spacing.saturating_sub(1));
        self.settings.post_vertical_spacing.saturating_add(extra)
    }

    pub fn fill(&self) -> bool {
        self.settings.fill
    }

    /// Switch fill mode. The caller breaks first.
    pub fn set_fill(&mut self, fill: bool) {
        self.settings.fill = fill;
    }

    pub fn adjust(&self) -> AdjustMode {
        self.settings.adjust
    }

    pub fn is_adjusting(&self) -> bool {
        self.settings.adjusting
    }

    /// Set the adjustment mode, or resume the previous one with `None`.
    pub fn set_adjust(&mut self, mode: Option<AdjustMode>) {
        if let Some(m) = mode {
            self.settings.adjust = m;
        }
        self.settings.adjusting = true;
    }

    /// Stop adjusting; lines go out ragged right until adjustment resumes.
    pub fn disable_adjust(&mut self) {
        self.settings.adjusting = false;
    }

    /// The mode actually applied to filled lines.
    pub fn effective_adjust(&self) -> AdjustMode {
        if self.settings.adjusting {
            self.settings.adjust
        } else {
            AdjustMode::Left
        }
    }

    /// Center the next `lines` input lines.
    pub fn center(&mut self, lines: u32) {
        self.center_lines = lines;
        self.right_justify_lines = 0;
    }

    /// Right-align the next `lines` input lines.
    pub fn right_justify(&mut self, lines: u32) {
        self.right_justify_lines = lines;
        self.center_lines = 0;
    }

    pub fn center_lines(&self) -> u32 {
        self.center_lines
    }

    pub fn right_justify_lines(&self) -> u32 {
        self.right_justify_lines
    }

    pub fn hyphenation_mode(&self) -> HyphenationMode {
        self.settings.hyphenation_mode
    }

    pub fn set_hyphenation_mode(&mut self, mode: HyphenationMode) {
        self.settings.hyphenation_mode = mode;
    }

    pub fn set_hyphenation_space(&mut self, space: i32) {
        self.settings.hyphenation_space = space.max(0);
    }

    pub fn set_hyphenation_margin(&mut self, margin: i32) {
        self.settings.hyphenation_margin = margin.max(0);
    }

    /// Negative means unlimited.
    pub fn set_hyphen_line_max(&mut self, max: i32) {
        self.settings.hyphen_line_max = max;
    }

    pub fn hyphen_line_max(&self) -> i32 {
        self.settings.hyphen_line_max
    }

    /// Consecutive lines ending in an automatic or explicit hyphen.
    pub fn hyphen_line_count(&self) -> i32 {
        self.hyphen_line_count
    }

    pub fn language(&self) -> &str {
        &self.settings.language
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.settings.language = language.into();
    }

    pub fn set_hyphen_char(&mut self, ch: char) {
        self.settings.hyphen_char = ch;
    }

    pub fn fill_color(&self) -> &Arc<str> {
        &self.settings.fill_color
    }

    pub fn set_fill_color(&mut self, color: Option<Arc<str>>) {
        toggle(&mut self.settings.fill_color, &mut self.settings.prev_fill_color, color);
    }

    pub fn stroke_color(&self) -> &Arc<str> {
        &self.settings.stroke_color
    }

    pub fn set_stroke_color(&mut self, color: Option<Arc<str>>) {
        toggle(
            &mut self.settings.stroke_color,
            &mut self.settings.prev_stroke_color,
            color,
        );
    }

    pub fn tabs(&self) -> &TabStops {
        &self.settings.tabs
    }

    pub fn set_tabs(&mut self, tabs: TabStops) {
        self.settings.tabs = tabs;
    }

    // --- line state -----------------------------------------------------

    pub fn line(&self) -> &[Node] {
        &self.pending.nodes
    }

    pub fn width_total(&self) -> i32 {
        self.pending.width_total
    }

    pub fn space_total(&self) -> u32 {
        self.pending.space_total
    }

    pub fn is_line_started(&self) -> bool {
        self.pending.started
    }

    /// Nothing is pending: no started line and no tab capture.
    pub fn is_empty(&self) -> bool {
        !self.pending.started && self.tab.is_none()
    }

    pub fn saved_indent(&self) -> i32 {
        self.pending.saved_indent
    }

    pub fn target_text_length(&self) -> i32 {
        self.pending.target
    }

    pub fn prev_line_interrupted(&self) -> LineInterruption {
        self.pending.prev_line_interrupted
    }

    /// Width of the last line handed out, without its indent.
    pub fn prev_text_length(&self) -> i32 {
        self.prev_text_length
    }

    pub fn flags(&self) -> ScopeFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut ScopeFlags {
        &mut self.flags
    }

    /// Swap in `flags`, returning the previous set.
    pub fn replace_flags(&mut self, flags: ScopeFlags) -> ScopeFlags {
        mem::replace(&mut self.flags, flags)
    }

    /// Hand the pending line over, leaving an empty one behind.
    pub fn take_pending_line(&mut self) -> PendingLine {
        mem::take(&mut self.pending)
    }

    pub fn restore_pending_line(&mut self, line: PendingLine) {
        self.pending = line;
    }

    /// The next word space stretches the line it ends.
    pub fn spread_next_line(&mut self) {
        self.spread_flag = true;
    }

    /// The current input line continues on the next one.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    fn text_length(&self) -> i32 {
        let line = if self.pending.started {
            self.pending.width_total
        } else {
            0
        };
        line.saturating_add(self.tab.as_ref().map_or(0, |t| t.width))
    }

    /// Horizontal position on the current input line.
    pub fn input_position(&self) -> i32 {
        self.text_length().saturating_sub(self.pending.input_line_start)
    }

    fn break_policy(&self) -> BreakPolicy {
        BreakPolicy {
            target: self.pending.target,
            adjust: self.effective_adjust(),
            hyphenation_space: self.settings.hyphenation_space,
            hyphenation_margin: self.settings.hyphenation_margin,
            hyphen_line_max: self.settings.hyphen_line_max,
            hyphen_line_count: self.hyphen_line_count,
        }
    }

    fn start_line(&mut self) {
        let indent = self.temporary_indent.take().unwrap_or(self.settings.indent);
        let p = &mut self.pending;
        p.nodes.clear();
        p.started = true;
        p.discarding = false;
        p.width_total = 0;
        p.space_total = 0;
        p.saved_indent = indent;
        p.target = self.settings.line_length.saturating_sub(indent);
    }

    fn recompute_totals(&mut self, diagnostics: &Diagnostics) {
        let p = &mut self.pending;
        p.width_total = units::sum(p.nodes.iter().map(Node::width), "line width", diagnostics);
        p.space_total = p.nodes.iter().map(Node::nspaces).fold(0u32, u32::saturating_add);
    }

    fn strip_trailing_discardables(&mut self, diagnostics: &Diagnostics) {
        let p = &mut self.pending;
        while p.nodes.last().is_some_and(Node::is_discardable) {
            if let Some(node) = p.nodes.pop() {
                p.width_total = units::sub(p.width_total, node.width(), "line width", diagnostics);
                p.space_total = p.space_total.saturating_sub(node.nspaces());
            }
        }
    }

    // --- adding content -------------------------------------------------

    /// Append a unit to the pending line (or the active tab capture).
    pub fn add_node(&mut self, mut node: Node, diagnostics: &Diagnostics) {
        if self.tab.is_some() || self.field.is_some() {
            node.freeze_space();
        }
        if let Some(tab) = self.tab.as_mut() {
            tab.width = units::add(tab.width, node.width(), "tab width", diagnostics);
            tab.contents.push(node);
            return;
        }
        if !self.pending.started {
            if self.pending.discarding && node.is_discardable() {
                return;
            }
            self.start_line();
        }
        let p = &mut self.pending;
        p.width_total = units::add(p.width_total, node.width(), "line width", diagnostics);
        p.space_total = p.space_total.saturating_add(node.nspaces());
        p.nodes.push(node);
    }

    fn glyph(&self, ch: char, ctx: &LineContext<'_>) -> Option<Glyph> {
        let Some(width) = ctx.metrics.char_width(ch, self.settings.font, self.settings.size) else {
            ctx.diagnostics.emit(Diagnostic::MissingGlyph { ch });
            return None;
        };
        let hyphenation_code = match ctx.language {
            Some(language) => language.code(ch),
            None => default_code(ch),
        };
        Some(Glyph {
            ch,
            width,
            font: self.settings.font,
            size: self.settings.size,
            hyphenation_code,
        })
    }

    /// Append a character, fusing it with the previous glyph when the fonts kern.
    ///
    /// A hyphen or dash is followed by a break point so the line may end there.
    pub fn add_character(&mut self, ch: char, ctx: &mut LineContext<'_>) {
        let Some(glyph) = self.glyph(ch, ctx) else {
            return;
        };
        let node = Node::Glyph(glyph);
        let merged = if self.tab.is_none() && self.pending.started {
            self.pending
                .nodes
                .last()
                .and_then(|last| last.merge_with(&node, ctx.metrics).map(|m| (last.width(), m)))
        } else {
            None
        };
        match merged {
            Some((old_width, fused)) => {
                let p = &mut self.pending;
                let delta = fused.width().saturating_sub(old_width);
                p.width_total = units::add(p.width_total, delta, "line width", ctx.diagnostics);
                if let Some(last) = p.nodes.last_mut() {
                    *last = fused;
                }
            }
            None => self.add_node(node, ctx.diagnostics),
        }
        if BREAK_AFTER.contains(&ch) {
            self.add_break_point(ctx.diagnostics);
        }
    }

    /// Append an inter-word space.
    ///
    /// Returns `Some(spread)` when the caller must run the break loop, with
    /// `spread` forcing the line out stretched.
    pub fn add_word_space(&mut self, ctx: &mut LineContext<'_>) -> Option<bool> {
        if self.interrupted {
            return None;
        }
        let s = &self.settings;
        let sw = ctx.metrics.space_width(s.font, s.size, s.space_size);
        let ssw = ctx.metrics.space_width(s.font, s.size, s.sentence_space_size);
        let pending: &[Node] = match &self.tab {
            Some(tab) => &tab.contents,
            None => &self.pending.nodes,
        };
        let mut width = sw;
        if let Some((Node::Space(last), before)) = pending.split_last() {
            if last.slots == 1 && last.width == sw && ends_sentence(before) {
                width = ssw;
            }
        }
        if self.tab.is_none() && self.field.is_none() && self.pending.started {
            if let Some(Node::Space(last)) = self.pending.nodes.last_mut() {
                if !last.frozen {
                    last.width = units::add(last.width, width, "space width", ctx.diagnostics);
                    last.slots = last.slots.saturating_add(1);
                    let p = &mut self.pending;
                    p.width_total = units::add(p.width_total, width, "line width", ctx.diagnostics);
                    p.space_total = p.space_total.saturating_add(1);
                    return None;
                }
            }
        }
        self.add_node(
            Node::Space(Space {
                width,
                slots: 1,
                frozen: false,
            }),
            ctx.diagnostics,
        );
        Some(mem::take(&mut self.spread_flag))
    }

    pub fn add_horizontal_motion(&mut self, width: i32, diagnostics: &Diagnostics) {
        self.add_node(Node::HorizontalMotion { width }, diagnostics);
    }

    /// Zero-width break opportunity.
    pub fn add_break_point(&mut self, diagnostics: &Diagnostics) {
        self.add_node(
            Node::Discretionary(Discretionary {
                pre: Vec::new(),
                post: Vec::new(),
                kind: DiscretionaryKind::BreakPoint,
            }),
            diagnostics,
        );
    }

    /// Suppress automatic hyphenation of the word that follows.
    pub fn add_hyphen_inhibitor(&mut self, diagnostics: &Diagnostics) {
        self.add_node(Node::HyphenInhibitor, diagnostics);
    }

    /// Explicit hyphenation point; at the start of a word it inhibits
    /// hyphenation instead.
    pub fn add_discretionary_hyphen(&mut self, ctx: &mut LineContext<'_>) {
        let mid_word = match &self.tab {
            Some(tab) => tab.contents.last(),
            None => self.pending.nodes.last(),
        }
        .is_some_and(|n| n.last_glyph().is_some());
        if !mid_word {
            self.add_hyphen_inhibitor(ctx.diagnostics);
            return;
        }
        let pre = self
            .glyph(self.settings.hyphen_char, ctx)
            .map(|g| vec![Node::Glyph(g)])
            .unwrap_or_default();
        self.add_node(
            Node::Discretionary(Discretionary {
                pre,
                post: Vec::new(),
                kind: DiscretionaryKind::Explicit,
            }),
            ctx.diagnostics,
        );
    }

    /// Extra vertical space for the current line: negative above, positive below.
    pub fn add_extra_line_space(&mut self, amount: i32, diagnostics: &Diagnostics) {
        self.add_node(Node::ExtraLineSpace(amount), diagnostics);
    }

    // --- tabs and fields ------------------------------------------------

    /// Advance to the next tab stop.
    pub fn tab(&mut self, diagnostics: &Diagnostics) {
        if self.tab.is_some() {
            self.wrap_up_tab(diagnostics);
        }
        let Some(next) = self.settings.tabs.next_tab(self.input_position()) else {
            return;
        };
        match next.align {
            TabAlign::Left => self.add_node(Node::HorizontalMotion { width: next.distance }, diagnostics),
            align => {
                self.tab = Some(TabCapture {
                    align,
                    distance: next.distance,
                    contents: Vec::new(),
                    width: 0,
                    field_spaces: 0,
                });
            }
        }
    }

    fn wrap_up_tab(&mut self, diagnostics: &Diagnostics) {
        let Some(tab) = self.tab.take() else {
            return;
        };
        if !self.pending.started {
            self.start_line();
        }
        let amount = match tab.align {
            TabAlign::Left => 0,
            TabAlign::Right => tab.distance.saturating_sub(tab.width),
            TabAlign::Center => tab.distance.saturating_sub(tab.width / 2),
        }
        .max(0);
        if let Some(field) = self.field.as_mut() {
            if field.tab_precedes {
                field.pre_width = field.pre_width.saturating_add(amount);
                field.tab_precedes = false;
            }
            field.distance = field.distance.saturating_sub(amount);
            field.spaces = field.spaces.saturating_add(tab.field_spaces);
        }
        let p = &mut self.pending;
        p.nodes.push(Node::HorizontalMotion { width: amount });
        p.nodes.extend(tab.contents);
        let added = amount.saturating_add(tab.width);
        p.width_total = units::add(p.width_total, added, "line width", diagnostics);
    }

    pub fn is_in_field(&self) -> bool {
        self.field.is_some()
    }

    /// Open a field bounded by the next tab stop.
    pub fn start_field(&mut self, diagnostics: &Diagnostics) {
        if self.field.is_some() {
            return;
        }
        let Some(next) = self.settings.tabs.next_tab(self.input_position()) else {
            diagnostics.emit(Diagnostic::ZeroFieldWidth);
            return;
        };
        for node in &mut self.pending.nodes {
            node.freeze_space();
        }
        self.pending.space_total = 0;
        self.field = Some(FieldCapture {
            distance: next.distance,
            pre_width: self.text_length(),
            spaces: 0,
            tab_precedes: self.tab.is_some(),
        });
    }

    /// Stretchable padding inside the open field.
    pub fn add_padding(&mut self) {
        if self.field.is_none() {
            return;
        }
        let pad = Node::Space(Space {
            width: 0,
            slots: 1,
            frozen: false,
        });
        if let Some(tab) = self.tab.as_mut() {
            tab.contents.push(pad);
            tab.field_spaces = tab.field_spaces.saturating_add(1);
            return;
        }
        if !self.pending.started {
            self.start_line();
        }
        self.pending.nodes.push(pad);
        if let Some(field) = self.field.as_mut() {
            field.spaces = field.spaces.saturating_add(1);
        }
    }

    /// Close the field, spreading the leftover width over its padding.
    pub fn end_field(&mut self, diagnostics: &Diagnostics) {
        let Some(field) = self.field else {
            return;
        };
        if self.tab.is_none() && field.spaces == 0 {
            self.add_padding();
        }
        let Some(field) = self.field.take() else {
            return;
        };
        let used = self.text_length().saturating_sub(field.pre_width);
        let mut padding = field.distance.saturating_sub(used);
        if let Some(tab) = self.tab.as_mut() {
            if tab.field_spaces != 0 {
                let total = field.spaces.saturating_add(tab.field_spaces);
                let share = units::scale(padding, tab.field_spaces as i32, total as i32);
                padding -= share;
                distribute_from_start(&mut tab.contents, tab.field_spaces, share);
                tab.field_spaces = 0;
                tab.width = units::add(tab.width, share, "tab width", diagnostics);
            }
        }
        if field.spaces != 0 {
            distribute_from_start(&mut self.pending.nodes, field.spaces, padding);
            let p = &mut self.pending;
            p.width_total = units::add(p.width_total, padding, "line width", diagnostics);
        }
    }

    // --- ending lines ---------------------------------------------------

    fn total_post(&self) -> i32 {
        self.total_post_vertical_spacing()
    }

    fn make_output(&mut self, nodes: Vec<Node>, width: i32) -> OutputLine {
        self.prev_text_length = width;
        let indent = self.pending.saved_indent;
        let mut out = Vec::with_capacity(nodes.len() + 1);
        if indent != 0 {
            out.push(Node::HorizontalMotion { width: indent });
        }
        out.extend(nodes);
        OutputLine {
            nodes: out,
            width: width.saturating_add(indent),
            vertical_spacing: self.settings.vertical_spacing,
            post_vertical_spacing: self.total_post(),
            retain_size: false,
        }
    }

    fn take_output_line(&mut self) -> Option<OutputLine> {
        if !self.pending.started {
            return None;
        }
        let nodes = mem::take(&mut self.pending.nodes);
        let width = self.pending.width_total;
        let out = self.make_output(nodes, width);
        let p = &mut self.pending;
        p.started = false;
        p.width_total = 0;
        p.space_total = 0;
        Some(out)
    }

    /// End an input line.
    ///
    /// After a [`LineEnd::Fill`] the caller runs the break loop and then calls
    /// [`Environment::mark_input_line_start`].
    pub fn end_input_line(&mut self, ctx: &mut LineContext<'_>, exiting: bool) -> LineEnd {
        if self.field.is_some() {
            self.end_field(ctx.diagnostics);
        }
        if self.tab.is_some() {
            self.wrap_up_tab(ctx.diagnostics);
        }
        self.strip_trailing_discardables(ctx.diagnostics);
        self.flags.seen_eol = true;
        if self.interrupted {
            self.interrupted = false;
            self.pending.prev_line_interrupted = if exiting {
                LineInterruption::InterruptedAtExit
            } else {
                LineInterruption::Interrupted
            };
            self.mark_input_line_start();
            return LineEnd::Nothing;
        }
        self.pending.prev_line_interrupted = LineInterruption::None;
        let shift = if self.center_lines > 0 {
            self.center_lines -= 1;
            Some(2)
        } else if self.right_justify_lines > 0 {
            self.right_justify_lines -= 1;
            Some(1)
        } else {
            None
        };
        let end = match shift {
            Some(divisor) => {
                let gap = self.pending.target.saturating_sub(self.pending.width_total);
                if gap > 0 {
                    self.pending.saved_indent = self.pending.saved_indent.saturating_add(gap / divisor);
                }
                self.hyphen_line_count = 0;
                self.take_output_line().map_or(LineEnd::Nothing, LineEnd::Output)
            }
            None if self.settings.fill => match self.space_newline(ctx) {
                Some(spread) => return LineEnd::Fill { spread },
                None => LineEnd::Nothing,
            },
            None => {
                self.hyphen_line_count = 0;
                self.take_output_line().map_or(LineEnd::Nothing, LineEnd::Output)
            }
        };
        self.mark_input_line_start();
        end
    }

    /// Record where the next input line starts on the pending line.
    pub fn mark_input_line_start(&mut self) {
        self.pending.input_line_start = if self.pending.started {
            self.pending.width_total
        } else {
            0
        };
    }

    fn space_newline(&mut self, ctx: &mut LineContext<'_>) -> Option<bool> {
        if !self.pending.started {
            return None;
        }
        let s = &self.settings;
        let sw = ctx.metrics.space_width(s.font, s.size, s.space_size);
        let ssw = ctx.metrics.space_width(s.font, s.size, s.sentence_space_size);
        let sentence = ends_sentence(&self.pending.nodes);
        let (width, slots) = if sentence {
            (sw.saturating_add(ssw), 2)
        } else {
            (sw, 1)
        };
        if let Some(Node::Space(last)) = self.pending.nodes.last_mut() {
            if !last.frozen {
                last.width = units::add(last.width, width, "space width", ctx.diagnostics);
                last.slots = last.slots.saturating_add(slots);
                let p = &mut self.pending;
                p.width_total = units::add(p.width_total, width, "line width", ctx.diagnostics);
                p.space_total = p.space_total.saturating_add(slots);
                return None;
            }
        }
        self.add_node(
            Node::Space(Space {
                width,
                slots,
                frozen: false,
            }),
            ctx.diagnostics,
        );
        Some(mem::take(&mut self.spread_flag))
    }

    /// First half of a break: close any tab and make sure the line ends in a
    /// space so the break loop can end it there. Returns whether a line is pending.
    pub fn prepare_break(&mut self, diagnostics: &Diagnostics) -> bool {
        if self.tab.is_some() {
            self.wrap_up_tab(diagnostics);
        }
        if !self.pending.started {
            return false;
        }
        if self.pending.nodes.last().map_or(true, |n| n.nspaces() == 0) {
            self.pending.nodes.push(Node::Space(Space {
                width: 0,
                slots: 1,
                frozen: false,
            }));
            self.pending.space_total = self.pending.space_total.saturating_add(1);
        }
        true
    }

    /// Second half of a break: emit whatever the break loop left over, unadjusted.
    pub fn finish_break(&mut self, diagnostics: &Diagnostics) -> Option<OutputLine> {
        self.strip_trailing_discardables(diagnostics);
        self.pending.discarding = false;
        self.pending.input_line_start = 0;
        let out = if self.pending.started && !self.pending.nodes.is_empty() {
            if self.settings.fill {
                let gap = self.pending.target.saturating_sub(self.pending.width_total);
                match self.effective_adjust() {
                    AdjustMode::Center => {
                        self.pending.saved_indent = self.pending.saved_indent.saturating_add(gap / 2);
                    }
                    AdjustMode::Right => {
                        self.pending.saved_indent = self.pending.saved_indent.saturating_add(gap);
                    }
                    AdjustMode::Left | AdjustMode::Both => {}
                }
            }
            self.hyphen_line_count = 0;
            self.take_output_line()
        } else {
            self.pending.started = false;
            self.pending.nodes.clear();
            self.pending.width_total = 0;
            self.pending.space_total = 0;
            None
        };
        self.pending.prev_line_interrupted = LineInterruption::None;
        self.flags.seen_break = true;
        out
    }

    /// Break off one line if the pending line is overfull (or `forced`).
    ///
    /// `continuation` is set on the second and later calls of one break loop:
    /// the word to hyphenate then starts at the line end.
    pub fn break_one_line(&mut self, ctx: &mut LineContext<'_>, forced: bool, continuation: bool) -> Option<OutputLine> {
        if !self.settings.fill || self.tab.is_some() || self.field.is_some() {
            return None;
        }
        if !self.pending.started {
            return None;
        }
        let last_width = self.pending.nodes.last()?.width();
        let over = self.pending.width_total.saturating_sub(last_width) > self.pending.target;
        if !forced && !over {
            return None;
        }
        let selection = self.select_breakpoint(ctx, continuation)?;
        let bp = selection.candidate;
        let target = self.pending.target;
        if !selection.fits {
            ctx.diagnostics.emit(Diagnostic::CannotBreakLine { width: bp.width, target });
        }

        let tail = self.pending.nodes.split_off(bp.node_index);
        let mut pre = mem::take(&mut self.pending.nodes);
        let mut tail = tail.into_iter();
        let Some(broken) = tail.next() else {
            self.pending.nodes = pre;
            return None;
        };
        let (head, rest_head) = broken.split();
        pre.extend(head);
        let mut remainder = rest_head;
        remainder.extend(tail);

        let mut extra = 0;
        match self.effective_adjust() {
            AdjustMode::Both => {
                if bp.spaces != 0 {
                    extra = target.saturating_sub(bp.width);
                } else if bp.width > 0 && target > 0 && target > bp.width {
                    ctx.diagnostics.emit(Diagnostic::CannotAdjustLine { width: bp.width, target });
                }
            }
            AdjustMode::Center => {
                let shift = target.saturating_sub(bp.width) / 2;
                self.pending.saved_indent = self.pending.saved_indent.saturating_add(shift);
            }
            AdjustMode::Right => {
                let shift = target.saturating_sub(bp.width);
                self.pending.saved_indent = self.pending.saved_indent.saturating_add(shift);
            }
            AdjustMode::Left => {}
        }
        ctx.spreader.distribute(&mut pre, bp.spaces, extra);
        let output_width = bp.width.saturating_add(extra);
        self.pending.input_line_start = self.pending.input_line_start.saturating_sub(output_width);
        self.hyphen_line_count = if bp.hyphenated {
            self.hyphen_line_count.saturating_add(1)
        } else {
            0
        };
        log::debug!(
            "[BREAK] width={} target={} spaces={} hyphenated={}",
            bp.width,
            target,
            bp.spaces,
            bp.hyphenated
        );

        match remainder.iter().position(|n| !n.is_discardable()) {
            Some(first) => {
                remainder.drain(..first);
                self.pending.nodes = remainder;
                self.pending.discarding = false;
                self.recompute_totals(ctx.diagnostics);
            }
            None => {
                let p = &mut self.pending;
                p.nodes = Vec::new();
                p.started = false;
                p.discarding = true;
                p.width_total = 0;
                p.space_total = 0;
            }
        }
        let out = self.make_output(pre, output_width);
        if self.pending.started {
            let indent = self.temporary_indent.take().unwrap_or(self.settings.indent);
            self.pending.saved_indent = indent;
            self.pending.target = self.settings.line_length.saturating_sub(indent);
        }
        Some(out)
    }

    fn select_breakpoint(&mut self, ctx: &mut LineContext<'_>, continuation: bool) -> Option<Selection> {
        let policy = self.break_policy();
        let p = &self.pending;
        let plain = choose_breakpoint(&p.nodes, p.width_total, p.space_total, &policy);
        if !policy.wants_hyphenation(plain.as_ref()) || !self.hyphenate_last_word(ctx, continuation) {
            return plain;
        }
        let p = &self.pending;
        choose_breakpoint(&p.nodes, p.width_total, p.space_total, &policy)
    }

    /// Index range of the word to hyphenate and whether it is inhibited.
    fn last_word_span(&self, continuation: bool) -> Option<(usize, usize, bool)> {
        let nodes = &self.pending.nodes;
        let n = nodes.len();
        if n == 0 {
            return None;
        }
        let end = if continuation {
            n - 1
        } else {
            let mut prev = nodes[n - 1].hyphenation_type();
            if prev != HyphenationType::Unnecessary {
                return None;
            }
            let mut found = None;
            for i in (0..n - 1).rev() {
                let this = nodes[i].hyphenation_type();
                if prev == HyphenationType::Unnecessary && this == HyphenationType::Permitted {
                    found = Some(i);
                    break;
                }
                prev = this;
            }
            found?
        };
        let mut start = end;
        while start > 0 && nodes[start - 1].hyphenation_type() == HyphenationType::Permitted {
            start -= 1;
        }
        let inhibited = start > 0 && nodes[start - 1].hyphenation_type() == HyphenationType::Inhibited;
        Some((start, end, inhibited))
    }

    fn is_auto_hyphen(node: Option<&Node>) -> bool {
        matches!(node, Some(Node::Discretionary(d)) if d.kind == DiscretionaryKind::Auto)
    }

    /// Insert automatic hyphenation points into the last word of the line.
    ///
    /// Returns whether any were inserted.
    fn hyphenate_last_word(&mut self, ctx: &mut LineContext<'_>, continuation: bool) -> bool {
        let mode = self.settings.hyphenation_mode;
        if !mode.is_enabled() {
            return false;
        }
        let Some(language) = ctx.language else {
            return false;
        };
        let last_line_room = self.settings.vertical_spacing.saturating_add(self.total_post());
        if mode.contains(HyphenationMode::NOT_LAST_LINE) && ctx.distance_to_trap <= last_line_room {
            return false;
        }
        let Some((start, end, inhibited)) = self.last_word_span(continuation) else {
            return false;
        };
        let nodes = &self.pending.nodes;
        if inhibited
            || (start > 0 && Self::is_auto_hyphen(nodes.get(start - 1)))
            || Self::is_auto_hyphen(nodes.get(end + 1))
        {
            return false;
        }
        let mut codes = Vec::new();
        for node in &nodes[start..=end] {
            node.push_hyphenation_codes(&mut codes);
        }
        if codes.len() < mode.min_word_len() {
            return false;
        }
        let mut breaks = Vec::new();
        let mut i = 0;
        while i < codes.len() {
            if codes[i].is_none() {
                i += 1;
                continue;
            }
            let begin = i;
            let mut letters = Vec::new();
            while let Some(Some(c)) = codes.get(i) {
                letters.push(*c);
                i += 1;
            }
            breaks.extend(language.hyphenate(&letters, mode).into_iter().map(|k| begin + k));
        }
        if breaks.is_empty() {
            return false;
        }
        log::debug!("[HYPHEN] word of {} glyphs breaks at {:?}", codes.len(), breaks);
        self.insert_hyphens(start, end, &breaks, ctx)
    }

    fn hyphen_after(&self, glyph: &Glyph, ctx: &LineContext<'_>) -> Option<Node> {
        let ch = self.settings.hyphen_char;
        let Some(width) = ctx.metrics.char_width(ch, glyph.font, glyph.size) else {
            ctx.diagnostics.emit(Diagnostic::MissingGlyph { ch });
            return None;
        };
        Some(Node::Discretionary(Discretionary {
            pre: vec![Node::Glyph(Glyph {
                ch,
                width,
                font: glyph.font,
                size: glyph.size,
                hyphenation_code: None,
            })],
            post: Vec::new(),
            kind: DiscretionaryKind::Auto,
        }))
    }

    fn insert_hyphens(&mut self, start: usize, end: usize, breaks: &[usize], ctx: &LineContext<'_>) -> bool {
        let tail = self.pending.nodes.split_off(end + 1);
        let word: Vec<Node> = self.pending.nodes.drain(start..).collect();
        let mut rebuilt = Vec::with_capacity(word.len() + breaks.len());
        let mut pending = breaks.iter().copied().peekable();
        let mut glyphs = 0usize;
        let mut inserted = false;
        for node in word {
            let count = node.glyph_count();
            match node {
                Node::KernPair { left, right, .. } if pending.peek() == Some(&(glyphs + 1)) => {
                    pending.next();
                    let hyphen = self.hyphen_after(&left, ctx);
                    rebuilt.push(Node::Glyph(left));
                    if let Some(h) = hyphen {
                        rebuilt.push(h);
                        inserted = true;
                    }
                    rebuilt.push(Node::Glyph(right));
                }
                other => rebuilt.push(other),
            }
            glyphs += count;
            while let Some(&b) = pending.peek() {
                if b > glyphs {
                    break;
                }
                pending.next();
                if b < glyphs || count == 0 {
                    continue;
                }
                let hyphen = rebuilt
                    .last()
                    .and_then(Node::last_glyph)
                    .and_then(|g| self.hyphen_after(g, ctx));
                if let Some(h) = hyphen {
                    rebuilt.push(h);
                    inserted = true;
                }
            }
        }
        self.pending.nodes.extend(rebuilt);
        self.pending.nodes.extend(tail);
        self.recompute_totals(ctx.diagnostics);
        inserted
    }

    /// Set `text` as one unbroken, unfilled fragment using these settings.
    ///
    /// Returns the units and their width.
    pub fn typeset_fragment(&self, text: &str, ctx: &mut LineContext<'_>) -> (Vec<Node>, i32) {
        let mut scratch = self.scratch();
        scratch.settings.fill = false;
        for ch in text.chars() {
            if ch == ' ' {
                let _ = scratch.add_word_space(ctx);
            } else {
                scratch.add_character(ch, ctx);
            }
        }
        let width = scratch.pending.width_total;
        (scratch.pending.nodes, width)
    }
}

/// Named environments with a push/pop stack; one is always current.
#[derive(Clone, Debug)]
pub struct EnvironmentStack {
    current: Environment,
    named: HashMap<String, Environment>,
    stack: Vec<String>,
    config: FormatConfig,
}

impl EnvironmentStack {
    /// Stack whose current environment is the default one, named "0".
    pub fn new(config: &FormatConfig) -> Self {
        Self {
            current: Environment::new("0", config),
            named: HashMap::new(),
            stack: Vec::new(),
            config: config.clone(),
        }
    }

    pub fn current(&self) -> &Environment {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Environment {
        &mut self.current
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Switch to `name`, creating it from the configuration on first use.
    pub fn push(&mut self, name: &str) {
        let previous = self.current.name.clone();
        if name != previous {
            let next = self
                .named
                .remove(name)
                .unwrap_or_else(|| Environment::new(name, &self.config));
            let old = mem::replace(&mut self.current, next);
            self.named.insert(previous.clone(), old);
        }
        self.stack.push(previous);
    }

    /// Switch back to the environment active before the last push.
    pub fn pop(&mut self, diagnostics: &Diagnostics) -> bool {
        let Some(name) = self.stack.pop() else {
            diagnostics.emit(Diagnostic::EnvironmentStackUnderflow);
            return false;
        };
        if name != self.current.name {
            let next = self
                .named
                .remove(&name)
                .unwrap_or_else(|| Environment::new(name.as_str(), &self.config));
            let old = mem::replace(&mut self.current, next);
            self.named.insert(old.name.clone(), old);
        }
        true
    }

    /// Copy the settings of the environment called `name` into the current one.
    pub fn copy_settings_from(&mut self, name: &str) {
        if name == self.current.name {
            return;
        }
        self.current.settings = match self.named.get(name) {
            Some(env) => env.settings.clone(),
            None => Settings::from_config(&self.config),
        };
    }

    pub fn get(&self, name: &str) -> Option<&Environment> {
        if self.current.name == name {
            Some(&self.current)
        } else {
            self.named.get(name)
        }
    }
}
