//! The formatting session: owns every stack and drives control flow.
//!
//! Operations that can move vertically take a [`TrapHandler`]. When a trap
//! springs the session calls the handler synchronously with itself, so the
//! handler may format more text (headers, footers, page ejects) before control
//! returns. [`FormatError::Exit`] raised during shutdown unwinds through every
//! handler back to [`Session::finish`].

use std::collections::HashMap;
use std::sync::Arc;

use roffline::{
    Diagnostic, Diagnostics, FixedPitchMetrics, FormatError, GlyphMetrics, HyphenationLanguage, Node,
    PatternLoadReport,
};

use crate::breakpoint::SpaceSpreader;
use crate::config::FormatConfig;
use crate::diversion::{MacroDiversion, OutputLine, Outcome, TopLevel, Trap};
use crate::environment::{Environment, EnvironmentStack, LineContext, LineEnd, ScopeFlags};
use crate::macros::{CapturedMacro, DivertedItem, MacroStore};
use crate::registers::Registers;
use crate::sink::OutputSink;

/// Receiver of sprung traps.
///
/// Implemented for every `FnMut(&str, &mut Session<S>) -> Result<(), FormatError>`.
/// A handler that wants nested traps honoured passes itself to the session
/// operations it calls.
pub trait TrapHandler<S: OutputSink> {
    fn spring_trap(&mut self, name: &str, session: &mut Session<S>) -> Result<(), FormatError>;
}

impl<S, F> TrapHandler<S> for F
where
    S: OutputSink,
    F: FnMut(&str, &mut Session<S>) -> Result<(), FormatError>,
{
    fn spring_trap(&mut self, name: &str, session: &mut Session<S>) -> Result<(), FormatError> {
        self(name, session)
    }
}

/// Handler that ignores every trap.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTraps;

impl<S: OutputSink> TrapHandler<S> for NoTraps {
    fn spring_trap(&mut self, name: &str, _session: &mut Session<S>) -> Result<(), FormatError> {
        log::debug!("[TRAP] ignored {}", name);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ExitState {
    started: bool,
    last_page_count: i32,
    done_end_macro: bool,
    seen_last_page_ejector: bool,
    began_page_in_end_macro: bool,
}

/// A typesetting run writing to `S`.
pub struct Session<S: OutputSink> {
    config: FormatConfig,
    metrics: Arc<dyn GlyphMetrics>,
    diagnostics: Diagnostics,
    languages: HashMap<String, HyphenationLanguage>,
    envs: EnvironmentStack,
    top: TopLevel,
    diversions: Vec<MacroDiversion>,
    macros: MacroStore,
    sink: S,
    spreader: SpaceSpreader,
    traps_enabled: bool,
    trap_depth: usize,
    truncated_space: i32,
    needed_space: i32,
    diversion_width: i32,
    diversion_height: i32,
    exit: ExitState,
    trailer_written: bool,
}

impl<S: OutputSink> Session<S> {
    /// Session with fixed-pitch metrics.
    pub fn new(config: FormatConfig, sink: S) -> Result<Self, FormatError> {
        Self::with_metrics(config, Arc::new(FixedPitchMetrics::default()), sink)
    }

    /// Session measuring glyphs through `metrics`.
    ///
    /// Fails when the configured default font is unknown to the metrics.
    pub fn with_metrics(config: FormatConfig, metrics: Arc<dyn GlyphMetrics>, sink: S) -> Result<Self, FormatError> {
        if !metrics.is_valid_font(config.default_font) {
            return Err(FormatError::InvalidDefaultFont {
                font: config.default_font,
            });
        }
        let mut languages = HashMap::new();
        let default_language = config.hyphenation.language.clone();
        languages.insert(
            default_language.clone(),
            HyphenationLanguage::new(default_language, config.hyphenation.limits()),
        );
        Ok(Self {
            envs: EnvironmentStack::new(&config),
            top: TopLevel::new(config.page_length, config.page_offset),
            config,
            metrics,
            diagnostics: Diagnostics::new(),
            languages,
            diversions: Vec::new(),
            macros: MacroStore::new(),
            sink,
            spreader: SpaceSpreader::new(),
            traps_enabled: true,
            trap_depth: 0,
            truncated_space: 0,
            needed_space: 0,
            diversion_width: 0,
            diversion_height: 0,
            exit: ExitState::default(),
            trailer_written: false,
        })
    }

    /// Register or replace the diagnostics callback.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(Diagnostic) + Send + 'static,
    {
        self.diagnostics.set_sink(sink);
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn config(&self) -> &FormatConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn env(&self) -> &Environment {
        self.envs.current()
    }

    /// Direct access for settings that do not cause a break.
    pub fn env_mut(&mut self) -> &mut Environment {
        self.envs.current_mut()
    }

    pub fn top_level(&self) -> &TopLevel {
        &self.top
    }

    /// Page geometry and page traps.
    pub fn top_level_mut(&mut self) -> &mut TopLevel {
        &mut self.top
    }

    pub fn macros(&self) -> &MacroStore {
        &self.macros
    }

    pub fn macro_content(&self, name: &str) -> Option<&CapturedMacro> {
        self.macros.get(name)
    }

    /// Name of the current diversion; empty at the top level.
    pub fn diversion_name(&self) -> &str {
        self.diversions.last().map_or("", MacroDiversion::name)
    }

    pub fn diversion_depth(&self) -> usize {
        self.diversions.len()
    }

    pub fn set_traps_enabled(&mut self, enabled: bool) {
        self.traps_enabled = enabled;
    }

    pub fn traps_enabled(&self) -> bool {
        self.traps_enabled
    }

    // --- hyphenation languages ------------------------------------------

    /// The language called `name`, created empty on first use.
    pub fn language_mut(&mut self, name: &str) -> &mut HyphenationLanguage {
        let limits = self.config.hyphenation.limits();
        self.languages
            .entry(name.to_string())
            .or_insert_with(|| HyphenationLanguage::new(name, limits))
    }

    pub fn language(&self, name: &str) -> Option<&HyphenationLanguage> {
        self.languages.get(name)
    }

    /// Load a TeX pattern file into the current environment's language.
    pub fn load_patterns(&mut self, source: &str, append: bool) -> PatternLoadReport {
        let name = self.envs.current().language().to_string();
        let limits = self.config.hyphenation.limits();
        let language = self
            .languages
            .entry(name.clone())
            .or_insert_with(|| HyphenationLanguage::new(name, limits));
        language.load_patterns(source, append, &self.diagnostics)
    }

    /// Add exceptions such as `"hy-phen-ation"` to the current language.
    pub fn add_exceptions(&mut self, words: &str) {
        let name = self.envs.current().language().to_string();
        let limits = self.config.hyphenation.limits();
        let language = self
            .languages
            .entry(name.clone())
            .or_insert_with(|| HyphenationLanguage::new(name, limits));
        for word in words.split_whitespace() {
            language.add_exception(word, &self.diagnostics);
        }
    }

    // --- environments ---------------------------------------------------

    pub fn push_environment(&mut self, name: &str) {
        self.envs.push(name);
    }

    pub fn pop_environment(&mut self) -> bool {
        self.envs.pop(&self.diagnostics)
    }

    /// Copy the settings of environment `name` into the current one.
    pub fn copy_environment(&mut self, name: &str) {
        self.envs.copy_settings_from(name);
    }

    fn distance_to_next_trap(&self) -> i32 {
        if !self.traps_enabled {
            return i32::MAX;
        }
        match self.diversions.last() {
            Some(div) => div.distance_to_next_trap(),
            None => self.top.distance_to_next_trap(),
        }
    }

    fn with_line<R>(&mut self, f: impl FnOnce(&mut Environment, &mut LineContext<'_>) -> R) -> R {
        let distance_to_trap = self.distance_to_next_trap();
        let Self {
            envs,
            languages,
            metrics,
            diagnostics,
            spreader,
            ..
        } = self;
        let env = envs.current_mut();
        let language = languages.get(env.language());
        let mut ctx = LineContext {
            metrics: &**metrics,
            language,
            diagnostics,
            spreader,
            distance_to_trap,
        };
        f(env, &mut ctx)
    }

    // --- traps and pages ------------------------------------------------

    fn spring_trap(&mut self, name: &str, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        if self.trap_depth >= self.config.max_trap_depth {
            self.diagnostics.emit(Diagnostic::TrapRecursionLimit {
                name: name.to_string(),
                depth: self.trap_depth,
            });
            return Ok(());
        }
        log::debug!("[TRAP] spring {} depth={}", name, self.trap_depth);
        self.trap_depth += 1;
        let result = handler.spring_trap(name, self);
        self.trap_depth -= 1;
        result
    }

    fn apply(&mut self, outcome: Outcome, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        if let Some(truncated) = outcome.truncated {
            self.truncated_space = truncated;
        }
        if let Some(name) = outcome.trap {
            self.spring_trap(&name, handler)?;
        }
        if let Some(carry) = outcome.new_page {
            self.begin_page(carry, handler)?;
        }
        Ok(())
    }

    fn begin_page(&mut self, carry: i32, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        if self.exit.started {
            let done = if self.top.page_count() == self.exit.last_page_count {
                self.envs.current().is_empty()
            } else {
                self.exit.done_end_macro
                    && (self.exit.seen_last_page_ejector || self.exit.began_page_in_end_macro)
            };
            if done {
                log::debug!("[PAGE] exit after page count={}", self.top.page_count());
                return Err(FormatError::Exit);
            }
            if !self.exit.done_end_macro {
                self.exit.began_page_in_end_macro = true;
            }
        }
        if let Some((name, truncated)) = self.top.begin_page(carry, self.traps_enabled, &mut self.sink) {
            self.truncated_space = truncated;
            self.spring_trap(&name, handler)?;
        }
        Ok(())
    }

    fn output_line(&mut self, line: OutputLine, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        let outcome = if let Some(div) = self.diversions.last_mut() {
            div.output(&line, self.traps_enabled)?
        } else {
            if self.top.is_before_first_page() {
                self.begin_page(0, handler)?;
            }
            self.top.output(&line, self.traps_enabled, &mut self.sink)?
        };
        self.apply(outcome, handler)
    }

    /// Move down `amount` in the current diversion.
    pub fn space(&mut self, amount: i32, forced: bool, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        let outcome = if let Some(div) = self.diversions.last_mut() {
            div.space(amount, forced, self.traps_enabled)?
        } else {
            self.top.space(amount, forced, self.traps_enabled)?
        };
        self.apply(outcome, handler)
    }

    /// Break, then move down `amount`.
    pub fn vertical_space(&mut self, amount: i32, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        self.space(amount, false, handler)
    }

    /// An empty input line: break, then leave one line of space.
    pub fn blank_line(&mut self, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        let env = self.envs.current();
        let amount = env
            .vertical_spacing()
            .saturating_add(env.total_post_vertical_spacing());
        self.space(amount, false, handler)
    }

    /// Space to the next trap when less than `amount` remains before it.
    pub fn need(&mut self, amount: i32, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.needed_space = amount;
        let distance = self.distance_to_next_trap();
        if distance < amount {
            self.truncated_space = -distance;
            self.space(distance, true, handler)?;
        }
        Ok(())
    }

    /// Break and eject the current page, optionally numbering the next one.
    pub fn begin_new_page(&mut self, number: Option<i32>, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        if !self.diversions.is_empty() {
            self.diagnostics.emit(Diagnostic::PageEjectInDiversion);
            return self.do_break(false, handler);
        }
        if self.top.is_before_first_page() {
            if let Some(n) = number {
                self.top.set_next_page_number(n);
            }
            if number.is_some() || !self.top.no_space_mode() {
                self.begin_page(0, handler)?;
            }
            return Ok(());
        }
        self.do_break(false, handler)?;
        if let Some(n) = number {
            self.top.set_next_page_number(n);
        }
        if self.top.no_space_mode() && number.is_none() {
            return Ok(());
        }
        self.top.set_ejecting();
        for _ in 0..self.config.max_page_ejects {
            if !self.top.is_ejecting() {
                return Ok(());
            }
            let length = self.top.page_length();
            self.space(length, true, handler)?;
        }
        if self.top.is_ejecting() {
            self.diagnostics.emit(Diagnostic::PageEjectLimit {
                iterations: self.config.max_page_ejects,
            });
        }
        Ok(())
    }

    /// Suppress (or allow) vertical space in the current diversion.
    pub fn set_no_space_mode(&mut self, on: bool) {
        match self.diversions.last_mut() {
            Some(div) => div.set_no_space_mode(on),
            None => self.top.set_no_space_mode(on),
        }
    }

    pub fn no_space_mode(&self) -> bool {
        match self.diversions.last() {
            Some(div) => div.no_space_mode(),
            None => self.top.no_space_mode(),
        }
    }

    /// Make the next page begin repeat the top-of-page transition silently.
    pub fn undo_page_transition(&mut self) -> bool {
        let undone = self.diversions.is_empty() && self.top.undo_page_transition();
        if !undone {
            self.diagnostics.emit(Diagnostic::PageTransitionNotUndone);
        }
        undone
    }

    // --- text -----------------------------------------------------------

    fn run_break_loop(&mut self, forced: bool, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        let mut continuation = false;
        while let Some(line) = self.with_line(|env, ctx| env.break_one_line(ctx, forced, continuation)) {
            self.output_line(line, handler)?;
            continuation = true;
        }
        Ok(())
    }

    /// Append one character to the pending line.
    pub fn add_character(&mut self, ch: char) {
        self.with_line(|env, ctx| env.add_character(ch, ctx));
    }

    /// An inter-word space; in fill mode an overfull line is broken off.
    pub fn word_space(&mut self, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        let spread = self.with_line(|env, ctx| env.add_word_space(ctx));
        match spread {
            Some(spread) => self.run_break_loop(spread, handler),
            None => Ok(()),
        }
    }

    /// End the current input line.
    pub fn newline(&mut self, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        let exiting = self.exit.started;
        match self.with_line(|env, ctx| env.end_input_line(ctx, exiting)) {
            LineEnd::Fill { spread } => {
                self.run_break_loop(spread, handler)?;
                self.envs.current_mut().mark_input_line_start();
            }
            LineEnd::Output(line) => self.output_line(line, handler)?,
            LineEnd::Nothing => {}
        }
        Ok(())
    }

    /// Feed plain text: spaces separate words and newlines end input lines.
    pub fn add_text(&mut self, text: &str, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        for ch in text.chars() {
            match ch {
                ' ' => self.word_space(handler)?,
                '\n' => self.newline(handler)?,
                '\t' => self.tab(),
                other => self.add_character(other),
            }
        }
        Ok(())
    }

    pub fn add_horizontal_motion(&mut self, width: i32) {
        let Self { envs, diagnostics, .. } = self;
        envs.current_mut().add_horizontal_motion(width, diagnostics);
    }

    pub fn add_break_point(&mut self) {
        let Self { envs, diagnostics, .. } = self;
        envs.current_mut().add_break_point(diagnostics);
    }

    pub fn add_hyphen_inhibitor(&mut self) {
        let Self { envs, diagnostics, .. } = self;
        envs.current_mut().add_hyphen_inhibitor(diagnostics);
    }

    pub fn add_discretionary_hyphen(&mut self) {
        self.with_line(|env, ctx| env.add_discretionary_hyphen(ctx));
    }

    pub fn add_extra_line_space(&mut self, amount: i32) {
        let Self { envs, diagnostics, .. } = self;
        envs.current_mut().add_extra_line_space(amount, diagnostics);
    }

    pub fn tab(&mut self) {
        let Self { envs, diagnostics, .. } = self;
        envs.current_mut().tab(diagnostics);
    }

    pub fn start_field(&mut self) {
        let Self { envs, diagnostics, .. } = self;
        envs.current_mut().start_field(diagnostics);
    }

    pub fn add_padding(&mut self) {
        self.envs.current_mut().add_padding();
    }

    pub fn end_field(&mut self) {
        let Self { envs, diagnostics, .. } = self;
        envs.current_mut().end_field(diagnostics);
    }

    /// Continue the current input line on the next one.
    pub fn interrupt(&mut self) {
        self.envs.current_mut().interrupt();
    }

    /// Stretch the line ended by the next word space.
    pub fn spread_next_line(&mut self) {
        self.envs.current_mut().spread_next_line();
    }

    /// Emit the pending line; with `spread` a partial line is justified too.
    pub fn do_break(&mut self, spread: bool, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        if self.diversions.is_empty() && self.top.is_before_first_page() {
            self.begin_page(0, handler)?;
        }
        let pending = {
            let Self { envs, diagnostics, .. } = self;
            envs.current_mut().prepare_break(diagnostics)
        };
        if pending {
            self.run_break_loop(spread, handler)?;
        }
        let line = {
            let Self { envs, diagnostics, .. } = self;
            envs.current_mut().finish_break(diagnostics)
        };
        match line {
            Some(line) => self.output_line(line, handler),
            None => Ok(()),
        }
    }

    pub fn set_fill(&mut self, fill: bool, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        self.envs.current_mut().set_fill(fill);
        Ok(())
    }

    pub fn set_indent(&mut self, indent: Option<i32>, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        self.envs.current_mut().set_indent(indent);
        Ok(())
    }

    pub fn set_temporary_indent(&mut self, indent: i32, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        self.envs.current_mut().set_temporary_indent(indent);
        Ok(())
    }

    pub fn center(&mut self, lines: u32, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        self.envs.current_mut().center(lines);
        Ok(())
    }

    pub fn right_justify(&mut self, lines: u32, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        self.envs.current_mut().right_justify(lines);
        Ok(())
    }

    /// Width of `text` set with the current environment's settings.
    pub fn measure_width(&mut self, text: &str) -> i32 {
        self.with_line(|env, ctx| env.typeset_fragment(text, ctx)).1
    }

    /// Three-part title across the title length; the pending line is untouched.
    pub fn title(
        &mut self,
        left: &str,
        centre: &str,
        right: &str,
        handler: &mut dyn TrapHandler<S>,
    ) -> Result<(), FormatError> {
        let (left, left_width) = self.with_line(|env, ctx| env.typeset_fragment(left, ctx));
        let (centre, centre_width) = self.with_line(|env, ctx| env.typeset_fragment(centre, ctx));
        let (right, right_width) = self.with_line(|env, ctx| env.typeset_fragment(right, ctx));
        let env = self.envs.current();
        let length = env.title_length();
        let free = length.saturating_sub(centre_width);
        let half = free / 2;
        let mut nodes = Vec::with_capacity(left.len() + centre.len() + right.len() + 2);
        nodes.extend(left);
        nodes.push(Node::HorizontalMotion {
            width: half.saturating_sub(left_width),
        });
        nodes.extend(centre);
        nodes.push(Node::HorizontalMotion {
            width: free.saturating_sub(half).saturating_sub(right_width),
        });
        nodes.extend(right);
        let line = OutputLine {
            nodes,
            width: length,
            vertical_spacing: env.vertical_spacing(),
            post_vertical_spacing: env.total_post_vertical_spacing(),
            retain_size: false,
        };
        self.output_line(line, handler)
    }

    // --- diversions -----------------------------------------------------

    /// Start capturing output into macro `name`.
    pub fn divert(&mut self, name: &str, append: bool) {
        self.open_diversion(name, false, append);
    }

    /// Like [`Session::divert`], but the pending line is set aside until the
    /// capture closes.
    pub fn box_diversion(&mut self, name: &str, append: bool) {
        self.open_diversion(name, true, append);
    }

    fn open_diversion(&mut self, name: &str, boxing: bool, append: bool) {
        let preload = if append { self.macros.get(name).cloned() } else { None };
        let env = self.envs.current_mut();
        let flags = env.replace_flags(ScopeFlags::default());
        let mut div = MacroDiversion::new(name, boxing, preload, flags);
        if boxing {
            div.saved_line = Some(env.take_pending_line());
        }
        log::debug!("[DIVERT] open {} box={} append={}", name, boxing, append);
        self.diversions.push(div);
    }

    /// Close the innermost capture and install its content.
    pub fn close_diversion(&mut self) -> bool {
        let Some(div) = self.diversions.pop() else {
            self.diagnostics.emit(Diagnostic::DiversionStackUnderflow);
            return false;
        };
        let (closed, flags, saved_line) = div.close();
        let env = self.envs.current_mut();
        env.replace_flags(flags);
        if let Some(line) = saved_line {
            env.restore_pending_line(line);
        }
        self.diversion_width = closed.width;
        self.diversion_height = closed.height;
        log::debug!(
            "[DIVERT] close {} items={} width={} height={}",
            closed.name,
            closed.content.len(),
            closed.width,
            closed.height
        );
        self.macros.define(closed.name, closed.content);
        true
    }

    /// Set or clear the trap of the current capture buffer.
    pub fn set_diversion_trap(&mut self, trap: Option<(&str, i32)>) {
        match self.diversions.last_mut() {
            Some(div) => div.set_trap(trap.map(|(name, position)| Trap::new(name, position))),
            None => self.diagnostics.emit(Diagnostic::DiversionTrapWithoutDiversion),
        }
    }

    /// Replay captured content into the current diversion.
    pub fn output_captured(&mut self, name: &str, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        let Some(content) = self.macros.get(name).cloned() else {
            self.diagnostics.emit(Diagnostic::UndefinedMacro {
                name: name.to_string(),
            });
            return Ok(());
        };
        for item in content.items() {
            match item {
                DivertedItem::Line { nodes, width } => {
                    let line = OutputLine {
                        nodes: nodes.clone(),
                        width: *width,
                        vertical_spacing: 0,
                        post_vertical_spacing: 0,
                        retain_size: true,
                    };
                    self.output_line(line, handler)?;
                }
                DivertedItem::Space(amount) => self.space(*amount, true, handler)?,
                DivertedItem::CopyFile(path) => self.place_file(path, handler)?,
            }
        }
        Ok(())
    }

    fn place_file(&mut self, path: &str, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        if let Some(div) = self.diversions.last_mut() {
            div.copy_file_through(path);
            return Ok(());
        }
        if self.top.is_before_first_page() {
            self.begin_page(0, handler)?;
        }
        self.top.copy_file_through(path, &mut self.sink);
        Ok(())
    }

    /// Break, then copy `path` verbatim to the device at the current position.
    pub fn copy_file_through(&mut self, path: &str, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.do_break(false, handler)?;
        self.place_file(path, handler)
    }

    // --- registers and shutdown -----------------------------------------

    pub fn registers(&self) -> Registers {
        let env = self.envs.current();
        let (vertical_position, high_water_mark, next_trap) = match self.diversions.last() {
            Some(div) => (
                div.vertical_position(),
                div.high_water_mark(),
                div.trap()
                    .filter(|t| t.position > div.vertical_position())
                    .map(|t| t.name.clone()),
            ),
            None => (
                self.top.vertical_position(),
                self.top.high_water_mark(),
                self.top.next_trap().map(|(name, _)| name.to_string()),
            ),
        };
        Registers {
            vertical_position,
            high_water_mark,
            distance_to_next_trap: self.distance_to_next_trap(),
            next_trap: next_trap.unwrap_or_default(),
            diversion: self.diversion_name().to_string(),
            truncated_space: self.truncated_space,
            needed_space: self.needed_space,
            no_space_mode: self.no_space_mode(),
            hyphenated_line_count: env.hyphen_line_count(),
            page_number: self.top.page_number(),
            page_length: self.top.page_length(),
            top_vertical_position: self.top.vertical_position(),
            diversion_width: self.diversion_width,
            diversion_height: self.diversion_height,
            prev_text_length: env.prev_text_length(),
            line_length: env.line_length(),
            indent: env.indent(),
            fill: env.fill(),
            adjust: env.effective_adjust(),
        }
    }

    /// End of input: close captures, flush, run the end macro, eject the last
    /// page and write the trailer.
    pub fn finish(&mut self, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        let result = match self.shut_down(handler) {
            Ok(()) | Err(FormatError::Exit) => Ok(()),
            Err(err) => Err(err),
        };
        if self.top.page_count() > 0 && !self.trailer_written {
            self.sink.trailer(self.top.page_length());
            self.trailer_written = true;
        }
        result
    }

    fn shut_down(&mut self, handler: &mut dyn TrapHandler<S>) -> Result<(), FormatError> {
        self.exit.started = true;
        self.exit.last_page_count = self.top.page_count();
        while let Some(div) = self.diversions.last() {
            self.diagnostics.emit(Diagnostic::UnclosedDiversionAtExit {
                name: div.name().to_string(),
            });
            self.close_diversion();
        }
        self.do_break(false, handler)?;
        if let Some(name) = self.config.end_macro.clone() {
            self.spring_trap(&name, handler)?;
        }
        self.exit.done_end_macro = true;
        self.exit.seen_last_page_ejector = true;
        for _ in 0..self.config.max_page_ejects {
            self.do_break(false, handler)?;
            let length = self.top.page_length();
            self.space(length, true, handler)?;
        }
        self.diagnostics.emit(Diagnostic::PageEjectLimit {
            iterations: self.config.max_page_ejects,
        });
        Ok(())
    }
}
