//! Vertical-space sinks: the paginated top level and capture buffers.
//!
//! Diversions only do bookkeeping. Whenever a trap must spring or a page must
//! begin they say so in the returned [`Outcome`]; the session performs the
//! callback after the diversion's state is consistent again.

use roffline::{FormatError, Node, VerticalExtent};
use serde::Serialize;

use crate::environment::{PendingLine, ScopeFlags};
use crate::macros::{CapturedMacro, DivertedItem};
use crate::sink::OutputSink;

/// Whether the top level has begun its first page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    NotStarted,
    Started,
    /// The top-of-page transition was undone; the next page begin repeats it
    /// without telling the device.
    TransitionUndone,
}

/// A named callback bound to a vertical position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Trap {
    pub name: String,
    pub position: i32,
}

impl Trap {
    pub fn new(name: impl Into<String>, position: i32) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }
}

/// What the caller must do after a vertical operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Trap to spring.
    pub trap: Option<String>,
    /// New value of the truncated-space register.
    pub truncated: Option<i32>,
    /// A new page must begin, carrying this much overflow.
    pub new_page: Option<i32>,
}

impl Outcome {
    fn spring(name: &str, truncated: i32) -> Self {
        Self {
            trap: Some(name.to_string()),
            truncated: Some(truncated),
            new_page: None,
        }
    }

    fn page(carry: i32) -> Self {
        Self {
            new_page: Some(carry),
            ..Self::default()
        }
    }
}

/// A finished line ready for vertical placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLine {
    pub nodes: Vec<Node>,
    /// Width including the leading indent.
    pub width: i32,
    pub vertical_spacing: i32,
    pub post_vertical_spacing: i32,
    /// Keep the extents recorded in the units instead of the spacing above.
    pub retain_size: bool,
}

impl OutputLine {
    fn extent(&self) -> VerticalExtent {
        let mut v = VerticalExtent::new(self.vertical_spacing, self.post_vertical_spacing);
        for node in &self.nodes {
            node.set_vertical_size(&mut v);
        }
        if !self.retain_size {
            v.pre = self.vertical_spacing;
            v.post = self.post_vertical_spacing;
        }
        v
    }
}

fn advance(name: &str, position: i32, increment: i32) -> Result<i32, FormatError> {
    position
        .checked_add(increment)
        .ok_or_else(|| FormatError::DiversionOverflow {
            diversion: name.to_string(),
            position,
            increment,
        })
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TrapSlot {
    name: Option<String>,
    position: i32,
}

/// The paginated top-level output.
#[derive(Clone, Debug)]
pub struct TopLevel {
    vertical_position: i32,
    high_water_mark: i32,
    no_space_mode: bool,
    page_length: i32,
    page_offset: i32,
    page_number: i32,
    next_page_number: Option<i32>,
    page_count: i32,
    state: PageState,
    ejecting: bool,
    slots: Vec<TrapSlot>,
    last_post_line_extra: i32,
}

impl TopLevel {
    pub fn new(page_length: i32, page_offset: i32) -> Self {
        Self {
            vertical_position: 0,
            high_water_mark: 0,
            no_space_mode: false,
            page_length,
            page_offset,
            page_number: 0,
            next_page_number: None,
            page_count: 0,
            state: PageState::NotStarted,
            ejecting: false,
            slots: Vec::new(),
            last_post_line_extra: 0,
        }
    }

    pub fn vertical_position(&self) -> i32 {
        self.vertical_position
    }

    pub fn high_water_mark(&self) -> i32 {
        self.high_water_mark
    }

    pub fn page_length(&self) -> i32 {
        self.page_length
    }

    pub fn set_page_length(&mut self, length: i32) {
        self.page_length = length.max(1);
    }

    pub fn page_offset(&self) -> i32 {
        self.page_offset
    }

    pub fn set_page_offset(&mut self, offset: i32) {
        self.page_offset = offset;
    }

    pub fn page_number(&self) -> i32 {
        self.page_number
    }

    pub fn page_count(&self) -> i32 {
        self.page_count
    }

    pub fn page_state(&self) -> PageState {
        self.state
    }

    /// No page is in progress yet (or the transition into one was undone).
    pub fn is_before_first_page(&self) -> bool {
        self.state != PageState::Started
    }

    pub fn set_next_page_number(&mut self, number: i32) {
        self.next_page_number = Some(number);
    }

    pub fn next_page_number(&self) -> Option<i32> {
        self.next_page_number
    }

    pub fn no_space_mode(&self) -> bool {
        self.no_space_mode
    }

    pub fn set_no_space_mode(&mut self, on: bool) {
        self.no_space_mode = on;
    }

    pub fn is_ejecting(&self) -> bool {
        self.ejecting
    }

    pub fn set_ejecting(&mut self) {
        self.ejecting = true;
    }

    /// Extra space requested after the most recent line.
    pub fn last_post_line_extra(&self) -> i32 {
        self.last_post_line_extra
    }

    /// Plant a trap; a live trap at the same position is renamed instead.
    pub fn plant_trap(&mut self, name: &str, position: i32) {
        let mut free = None;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.name.is_none() {
                if free.is_none() {
                    free = Some(idx);
                }
            } else if slot.position == position {
                slot.name = Some(name.to_string());
                return;
            }
        }
        let slot = TrapSlot {
            name: Some(name.to_string()),
            position,
        };
        match free {
            Some(idx) => self.slots[idx] = slot,
            None => self.slots.push(slot),
        }
    }

    /// Remove the first trap named `name`.
    pub fn remove_trap(&mut self, name: &str) -> bool {
        for slot in &mut self.slots {
            if slot.name.as_deref() == Some(name) {
                slot.name = None;
                return true;
            }
        }
        false
    }

    /// Remove the trap planted at `position`.
    pub fn remove_trap_at(&mut self, position: i32) -> bool {
        for slot in &mut self.slots {
            if slot.name.is_some() && slot.position == position {
                slot.name = None;
                return true;
            }
        }
        false
    }

    /// Move the first trap named `name` to `position`.
    pub fn change_trap(&mut self, name: &str, position: i32) -> bool {
        for slot in &mut self.slots {
            if slot.name.as_deref() == Some(name) {
                slot.position = position;
                return true;
            }
        }
        false
    }

    /// Live traps in planting-slot order.
    pub fn traps(&self) -> Vec<Trap> {
        self.slots
            .iter()
            .filter_map(|slot| {
                slot.name.as_ref().map(|name| Trap {
                    name: name.clone(),
                    position: slot.position,
                })
            })
            .collect()
    }

    /// Nearest trap strictly below the current position and above the page end.
    ///
    /// Negative positions count from the page bottom.
    pub fn next_trap(&self) -> Option<(&str, i32)> {
        let mut best: Option<(&str, i32)> = None;
        for slot in &self.slots {
            let Some(name) = slot.name.as_deref() else {
                continue;
            };
            let position = if slot.position >= 0 {
                if slot.position >= self.page_length {
                    continue;
                }
                slot.position
            } else {
                let from_bottom = slot.position.saturating_add(self.page_length);
                if from_bottom <= 0 {
                    continue;
                }
                from_bottom
            };
            if position <= self.vertical_position {
                continue;
            }
            if best.map_or(true, |(_, at)| position < at) {
                best = Some((name, position));
            }
        }
        best
    }

    pub fn distance_to_next_trap(&self) -> i32 {
        match self.next_trap() {
            Some((_, at)) => at.saturating_sub(self.vertical_position),
            None => self.page_length.saturating_sub(self.vertical_position),
        }
    }

    /// Move down by `amount`, springing at most one trap.
    pub fn space(&mut self, amount: i32, forced: bool, traps_enabled: bool) -> Result<Outcome, FormatError> {
        if self.no_space_mode {
            if !forced {
                return Ok(Outcome::default());
            }
            self.no_space_mode = false;
        }
        if self.is_before_first_page() {
            return Ok(Outcome::page(amount));
        }
        let target = advance("", self.vertical_position, amount)?;
        if traps_enabled {
            if let Some((name, at)) = self.next_trap() {
                if target >= at {
                    let name = name.to_string();
                    self.vertical_position = at;
                    return Ok(Outcome::spring(&name, target - at));
                }
            }
        }
        if target < 0 {
            self.vertical_position = 0;
        } else if traps_enabled && target >= self.page_length && amount >= 0 {
            return Ok(Outcome::page(target - self.page_length));
        } else {
            self.vertical_position = target;
        }
        Ok(Outcome::default())
    }

    /// Place a line and hand it to the device.
    pub fn output(
        &mut self,
        line: &OutputLine,
        traps_enabled: bool,
        sink: &mut dyn OutputSink,
    ) -> Result<Outcome, FormatError> {
        self.no_space_mode = false;
        let next = self.next_trap().map(|(name, at)| (name.to_string(), at));
        let v = line.extent();
        self.last_post_line_extra = v.post_extra;
        let before = advance("", self.vertical_position, v.pre)?;
        self.vertical_position = advance("", before, v.pre_extra)?;
        sink.output_line(
            self.page_offset,
            self.vertical_position,
            &line.nodes,
            v.pre.saturating_add(v.pre_extra),
            v.post_extra,
            line.width,
        );
        self.vertical_position = advance("", self.vertical_position, v.post_extra)?;
        self.high_water_mark = self.high_water_mark.max(self.vertical_position);

        if traps_enabled && self.vertical_position >= self.page_length {
            return Ok(Outcome::page(0));
        }
        if let Some((name, at)) = next.as_ref() {
            if traps_enabled && self.vertical_position >= *at {
                return Ok(Outcome::spring(name, v.post));
            }
        }
        if v.post > 0 {
            let target = advance("", self.vertical_position, v.post)?;
            if let Some((name, at)) = next.as_ref() {
                if traps_enabled && target >= *at {
                    self.vertical_position = *at;
                    return Ok(Outcome::spring(name, target - at));
                }
            }
            self.vertical_position = target;
            if traps_enabled && target >= self.page_length {
                return Ok(Outcome::page(0));
            }
        }
        Ok(Outcome::default())
    }

    /// Start a new page; returns the trap planted at the page top, if any,
    /// with the truncated-space value to record.
    pub fn begin_page(
        &mut self,
        carry: i32,
        traps_enabled: bool,
        sink: &mut dyn OutputSink,
    ) -> Option<(String, i32)> {
        let undone = self.state == PageState::TransitionUndone;
        if !undone {
            self.page_count = self.page_count.saturating_add(1);
        }
        self.page_number = match self.next_page_number.take() {
            Some(number) => number,
            None if undone => self.page_number,
            None if self.state == PageState::NotStarted => 1,
            None => self.page_number.saturating_add(1),
        };
        self.vertical_position = -1;
        let top = self
            .next_trap()
            .filter(|(_, at)| *at == 0)
            .map(|(name, _)| name.to_string());
        self.vertical_position = 0;
        self.high_water_mark = 0;
        self.ejecting = false;
        if !undone {
            sink.begin_page(self.page_number, self.page_length);
        }
        self.state = PageState::Started;
        log::debug!(
            "[PAGE] begin page={} count={} length={}",
            self.page_number,
            self.page_count,
            self.page_length
        );
        if traps_enabled {
            top.map(|name| (name, carry))
        } else {
            None
        }
    }

    /// Undo the top-of-page transition; only possible at the top of a started page.
    pub fn undo_page_transition(&mut self) -> bool {
        if self.state == PageState::Started && self.vertical_position == 0 {
            self.state = PageState::TransitionUndone;
            return true;
        }
        false
    }

    pub fn copy_file_through(&self, path: &str, sink: &mut dyn OutputSink) {
        sink.copy_file_through(self.page_offset, self.vertical_position, path);
    }
}

/// A capture buffer bound to a macro name.
#[derive(Clone, Debug)]
pub struct MacroDiversion {
    name: String,
    boxing: bool,
    vertical_position: i32,
    high_water_mark: i32,
    no_space_mode: bool,
    max_width: i32,
    content: CapturedMacro,
    trap: Option<Trap>,
    pub(crate) saved_flags: ScopeFlags,
    pub(crate) saved_line: Option<PendingLine>,
    last_post_line_extra: i32,
}

/// What a closed capture buffer leaves behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedDiversion {
    pub name: String,
    pub content: CapturedMacro,
    /// Widest captured line.
    pub width: i32,
    /// Final vertical position.
    pub height: i32,
}

impl MacroDiversion {
    /// Open a buffer; `preload` holds existing content when appending.
    pub fn new(name: &str, boxing: bool, preload: Option<CapturedMacro>, saved_flags: ScopeFlags) -> Self {
        Self {
            name: name.to_string(),
            boxing,
            vertical_position: 0,
            high_water_mark: 0,
            no_space_mode: false,
            max_width: 0,
            content: preload.unwrap_or_default(),
            trap: None,
            saved_flags,
            saved_line: None,
            last_post_line_extra: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_box(&self) -> bool {
        self.boxing
    }

    pub fn vertical_position(&self) -> i32 {
        self.vertical_position
    }

    pub fn high_water_mark(&self) -> i32 {
        self.high_water_mark
    }

    pub fn max_width(&self) -> i32 {
        self.max_width
    }

    pub fn content(&self) -> &CapturedMacro {
        &self.content
    }

    pub fn no_space_mode(&self) -> bool {
        self.no_space_mode
    }

    pub fn set_no_space_mode(&mut self, on: bool) {
        self.no_space_mode = on;
    }

    pub fn last_post_line_extra(&self) -> i32 {
        self.last_post_line_extra
    }

    pub fn trap(&self) -> Option<&Trap> {
        self.trap.as_ref()
    }

    pub fn set_trap(&mut self, trap: Option<Trap>) {
        self.trap = trap;
    }

    fn trap_within(&self, amount: i32, traps_enabled: bool) -> Option<&Trap> {
        let trap = self.trap.as_ref().filter(|_| traps_enabled)?;
        let reach = self.vertical_position.saturating_add(amount);
        (trap.position > self.vertical_position && trap.position <= reach).then_some(trap)
    }

    pub fn distance_to_next_trap(&self) -> i32 {
        match &self.trap {
            Some(trap) if trap.position > self.vertical_position => {
                trap.position - self.vertical_position
            }
            _ => i32::MAX,
        }
    }

    pub fn space(&mut self, amount: i32, forced: bool, traps_enabled: bool) -> Result<Outcome, FormatError> {
        if self.no_space_mode {
            if !forced {
                return Ok(Outcome::default());
            }
            self.no_space_mode = false;
        }
        let mut amount = amount;
        let mut outcome = Outcome::default();
        if let Some(trap) = self.trap_within(amount, traps_enabled) {
            let reach = advance(&self.name, self.vertical_position, amount)?;
            outcome = Outcome::spring(&trap.name, reach - trap.position);
            amount = trap.position - self.vertical_position;
        } else if self.vertical_position.saturating_add(amount) < 0 {
            amount = -self.vertical_position;
        }
        self.content.push(DivertedItem::Space(amount));
        self.vertical_position = advance(&self.name, self.vertical_position, amount)?;
        Ok(outcome)
    }

    pub fn output(&mut self, line: &OutputLine, traps_enabled: bool) -> Result<Outcome, FormatError> {
        self.no_space_mode = false;
        let mut v = line.extent();
        self.last_post_line_extra = v.post_extra;
        self.max_width = self.max_width.max(line.width);
        let mut total = v
            .pre
            .saturating_add(v.pre_extra)
            .saturating_add(v.post)
            .saturating_add(v.post_extra);
        let mut outcome = Outcome::default();
        if let Some(trap) = self.trap_within(total, traps_enabled) {
            let over = advance(&self.name, self.vertical_position, total)? - trap.position;
            let cut = over.min(v.post);
            v.post -= cut;
            total -= cut;
            outcome = Outcome::spring(&trap.name, cut);
        }
        let mut nodes = Vec::with_capacity(line.nodes.len() + 2);
        nodes.extend(
            line.nodes
                .iter()
                .filter(|n| !matches!(n, Node::VerticalSize(_)))
                .cloned(),
        );
        nodes.push(Node::VerticalSize(-v.pre));
        nodes.push(Node::VerticalSize(v.post));
        self.content.push(DivertedItem::Line {
            nodes,
            width: line.width,
        });
        self.vertical_position = advance(&self.name, self.vertical_position, total)?;
        self.high_water_mark = self
            .high_water_mark
            .max(self.vertical_position.saturating_sub(v.post));
        Ok(outcome)
    }

    pub fn copy_file_through(&mut self, path: &str) {
        self.content.push(DivertedItem::CopyFile(path.to_string()));
    }

    /// Close the buffer, yielding its content and final dimensions.
    pub fn close(self) -> (ClosedDiversion, ScopeFlags, Option<PendingLine>) {
        (
            ClosedDiversion {
                name: self.name,
                content: self.content,
                width: self.max_width,
                height: self.vertical_position,
            },
            self.saved_flags,
            self.saved_line,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::PageCollector;

    fn blank_line(vs: i32) -> OutputLine {
        OutputLine {
            nodes: Vec::new(),
            width: 0,
            vertical_spacing: vs,
            post_vertical_spacing: 0,
            retain_size: false,
        }
    }

    fn started(page_length: i32) -> (TopLevel, PageCollector) {
        let mut top = TopLevel::new(page_length, 0);
        let mut sink = PageCollector::new();
        assert!(top.begin_page(0, true, &mut sink).is_none());
        (top, sink)
    }

    #[test]
    fn trap_slots_are_reused_and_renamed() {
        let mut top = TopLevel::new(1000, 0);
        top.plant_trap("a", 100);
        top.plant_trap("b", 200);
        assert!(top.remove_trap("a"));
        top.plant_trap("c", 300);
        top.plant_trap("d", 200);
        assert_eq!(top.traps(), vec![Trap::new("c", 300), Trap::new("d", 200)]);
        assert!(top.change_trap("c", 50));
        assert!(top.remove_trap_at(200));
        assert!(!top.remove_trap_at(200));
        assert_eq!(top.traps(), vec![Trap::new("c", 50)]);
    }

    #[test]
    fn negative_trap_positions_count_from_page_bottom() {
        let (mut top, _sink) = started(1000);
        top.plant_trap("footer", -100);
        top.plant_trap("late", 950);
        assert_eq!(top.next_trap(), Some(("footer", 900)));
        assert_eq!(top.distance_to_next_trap(), 900);
        top.plant_trap("beyond", 1000);
        top.remove_trap("footer");
        top.remove_trap("late");
        assert_eq!(top.next_trap(), None);
        assert_eq!(top.distance_to_next_trap(), 1000);
    }

    #[test]
    fn space_truncates_at_trap() {
        let (mut top, _sink) = started(1000);
        top.plant_trap("mid", 300);
        let out = top.space(500, false, true).unwrap();
        assert_eq!(out.trap.as_deref(), Some("mid"));
        assert_eq!(out.truncated, Some(200));
        assert_eq!(top.vertical_position(), 300);
        // Already at the trap: it no longer lies strictly ahead.
        let out = top.space(100, false, true).unwrap();
        assert_eq!(out, Outcome::default());
        assert_eq!(top.vertical_position(), 400);
    }

    #[test]
    fn space_clamps_at_zero_and_rolls_over_page_end() {
        let (mut top, _sink) = started(1000);
        top.space(-50, false, true).unwrap();
        assert_eq!(top.vertical_position(), 0);
        let out = top.space(1100, false, true).unwrap();
        assert_eq!(out.new_page, Some(100));
    }

    #[test]
    fn no_space_mode_swallows_unforced_space() {
        let (mut top, _sink) = started(1000);
        top.set_no_space_mode(true);
        top.space(100, false, true).unwrap();
        assert_eq!(top.vertical_position(), 0);
        top.space(100, true, true).unwrap();
        assert_eq!(top.vertical_position(), 100);
        assert!(!top.no_space_mode());
    }

    #[test]
    fn output_advances_by_spacing_and_springs_trap() {
        let (mut top, mut sink) = started(1000);
        top.plant_trap("t", 240);
        assert_eq!(top.output(&blank_line(120), true, &mut sink).unwrap(), Outcome::default());
        let out = top.output(&blank_line(120), true, &mut sink).unwrap();
        assert_eq!(out.trap.as_deref(), Some("t"));
        assert_eq!(top.vertical_position(), 240);
        assert_eq!(top.high_water_mark(), 240);
    }

    #[test]
    fn begin_page_numbers_and_top_trap() {
        let mut top = TopLevel::new(1000, 0);
        let mut sink = PageCollector::new();
        top.plant_trap("header", 0);
        let sprung = top.begin_page(7, true, &mut sink);
        assert_eq!(sprung, Some(("header".to_string(), 7)));
        assert_eq!(top.page_number(), 1);
        top.set_next_page_number(10);
        top.begin_page(0, true, &mut sink);
        assert_eq!(top.page_number(), 10);
        top.begin_page(0, true, &mut sink);
        assert_eq!(top.page_number(), 11);
        assert_eq!(top.page_count(), 3);
    }

    #[test]
    fn undone_transition_repeats_page_silently() {
        let (mut top, mut sink) = started(1000);
        assert!(top.undo_page_transition());
        assert!(top.is_before_first_page());
        top.begin_page(0, true, &mut sink);
        assert_eq!(top.page_number(), 1);
        assert_eq!(top.page_count(), 1);
        assert_eq!(sink.pages().len(), 1);
        top.space(10, false, true).unwrap();
        assert!(!top.undo_page_transition());
    }

    #[test]
    fn macro_diversion_truncates_post_space_at_trap() {
        let mut div = MacroDiversion::new("x", false, None, ScopeFlags::default());
        div.set_trap(Some(Trap::new("dt", 150)));
        let line = OutputLine {
            post_vertical_spacing: 60,
            ..blank_line(120)
        };
        let out = div.output(&line, true).unwrap();
        assert_eq!(out.trap.as_deref(), Some("dt"));
        assert_eq!(out.truncated, Some(30));
        assert_eq!(div.vertical_position(), 150);
        assert_eq!(div.high_water_mark(), 120);
        match &div.content().items()[0] {
            DivertedItem::Line { nodes, .. } => {
                assert_eq!(nodes, &vec![Node::VerticalSize(-120), Node::VerticalSize(30)]);
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn macro_diversion_space_clamps_and_truncates() {
        let mut div = MacroDiversion::new("x", false, None, ScopeFlags::default());
        div.space(-40, false, true).unwrap();
        assert_eq!(div.vertical_position(), 0);
        div.set_trap(Some(Trap::new("dt", 100)));
        let out = div.space(250, false, true).unwrap();
        assert_eq!(out.truncated, Some(150));
        assert_eq!(div.vertical_position(), 100);
        assert_eq!(div.distance_to_next_trap(), i32::MAX);
    }

    #[test]
    fn overflow_is_fatal() {
        let mut div = MacroDiversion::new("x", false, None, ScopeFlags::default());
        div.space(i32::MAX - 10, false, true).unwrap();
        let err = div.space(100, false, true).unwrap_err();
        assert!(matches!(err, FormatError::DiversionOverflow { .. }));
    }
}
