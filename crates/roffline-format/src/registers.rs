//! Read-only register snapshot for the embedding macro language.

use serde::Serialize;

use crate::config::AdjustMode;

/// Values the surrounding language reads back; the formatter never consumes them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Registers {
    /// Vertical position in the current diversion.
    pub vertical_position: i32,
    pub high_water_mark: i32,
    pub distance_to_next_trap: i32,
    /// Empty when no trap lies ahead.
    pub next_trap: String,
    /// Empty at the top level.
    pub diversion: String,
    pub truncated_space: i32,
    pub needed_space: i32,
    pub no_space_mode: bool,
    pub hyphenated_line_count: i32,
    pub page_number: i32,
    pub page_length: i32,
    /// Vertical position on the top-level page.
    pub top_vertical_position: i32,
    /// Width of the last closed diversion.
    pub diversion_width: i32,
    /// Height of the last closed diversion.
    pub diversion_height: i32,
    pub prev_text_length: i32,
    pub line_length: i32,
    pub indent: i32,
    pub fill: bool,
    pub adjust: AdjustMode,
}

#[cfg(test)]
mod tests {
    use roffline::FormatError;

    use crate::config::FormatConfig;
    use crate::session::{NoTraps, Session};
    use crate::sink::PageCollector;

    #[test]
    fn snapshot_follows_traps_and_diversions() {
        let mut cfg = FormatConfig::for_page(1000, 2400);
        cfg.page_offset = 0;
        let mut s = Session::new(cfg, PageCollector::new()).unwrap();
        s.top_level_mut().plant_trap("mid", 500);
        s.set_fill(false, &mut NoTraps).unwrap();
        assert_eq!(s.registers().next_trap, "mid");
        assert_eq!(s.registers().distance_to_next_trap, 500);

        let mut at_trap = Vec::new();
        let mut handler = |_: &str, s: &mut Session<PageCollector>| -> Result<(), FormatError> {
            at_trap.push(s.registers());
            Ok(())
        };
        for _ in 0..5 {
            s.add_text("line\n", &mut handler).unwrap();
        }
        assert_eq!(at_trap.len(), 1);
        let regs = &at_trap[0];
        assert_eq!(regs.vertical_position, 600);
        assert_eq!(regs.page_number, 1);
        assert_eq!(regs.next_trap, "");
        assert_eq!(regs.distance_to_next_trap, 1800);
        assert!(regs.diversion.is_empty());

        s.divert("d", false);
        s.add_text("a\nb\n", &mut NoTraps).unwrap();
        let inside = s.registers();
        assert_eq!(inside.diversion, "d");
        assert_eq!(inside.vertical_position, 240);
        assert_eq!(inside.top_vertical_position, 600);

        s.close_diversion();
        let after = s.registers();
        assert!(after.diversion.is_empty());
        assert_eq!(after.diversion_height, 240);
        assert_eq!(after.vertical_position, 600);
        assert_eq!(after.line_length, 1000);
        assert!(!after.fill);
        assert_eq!(after.hyphenated_line_count, 0);
    }
}
