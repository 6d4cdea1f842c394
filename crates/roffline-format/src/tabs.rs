//! Tab stops.

use serde::{Deserialize, Serialize};

/// Alignment of text captured after a tab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabAlign {
    Left,
    Right,
    Center,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabStop {
    pub position: i32,
    pub align: TabAlign,
}

impl TabStop {
    pub fn new(position: i32, align: TabAlign) -> Self {
        Self { position, align }
    }
}

/// Resolved distance to the next stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NextTab {
    pub align: TabAlign,
    pub distance: i32,
    pub position: i32,
}

/// An initial list of absolute stops followed by a list repeated forever.
///
/// Repeated positions are relative to the last stop of the previous cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabStops {
    initial: Vec<TabStop>,
    repeated: Vec<TabStop>,
}

impl TabStops {
    pub fn new(initial: Vec<TabStop>, repeated: Vec<TabStop>) -> Self {
        Self { initial, repeated }
    }

    /// Left-aligned stops every `interval` units.
    pub fn every(interval: i32) -> Self {
        if interval <= 0 {
            return Self::default();
        }
        Self {
            initial: Vec::new(),
            repeated: vec![TabStop::new(interval, TabAlign::Left)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.initial.is_empty() && self.repeated.is_empty()
    }

    /// First stop strictly after `position`.
    pub fn next_tab(&self, position: i32) -> Option<NextTab> {
        let mut last = 0i32;
        for stop in &self.initial {
            if stop.position > position {
                return Some(NextTab {
                    align: stop.align,
                    distance: stop.position - position,
                    position: stop.position,
                });
            }
            last = stop.position;
        }
        let cycle = self.repeated.last()?.position;
        if cycle <= 0 {
            return None;
        }
        let mut base = last;
        if position >= base {
            // Skip whole cycles without walking them.
            let skipped = (position - base) / cycle;
            base = base.saturating_add(skipped.saturating_mul(cycle));
        }
        loop {
            for stop in &self.repeated {
                let at = base.saturating_add(stop.position);
                if at > position {
                    return Some(NextTab {
                        align: stop.align,
                        distance: at - position,
                        position: at,
                    });
                }
            }
            let next = base.saturating_add(cycle);
            if next == base {
                return None;
            }
            base = next;
        }
    }
}
