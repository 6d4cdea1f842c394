//! Breakpoint selection and justification space distribution.

use roffline::{BreakCandidate, Node};

use crate::config::AdjustMode;

/// Parameters that decide between hyphenated and plain breakpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakPolicy {
    /// Target text length of the line.
    pub target: i32,
    pub adjust: AdjustMode,
    pub hyphenation_space: i32,
    pub hyphenation_margin: i32,
    /// Negative means unlimited.
    pub hyphen_line_max: i32,
    /// Consecutive hyphenated lines already emitted.
    pub hyphen_line_count: i32,
}

/// Breakpoint chosen for a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub candidate: BreakCandidate,
    /// `false` when no candidate fits and the line goes out overlength.
    pub fits: bool,
}

impl BreakPolicy {
    /// One more hyphenated line stays within the consecutive limit.
    pub fn may_hyphenate(&self) -> bool {
        self.hyphen_line_max < 0 || self.hyphen_line_count.saturating_add(1) <= self.hyphen_line_max
    }

    /// The plain break at `bp` leaves little enough slack that hyphenation
    /// would not improve the line.
    pub fn slack_acceptable(&self, bp: &BreakCandidate) -> bool {
        let gap = self.target.saturating_sub(bp.width);
        if self.adjust == AdjustMode::Both {
            if bp.spaces == 0 {
                return false;
            }
            let n = bp.spaces.min(i32::MAX as u32) as i32;
            gap.saturating_add(n - 1) / n <= self.hyphenation_space
        } else {
            gap <= self.hyphenation_margin
        }
    }

    fn hyphenation_always_preferred(&self) -> bool {
        let zero = if self.adjust == AdjustMode::Both {
            self.hyphenation_space == 0
        } else {
            self.hyphenation_margin == 0
        };
        zero && self.may_hyphenate()
    }

    /// Whether hyphenating the last word could yield a better break than `plain`,
    /// the selection made without any automatic hyphenation points.
    pub fn wants_hyphenation(&self, plain: Option<&Selection>) -> bool {
        match plain {
            None => self.may_hyphenate(),
            Some(sel) if !sel.fits => self.may_hyphenate(),
            Some(sel) if sel.candidate.hyphenated => false,
            Some(sel) => self.may_hyphenate() && !self.slack_acceptable(&sel.candidate),
        }
    }
}

/// Choose where to end the line.
///
/// Candidates are visited from the line end toward its start. The first
/// fitting plain candidate wins unless an earlier-seen fitting hyphenated
/// candidate is preferred by `policy`; when nothing fits the narrowest
/// overlength candidate is returned. Hyphenated candidates are ignored once
/// the consecutive hyphenated line limit is reached.
pub fn choose_breakpoint(
    line: &[Node],
    width_total: i32,
    space_total: u32,
    policy: &BreakPolicy,
) -> Option<Selection> {
    let mut width = width_total;
    let mut spaces = space_total;
    let mut best: Option<BreakCandidate> = None;
    let mut best_fits = false;

    for (index, node) in line.iter().enumerate().rev() {
        width = width.saturating_sub(node.width());
        spaces = spaces.saturating_sub(node.nspaces());
        for bp in node.breakpoints(index, width, spaces) {
            if bp.hyphenated && !policy.may_hyphenate() {
                continue;
            }
            if bp.width > policy.target {
                best = Some(bp);
                continue;
            }
            if !bp.hyphenated {
                if best_fits && policy.may_hyphenate() && !policy.slack_acceptable(&bp) {
                    return best.map(|candidate| Selection {
                        candidate,
                        fits: true,
                    });
                }
                return Some(Selection {
                    candidate: bp,
                    fits: true,
                });
            }
            if policy.hyphenation_always_preferred() {
                return Some(Selection {
                    candidate: bp,
                    fits: true,
                });
            }
            if !best_fits {
                best = Some(bp);
                best_fits = true;
            }
        }
    }
    best.map(|candidate| Selection {
        candidate,
        fits: best_fits,
    })
}

/// Alternating-direction distributor of justification slack.
///
/// One instance is shared by every environment and diversion so the direction
/// alternates across all justified lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpaceSpreader {
    from_start: bool,
}

impl SpaceSpreader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next distribution starts at the beginning of the line.
    pub fn starts_from_line_start(&self) -> bool {
        self.from_start
    }

    /// Spread `desired` over the first `spaces` stretchable slots of `line`,
    /// then flip the direction for the next line.
    ///
    /// Nothing to spread leaves the direction unchanged.
    pub fn distribute(&mut self, line: &mut [Node], spaces: u32, desired: i32) {
        if desired == 0 || spaces == 0 {
            return;
        }
        spread(line, spaces, desired, self.from_start);
        self.from_start = !self.from_start;
    }
}

/// Spread `desired` from the line start without touching the shared direction.
///
/// Used for field padding.
pub fn distribute_from_start(line: &mut [Node], spaces: u32, desired: i32) {
    spread(line, spaces, desired, true);
}

fn spread(line: &mut [Node], spaces: u32, desired: i32, from_start: bool) {
    let mut remaining = spaces;
    let mut desired = desired;
    if from_start {
        for node in line.iter_mut() {
            node.spread_space(&mut remaining, &mut desired);
        }
    } else {
        for node in line.iter_mut().rev() {
            node.spread_space(&mut remaining, &mut desired);
        }
    }
    if desired != 0 || remaining != 0 {
        log::debug!(
            "[BREAK] undistributed slack desired={} slots={}",
            desired,
            remaining
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roffline::{Discretionary, DiscretionaryKind, Glyph, Space};

    fn word(len: usize) -> Vec<Node> {
        (0..len)
            .map(|_| {
                Node::Glyph(Glyph {
                    ch: 'a',
                    width: 50,
                    font: 1,
                    size: 10,
                    hyphenation_code: Some('a'),
                })
            })
            .collect()
    }

    fn space(width: i32, slots: u32) -> Node {
        Node::Space(Space {
            width,
            slots,
            frozen: false,
        })
    }

    fn hyphen_point() -> Node {
        Node::Discretionary(Discretionary {
            pre: word(1),
            post: Vec::new(),
            kind: DiscretionaryKind::Auto,
        })
    }

    fn totals(line: &[Node]) -> (i32, u32) {
        (
            line.iter().map(Node::width).sum(),
            line.iter().map(Node::nspaces).sum(),
        )
    }

    // "aa bbb ccc-dddd " with a hyphenation point inside the last word.
    fn sample_line() -> Vec<Node> {
        let mut line = word(2);
        line.push(space(50, 1));
        line.extend(word(3));
        line.push(space(50, 1));
        line.extend(word(3));
        line.push(hyphen_point());
        line.extend(word(4));
        line.push(space(50, 1));
        line
    }

    fn policy(target: i32) -> BreakPolicy {
        BreakPolicy {
            target,
            adjust: AdjustMode::Both,
            hyphenation_space: 0,
            hyphenation_margin: 0,
            hyphen_line_max: -1,
            hyphen_line_count: 0,
        }
    }

    #[test]
    fn first_fitting_plain_candidate_wins() {
        // 300 + space + 300 + space + 300 + trailing space
        let mut line = word(6);
        line.push(space(50, 1));
        line.extend(word(6));
        line.push(space(50, 1));
        line.extend(word(6));
        line.push(space(50, 1));
        let (w, s) = totals(&line);
        let sel = choose_breakpoint(&line, w, s, &policy(700)).unwrap();
        assert!(sel.fits);
        assert_eq!(sel.candidate.width, 650);
        assert_eq!(sel.candidate.node_index, 13);
        assert_eq!(sel.candidate.spaces, 1);
    }

    #[test]
    fn overlong_word_returns_narrowest_overfit() {
        let mut line = word(20);
        line.push(space(50, 1));
        line.extend(word(4));
        line.push(space(50, 1));
        let (w, s) = totals(&line);
        let sel = choose_breakpoint(&line, w, s, &policy(700)).unwrap();
        assert!(!sel.fits);
        assert_eq!(sel.candidate.width, 1000);
    }

    #[test]
    fn zero_hyphenation_space_takes_fitting_hyphen() {
        let line = sample_line();
        let (w, s) = totals(&line);
        let sel = choose_breakpoint(&line, w, s, &policy(550)).unwrap();
        assert!(sel.candidate.hyphenated);
        assert_eq!(sel.candidate.width, 550);
    }

    #[test]
    fn generous_hyphenation_space_prefers_plain_break() {
        let line = sample_line();
        let (w, s) = totals(&line);
        let mut p = policy(550);
        p.hyphenation_space = 500;
        let sel = choose_breakpoint(&line, w, s, &p).unwrap();
        assert!(!sel.candidate.hyphenated);
        assert_eq!(sel.candidate.width, 300);
        assert!(!p.wants_hyphenation(Some(&sel)));
    }

    #[test]
    fn hyphen_line_limit_blocks_hyphenated_candidate() {
        let line = sample_line();
        let (w, s) = totals(&line);
        let mut p = policy(550);
        p.hyphen_line_max = 1;
        p.hyphen_line_count = 1;
        let sel = choose_breakpoint(&line, w, s, &p).unwrap();
        assert!(!sel.candidate.hyphenated);
        assert!(!p.wants_hyphenation(Some(&sel)));
    }

    #[test]
    fn hyphen_line_limit_prefers_overlong_plain_break() {
        // aaaaaa-bbbbbb-cccccc followed by a space; only the hyphen points fit.
        let mut line = word(6);
        line.push(hyphen_point());
        line.extend(word(6));
        line.push(hyphen_point());
        line.extend(word(6));
        line.push(space(50, 1));
        let (w, s) = totals(&line);
        let mut p = policy(400);
        p.hyphenation_space = 50;
        let sel = choose_breakpoint(&line, w, s, &p).unwrap();
        assert!(sel.fits);
        assert!(sel.candidate.hyphenated);

        p.hyphen_line_max = 1;
        p.hyphen_line_count = 1;
        let sel = choose_breakpoint(&line, w, s, &p).unwrap();
        assert!(!sel.fits);
        assert!(!sel.candidate.hyphenated);
        assert_eq!(sel.candidate.width, 900);
        assert!(!p.wants_hyphenation(Some(&sel)));
        assert!(!p.wants_hyphenation(None));
    }

    #[test]
    fn distribution_alternates_direction() {
        let mut spreader = SpaceSpreader::new();
        let mut line = vec![space(10, 1), space(10, 1), space(10, 1)];
        spreader.distribute(&mut line, 3, 4);
        let widths: Vec<i32> = line.iter().map(Node::width).collect();
        assert_eq!(widths, vec![12, 11, 11]);
        assert!(spreader.starts_from_line_start());

        let mut line = vec![space(10, 1), space(10, 1), space(10, 1)];
        spreader.distribute(&mut line, 3, 4);
        let widths: Vec<i32> = line.iter().map(Node::width).collect();
        assert_eq!(widths, vec![11, 11, 12]);
    }

    #[test]
    fn empty_distribution_keeps_direction() {
        let mut spreader = SpaceSpreader::new();
        let mut line = vec![space(10, 1)];
        spreader.distribute(&mut line, 1, 0);
        spreader.distribute(&mut line, 0, 5);
        assert!(!spreader.starts_from_line_start());
        assert_eq!(line[0].width(), 10);
    }

    #[test]
    fn slack_check_rounds_up_per_space() {
        let p = BreakPolicy {
            hyphenation_space: 10,
            ..policy(700)
        };
        let bp = BreakCandidate {
            width: 679,
            spaces: 2,
            hyphenated: false,
            node_index: 0,
        };
        assert!(!p.slack_acceptable(&bp));
        let bp = BreakCandidate { width: 680, ..bp };
        assert!(p.slack_acceptable(&bp));
    }
}
