use smallvec::SmallVec;

/// Weighted break operations at the end of a pattern: (offset into window, weight).
type Ops = SmallVec<[(u8, u8); 2]>;

#[derive(Clone, Debug, Default)]
struct TrieNode {
    children: SmallVec<[(char, u32); 4]>,
    ops: Ops,
}

/// Prefix tree from normalized pattern letters to inter-letter weights.
///
/// Nodes live in an index-addressed arena; node 0 is the root.
#[derive(Clone, Debug)]
pub struct PatternTrie {
    nodes: Vec<TrieNode>,
    patterns: usize,
}

impl Default for PatternTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            patterns: 0,
        }
    }

    /// Number of distinct patterns stored.
    pub fn len(&self) -> usize {
        self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns == 0
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(TrieNode::default());
        self.patterns = 0;
    }

    /// Insert `letters` with `weights[i]` the weight before letter `i`.
    ///
    /// `weights` has one more entry than `letters`. Re-inserting a pattern
    /// replaces its weights.
    pub fn insert(&mut self, letters: &[char], weights: &[u8]) {
        let mut cursor = 0usize;
        for &ch in letters {
            cursor = match self.child(cursor, ch) {
                Some(next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[cursor].children.push((ch, next as u32));
                    next
                }
            };
        }
        let ops: Ops = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0)
            .map(|(i, w)| (i.min(u8::MAX as usize) as u8, *w))
            .collect();
        let node = &mut self.nodes[cursor];
        let had = !node.ops.is_empty();
        node.ops = ops;
        match (had, node.ops.is_empty()) {
            (false, false) => self.patterns += 1,
            (true, true) => self.patterns = self.patterns.saturating_sub(1),
            _ => {}
        }
    }

    fn child(&self, node: usize, ch: char) -> Option<usize> {
        self.nodes[node]
            .children
            .iter()
            .find(|(c, _)| *c == ch)
            .map(|(_, idx)| *idx as usize)
    }

    /// Overlay every matching pattern onto `word`, keeping the maximum weight.
    ///
    /// Returns `word.len() + 1` weights; entry `i` is the weight before `word[i]`.
    /// Matches are limited to windows of at most `max_window` letters.
    pub fn score(&self, word: &[char], max_window: usize) -> Vec<u8> {
        let mut weights = vec![0u8; word.len() + 1];
        for start in 0..word.len() {
            let mut cursor = 0usize;
            let end = word.len().min(start.saturating_add(max_window));
            for &ch in &word[start..end] {
                let Some(next) = self.child(cursor, ch) else {
                    break;
                };
                cursor = next;
                for &(offset, weight) in &self.nodes[cursor].ops {
                    let at = start + offset as usize;
                    if let Some(slot) = weights.get_mut(at) {
                        *slot = (*slot).max(weight);
                    }
                }
            }
        }
        weights
    }
}
