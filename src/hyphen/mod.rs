//! Hyphenation engine: per-language exceptions plus a TeX-style pattern trie.
//!
//! A word is scored by bracketing it with `.` boundary markers, overlaying the
//! weights of every matching pattern, and permitting a break wherever the
//! resulting weight is odd. Exceptions bypass the trie entirely.

mod patterns;
mod trie;

use std::collections::HashMap;

use crate::diagnostic::{Diagnostic, Diagnostics};

pub use patterns::PatternLoadReport;
pub use trie::PatternTrie;

/// Hyphenation mode bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HyphenationMode(pub u32);

impl HyphenationMode {
    pub const OFF: Self = Self(0);
    /// Hyphenate with the default first/last character restrictions.
    pub const ENABLED: u32 = 1;
    /// Do not hyphenate the last line before a trap.
    pub const NOT_LAST_LINE: u32 = 2;
    /// Do not break before the last two characters.
    pub const NOT_LAST_CHARS: u32 = 4;
    /// Do not break after the first two characters.
    pub const NOT_FIRST_CHARS: u32 = 8;
    /// Allow a break before the last character.
    pub const LAST_CHAR: u32 = 16;
    /// Allow a break after the first character.
    pub const FIRST_CHAR: u32 = 32;

    pub fn is_enabled(self) -> bool {
        self.0 != 0
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Minimum word length worth hyphenating under this mode.
    pub fn min_word_len(self) -> usize {
        4 - usize::from(self.contains(Self::FIRST_CHAR)) - usize::from(self.contains(Self::LAST_CHAR))
    }

    /// Whether a break after `offset` letters of a `len`-letter word survives
    /// the first/last character suppression flags.
    pub fn allows(self, offset: usize, len: usize) -> bool {
        if offset == 0 || offset >= len {
            return false;
        }
        if offset == 1 && !self.contains(Self::FIRST_CHAR) {
            return false;
        }
        if offset == 2 && self.contains(Self::NOT_FIRST_CHARS) {
            return false;
        }
        let mut limit = len;
        if self.contains(Self::LAST_CHAR) {
            limit += 1;
        }
        if self.contains(Self::NOT_LAST_CHARS) {
            limit -= 1;
        }
        offset + 2 <= limit
    }
}

/// Word and pattern length ceilings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HyphenationLimits {
    /// Longest word the engine will hyphenate.
    pub max_word_len: usize,
    /// Longest pattern window (letters plus boundary markers).
    pub max_pattern_len: usize,
}

impl Default for HyphenationLimits {
    fn default() -> Self {
        Self {
            max_word_len: 256,
            max_pattern_len: 64,
        }
    }
}

/// Exception entry: exact break offsets for one word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exception {
    /// Offsets (letters before the break), ascending.
    pub breaks: Vec<usize>,
    /// Entries loaded from pattern files honour the mode suppression flags.
    pub from_patterns: bool,
}

/// Hyphenation data for one language.
#[derive(Clone, Debug)]
pub struct HyphenationLanguage {
    name: String,
    codes: HashMap<char, Option<char>>,
    exceptions: HashMap<String, Exception>,
    patterns: PatternTrie,
    limits: HyphenationLimits,
}

impl HyphenationLanguage {
    pub fn new(name: impl Into<String>, limits: HyphenationLimits) -> Self {
        Self {
            name: name.into(),
            codes: HashMap::new(),
            exceptions: HashMap::new(),
            patterns: PatternTrie::new(),
            limits,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> HyphenationLimits {
        self.limits
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn exception_count(&self) -> usize {
        self.exceptions.len()
    }

    /// Override the hyphenation code of `ch`; `None` makes it a non-letter.
    pub fn set_code(&mut self, ch: char, code: Option<char>) {
        self.codes.insert(ch, code);
    }

    /// Normalized letter for `ch`, or `None` when it is not a letter.
    pub fn code(&self, ch: char) -> Option<char> {
        if let Some(code) = self.codes.get(&ch) {
            return *code;
        }
        if ch.is_alphabetic() {
            ch.to_lowercase().next()
        } else {
            None
        }
    }

    /// Declare an exception such as `hy-phen`; hyphens mark the only permitted breaks.
    pub fn add_exception(&mut self, spec: &str, diagnostics: &Diagnostics) -> bool {
        self.insert_exception(spec, false, diagnostics)
    }

    fn insert_exception(&mut self, spec: &str, from_patterns: bool, diagnostics: &Diagnostics) -> bool {
        let mut word = String::with_capacity(spec.len());
        let mut breaks = Vec::new();
        let mut letters = 0usize;
        for ch in spec.chars() {
            if ch == '-' {
                if letters > 0 && breaks.last() != Some(&letters) {
                    breaks.push(letters);
                }
                continue;
            }
            let Some(code) = self.code(ch) else {
                diagnostics.emit(Diagnostic::MalformedPattern {
                    token: spec.to_string(),
                    reason: "exception contains a non-letter",
                });
                return false;
            };
            word.push(code);
            letters += 1;
        }
        if letters == 0 || letters > self.limits.max_word_len {
            diagnostics.emit(Diagnostic::MalformedPattern {
                token: spec.to_string(),
                reason: "exception length out of range",
            });
            return false;
        }
        breaks.retain(|b| *b < letters);
        self.exceptions.insert(
            word,
            Exception {
                breaks,
                from_patterns,
            },
        );
        true
    }

    /// Insert a TeX-style pattern such as `hy1p` or `.ex5am`.
    pub fn add_pattern(&mut self, pattern: &str, diagnostics: &Diagnostics) -> bool {
        match self.parse_pattern(pattern) {
            Ok((letters, weights)) => {
                self.patterns.insert(&letters, &weights);
                true
            }
            Err(reason) => {
                diagnostics.emit(Diagnostic::MalformedPattern {
                    token: pattern.to_string(),
                    reason,
                });
                false
            }
        }
    }

    fn parse_pattern(&self, pattern: &str) -> Result<(Vec<char>, Vec<u8>), &'static str> {
        let mut letters = Vec::with_capacity(pattern.len());
        let mut weights = vec![0u8];
        let mut pending_digit = false;
        let total = pattern.chars().count();
        for (idx, ch) in pattern.chars().enumerate() {
            if let Some(d) = ch.to_digit(10) {
                if pending_digit {
                    return Err("consecutive weights");
                }
                if let Some(last) = weights.last_mut() {
                    *last = d as u8;
                }
                pending_digit = true;
                continue;
            }
            pending_digit = false;
            if ch == '.' {
                if idx != 0 && idx + 1 != total {
                    return Err("boundary marker inside pattern");
                }
                letters.push('.');
            } else {
                letters.push(self.code(ch).unwrap_or('\0'));
            }
            weights.push(0);
        }
        if !letters.iter().any(|c| *c != '.' && *c != '\0') {
            return Err("pattern has no letters");
        }
        if letters.len() > self.limits.max_pattern_len {
            return Err("pattern longer than the window ceiling");
        }
        Ok((letters, weights))
    }

    /// Drop all patterns and pattern-file exceptions.
    pub fn clear_patterns(&mut self) {
        self.patterns.clear();
        self.exceptions.retain(|_, e| !e.from_patterns);
    }

    /// Permitted break offsets for a normalized word.
    ///
    /// Offset `k` means a break after the first `k` letters.
    pub fn hyphenate(&self, word: &[char], mode: HyphenationMode) -> Vec<usize> {
        let len = word.len();
        if len <= 2 || len > self.limits.max_word_len || !mode.is_enabled() {
            return Vec::with_capacity(0);
        }
        let key: String = word.iter().collect();
        if let Some(exception) = self.exceptions.get(&key) {
            if !exception.from_patterns {
                return exception.breaks.clone();
            }
            return exception
                .breaks
                .iter()
                .copied()
                .filter(|b| mode.allows(*b, len))
                .collect();
        }
        let mut bracketed = Vec::with_capacity(len + 2);
        bracketed.push('.');
        bracketed.extend_from_slice(word);
        bracketed.push('.');
        let weights = self.patterns.score(&bracketed, self.limits.max_pattern_len);
        // weights[k + 1] sits between word[k - 1] and word[k].
        (1..len)
            .filter(|k| weights[k + 1] % 2 == 1 && mode.allows(*k, len))
            .collect()
    }

    /// Normalize and hyphenate a plain string.
    pub fn hyphenate_str(&self, word: &str, mode: HyphenationMode) -> Vec<usize> {
        let Some(codes) = word.chars().map(|c| self.code(c)).collect::<Option<Vec<_>>>() else {
            return Vec::with_capacity(0);
        };
        self.hyphenate(&codes, mode)
    }
}
