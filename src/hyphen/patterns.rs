//! TeX-format hyphenation pattern files.
//!
//! Understands `%` comments, `\patterns{...}`, `\hyphenation{...}` and
//! `\endinput`. Malformed entries are reported and skipped; loading never fails.

use crate::diagnostic::{Diagnostic, Diagnostics};

use super::HyphenationLanguage;

/// Summary of one pattern-file load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatternLoadReport {
    pub patterns: usize,
    pub exceptions: usize,
    pub skipped: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token<'a> {
    Command(&'a str),
    Open,
    Close,
    Word(&'a str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Block {
    None,
    Patterns,
    Exceptions,
}

fn strip_comment(line: &str) -> &str {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '\\' => escaped = !escaped,
            '%' if !escaped => return &line[..idx],
            _ => escaped = false,
        }
    }
    line
}

fn tokenize<'a>(line: &'a str, out: &mut Vec<Token<'a>>) {
    let bytes = line.as_bytes();
    let mut idx = 0usize;
    while idx < line.len() {
        let Some(ch) = line[idx..].chars().next() else {
            break;
        };
        if ch.is_whitespace() {
            idx += ch.len_utf8();
            continue;
        }
        match ch {
            '{' => {
                out.push(Token::Open);
                idx += 1;
            }
            '}' => {
                out.push(Token::Close);
                idx += 1;
            }
            '\\' => {
                let start = idx;
                idx += 1;
                while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
                    idx += 1;
                }
                out.push(Token::Command(&line[start..idx]));
            }
            _ => {
                let start = idx;
                for (off, c) in line[start..].char_indices() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | '\\') {
                        idx = start + off;
                        break;
                    }
                    idx = start + off + c.len_utf8();
                }
                out.push(Token::Word(&line[start..idx]));
            }
        }
    }
}

impl HyphenationLanguage {
    /// Load a pattern file.
    ///
    /// Without `append` the current patterns and pattern-file exceptions are
    /// discarded first; explicitly declared exceptions survive either way.
    pub fn load_patterns(
        &mut self,
        source: &str,
        append: bool,
        diagnostics: &Diagnostics,
    ) -> PatternLoadReport {
        if !append {
            self.clear_patterns();
        }
        let mut report = PatternLoadReport::default();
        let mut block = Block::None;
        let mut expecting_open: Option<Block> = None;
        let mut tokens = Vec::new();

        'lines: for line in source.lines() {
            tokens.clear();
            tokenize(strip_comment(line), &mut tokens);
            for token in tokens.iter().copied() {
                match token {
                    Token::Command("\\endinput") => break 'lines,
                    Token::Command("\\patterns") => expecting_open = Some(Block::Patterns),
                    Token::Command("\\hyphenation") => expecting_open = Some(Block::Exceptions),
                    Token::Command(other) => {
                        diagnostics.emit(Diagnostic::UnknownPatternCommand {
                            command: other.to_string(),
                        });
                    }
                    Token::Open => {
                        if let Some(next) = expecting_open.take() {
                            block = next;
                        }
                    }
                    Token::Close => block = Block::None,
                    Token::Word(word) => {
                        let accepted = match block {
                            Block::Patterns => self.add_pattern(word, diagnostics),
                            Block::Exceptions => self.insert_exception(word, true, diagnostics),
                            Block::None => {
                                diagnostics.emit(Diagnostic::MalformedPattern {
                                    token: word.to_string(),
                                    reason: "entry outside a pattern block",
                                });
                                false
                            }
                        };
                        match (accepted, block) {
                            (true, Block::Patterns) => report.patterns += 1,
                            (true, Block::Exceptions) => report.exceptions += 1,
                            _ => report.skipped += 1,
                        }
                    }
                }
            }
        }
        log::debug!(
            "[HYPHEN] loaded language={} patterns={} exceptions={} skipped={}",
            self.name(),
            report.patterns,
            report.exceptions,
            report.skipped
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyphen::{HyphenationLimits, HyphenationMode};

    const MODE: HyphenationMode = HyphenationMode(HyphenationMode::ENABLED);

    #[test]
    fn tokenizer_splits_braces_and_commands() {
        let mut tokens = Vec::new();
        tokenize("\\patterns{ hy1p 1he}", &mut tokens);
        assert_eq!(
            tokens,
            vec![
                Token::Command("\\patterns"),
                Token::Open,
                Token::Word("hy1p"),
                Token::Word("1he"),
                Token::Close,
            ]
        );
    }

    #[test]
    fn comments_are_stripped() {
        assert_eq!(strip_comment("ab1c % note"), "ab1c ");
        assert_eq!(strip_comment("50\\% off"), "50\\% off");
    }

    #[test]
    fn loads_patterns_and_exceptions() {
        let d = Diagnostics::new();
        let mut lang = HyphenationLanguage::new("en", HyphenationLimits::default());
        let src = "% sample\n\\patterns{\nhy1p 1he\nh1en\n}\n\\hyphenation{ ta-ble }\n";
        let report = lang.load_patterns(src, false, &d);
        assert_eq!(
            report,
            PatternLoadReport {
                patterns: 3,
                exceptions: 1,
                skipped: 0
            }
        );
        assert_eq!(lang.hyphenate_str("hyphen", MODE), vec![2, 3, 4]);
        assert_eq!(lang.hyphenate_str("table", MODE), vec![2]);
    }

    #[test]
    fn pattern_file_exceptions_honour_mode_flags() {
        let d = Diagnostics::new();
        let mut lang = HyphenationLanguage::new("en", HyphenationLimits::default());
        lang.load_patterns("\\hyphenation{a-bcd-e}", false, &d);
        assert!(lang.hyphenate_str("abcde", MODE).is_empty());
        let loose = HyphenationMode(
            HyphenationMode::ENABLED | HyphenationMode::FIRST_CHAR | HyphenationMode::LAST_CHAR,
        );
        assert_eq!(lang.hyphenate_str("abcde", loose), vec![1, 4]);
    }

    #[test]
    fn malformed_entries_are_skipped_and_counted() {
        let d = Diagnostics::new();
        let mut lang = HyphenationLanguage::new("en", HyphenationLimits::default());
        let report = lang.load_patterns("\\patterns{ a12b ok1ay }\nstray", false, &d);
        assert_eq!(report.patterns, 1);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn replace_drops_old_patterns_but_append_keeps_them() {
        let d = Diagnostics::new();
        let mut lang = HyphenationLanguage::new("en", HyphenationLimits::default());
        lang.add_exception("hy-phen", &d);
        lang.load_patterns("\\patterns{ a1b }", false, &d);
        lang.load_patterns("\\patterns{ c1d }", true, &d);
        assert_eq!(lang.pattern_count(), 2);
        lang.load_patterns("\\patterns{ e1f }\\endinput \\patterns{ g1h }", false, &d);
        assert_eq!(lang.pattern_count(), 1);
        assert_eq!(lang.exception_count(), 1);
    }
}
