//! Device sink interface and a page-collecting implementation.

use roffline::node::{leading_motion, render_text};
use roffline::Node;
use serde::Serialize;

/// Receiver of finished pages and lines.
pub trait OutputSink {
    /// A new page starts.
    fn begin_page(&mut self, number: i32, length: i32);

    /// A finished line at its baseline position.
    ///
    /// `pre` is the space above the baseline and `post` the extra space below it.
    fn output_line(
        &mut self,
        horizontal_offset: i32,
        vertical_position: i32,
        nodes: &[Node],
        pre: i32,
        post: i32,
        width: i32,
    );

    /// Output is complete.
    fn trailer(&mut self, page_length: i32);

    /// Copy the contents of `path` verbatim into the output at this position.
    fn copy_file_through(&mut self, horizontal_offset: i32, vertical_position: i32, path: &str);
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn begin_page(&mut self, _number: i32, _length: i32) {}

    fn output_line(
        &mut self,
        _horizontal_offset: i32,
        _vertical_position: i32,
        _nodes: &[Node],
        _pre: i32,
        _post: i32,
        _width: i32,
    ) {
    }

    fn trailer(&mut self, _page_length: i32) {}

    fn copy_file_through(&mut self, _horizontal_offset: i32, _vertical_position: i32, _path: &str) {
    }
}

/// A positioned output line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypesetLine {
    /// Left edge of the text: page offset plus leading motion.
    pub x: i32,
    /// Baseline.
    pub y: i32,
    pub text: String,
    /// Width including the leading indent.
    pub width: i32,
    pub pre: i32,
    pub post: i32,
}

/// File copied through at a position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileInclusion {
    pub x: i32,
    pub y: i32,
    pub path: String,
}

/// One finished page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypesetPage {
    pub number: i32,
    pub length: i32,
    pub lines: Vec<TypesetLine>,
    pub inclusions: Vec<FileInclusion>,
}

impl TypesetPage {
    /// Text of every line on the page, in output order.
    pub fn text_lines(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }
}

/// Sink calls in the order they happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    BeginPage { number: i32, length: i32 },
    Line { y: i32, text: String },
    CopyFile { y: i32, path: String },
    Trailer { page_length: i32 },
}

/// Sink that records pages in memory.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PageCollector {
    pages: Vec<TypesetPage>,
    events: Vec<SinkEvent>,
    finished: bool,
}

impl PageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(&self) -> &[TypesetPage] {
        &self.pages
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    /// Whether the trailer has been written.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Text of every line on every page.
    pub fn text_lines(&self) -> Vec<&str> {
        self.pages.iter().flat_map(TypesetPage::text_lines).collect()
    }

    fn current_page(&mut self) -> &mut TypesetPage {
        if self.pages.is_empty() {
            // Lines before any page begin land on an implicit first page.
            self.pages.push(TypesetPage {
                number: 1,
                length: 0,
                lines: Vec::new(),
                inclusions: Vec::new(),
            });
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }
}

impl OutputSink for PageCollector {
    fn begin_page(&mut self, number: i32, length: i32) {
        self.events.push(SinkEvent::BeginPage { number, length });
        self.pages.push(TypesetPage {
            number,
            length,
            lines: Vec::new(),
            inclusions: Vec::new(),
        });
    }

    fn output_line(
        &mut self,
        horizontal_offset: i32,
        vertical_position: i32,
        nodes: &[Node],
        pre: i32,
        post: i32,
        width: i32,
    ) {
        let text = render_text(nodes);
        self.events.push(SinkEvent::Line {
            y: vertical_position,
            text: text.clone(),
        });
        let x = horizontal_offset.saturating_add(leading_motion(nodes));
        self.current_page().lines.push(TypesetLine {
            x,
            y: vertical_position,
            text,
            width,
            pre,
            post,
        });
    }

    fn trailer(&mut self, page_length: i32) {
        self.events.push(SinkEvent::Trailer { page_length });
        self.finished = true;
    }

    fn copy_file_through(&mut self, horizontal_offset: i32, vertical_position: i32, path: &str) {
        self.events.push(SinkEvent::CopyFile {
            y: vertical_position,
            path: path.to_string(),
        });
        self.current_page().inclusions.push(FileInclusion {
            x: horizontal_offset,
            y: vertical_position,
            path: path.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roffline::Glyph;

    fn glyph(ch: char) -> Node {
        Node::Glyph(Glyph {
            ch,
            width: 50,
            font: 1,
            size: 10,
            hyphenation_code: None,
        })
    }

    #[test]
    fn collector_positions_lines_after_indent() {
        let mut sink = PageCollector::new();
        sink.begin_page(1, 1000);
        let nodes = vec![Node::HorizontalMotion { width: 30 }, glyph('o'), glyph('k')];
        sink.output_line(100, 120, &nodes, 120, 0, 130);
        let page = &sink.pages()[0];
        assert_eq!(page.lines[0].x, 130);
        assert_eq!(page.lines[0].text, "ok");
        assert_eq!(sink.text_lines(), vec!["ok"]);
    }

    #[test]
    fn events_serialize_with_tag() {
        let mut sink = PageCollector::new();
        sink.begin_page(3, 500);
        sink.trailer(500);
        let json = serde_json::to_string(sink.events()).unwrap();
        assert_eq!(
            json,
            r#"[{"event":"begin_page","number":3,"length":500},{"event":"trailer","page_length":500}]"#
        );
        assert!(sink.is_finished());
    }
}
