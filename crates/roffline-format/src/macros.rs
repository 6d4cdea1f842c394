//! Storage for output captured by diversions.

use std::collections::HashMap;

use roffline::node::render_text;
use roffline::Node;

/// One element of captured output, in the order it was produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DivertedItem {
    /// A finished line; trailing `VerticalSize` units record its extents.
    Line { nodes: Vec<Node>, width: i32 },
    /// Vertical space.
    Space(i32),
    /// A file to copy through to the device when the content reaches a page.
    CopyFile(String),
}

/// Captured content bound to a macro name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedMacro {
    items: Vec<DivertedItem>,
}

impl CapturedMacro {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DivertedItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[DivertedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Text of every captured line, one per row.
    pub fn text_lines(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| match item {
                DivertedItem::Line { nodes, .. } => Some(render_text(nodes)),
                _ => None,
            })
            .collect()
    }
}

/// Name-keyed store of captured macros.
#[derive(Clone, Debug, Default)]
pub struct MacroStore {
    macros: HashMap<String, CapturedMacro>,
}

impl MacroStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&CapturedMacro> {
        self.macros.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Bind `content` to `name`, replacing any previous definition.
    pub fn define(&mut self, name: impl Into<String>, content: CapturedMacro) {
        self.macros.insert(name.into(), content);
    }

    pub fn remove(&mut self, name: &str) -> Option<CapturedMacro> {
        self.macros.remove(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roffline::Glyph;

    fn line(text: &str) -> DivertedItem {
        DivertedItem::Line {
            nodes: text
                .chars()
                .map(|ch| {
                    Node::Glyph(Glyph {
                        ch,
                        width: 50,
                        font: 1,
                        size: 10,
                        hyphenation_code: None,
                    })
                })
                .collect(),
            width: 50 * text.len() as i32,
        }
    }

    #[test]
    fn define_replaces_previous_content() {
        let mut store = MacroStore::new();
        let mut first = CapturedMacro::new();
        first.push(line("old"));
        store.define("x", first);
        let mut second = CapturedMacro::new();
        second.push(line("new"));
        second.push(DivertedItem::Space(120));
        store.define("x", second);
        let x = store.get("x").unwrap();
        assert_eq!(x.len(), 2);
        assert_eq!(x.text_lines(), vec!["new".to_string()]);
    }

    #[test]
    fn remove_forgets_the_name() {
        let mut store = MacroStore::new();
        store.define("x", CapturedMacro::new());
        assert!(store.contains("x"));
        assert!(store.remove("x").is_some());
        assert!(store.is_empty());
    }
}
