//! Ordered prefix tree over path segments.
//!
//! Children keep first-insertion order, which fixes the order sibling
//! parsers run in.

use crate::error::ParseError;
use crate::parser::path::{PreparedKey, Segment};

#[derive(Debug)]
pub(crate) struct PrefixNode {
    pub text: String,
    pub segment: Option<Segment>,
    pub children: Vec<usize>,
    /// Index of the key ending at this node
    pub key: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct PrefixTree {
    nodes: Vec<PrefixNode>,
}

impl PrefixTree {
    pub const ROOT: usize = 0;

    /// Build from keys in parse order.
    pub fn build(keys: &[PreparedKey]) -> Result<Self, ParseError> {
        let mut tree = Self {
            nodes: vec![PrefixNode {
                text: String::new(),
                segment: None,
                children: Vec::new(),
                key: None,
            }],
        };
        for (index, key) in keys.iter().enumerate() {
            tree.insert(index, key);
        }
        for node in &tree.nodes {
            if let (Some(index), false) = (node.key, node.children.is_empty()) {
                return Err(ParseError::InvalidArgument(format!(
                    "Key '{}' is a prefix of another key",
                    keys[index].store_key
                )));
            }
        }
        Ok(tree)
    }

    fn insert(&mut self, index: usize, key: &PreparedKey) {
        let mut current = Self::ROOT;
        for (text, segment) in &key.segments {
            let existing = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].text == *text);
            current = match existing {
                Some(child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(PrefixNode {
                        text: text.clone(),
                        segment: Some(segment.clone()),
                        children: Vec::new(),
                        key: None,
                    });
                    self.nodes[current].children.push(child);
                    child
                }
            };
        }
        self.nodes[current].key = Some(index);
    }

    pub fn node(&self, id: usize) -> &PrefixNode {
        &self.nodes[id]
    }
}
