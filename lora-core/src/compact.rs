//! Compaction of canonical event text for the radio link.
//!
//! The radio payload budget is small, so event XML is compacted before
//! transport encoding. Two schemes exist:
//!
//! - [`BinaryXml`]: element and attribute names are interned into a string
//!   table and the tree is written as MessagePack. Names repeat heavily in
//!   CoT, so this is much smaller than the text.
//! - [`PlainText`]: the UTF-8 bytes unchanged. Useful for debugging a link.
//!
//! Both sides of a link must use the same scheme. For any canonical text
//! `t`, `expand(compact(t)) == t`.

use std::collections::HashMap;
use std::sync::Arc;

use lorabridge_types::{CodecError, DetailNode};
use serde::{Deserialize, Serialize};

/// Bidirectional transformation between canonical text and compact bytes.
pub trait Compactor: Send + Sync {
    /// Short scheme name, for logs and the CLI.
    fn name(&self) -> &'static str;

    /// Compact canonical event text.
    fn compact(&self, text: &str) -> Result<Vec<u8>, CodecError>;

    /// Restore canonical event text.
    fn expand(&self, bytes: &[u8]) -> Result<String, CodecError>;
}

/// Compaction scheme, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compaction {
    /// [`BinaryXml`].
    #[default]
    BinaryXml,
    /// [`PlainText`].
    Plain,
}

impl Compaction {
    /// Build the compactor for this scheme.
    pub fn compactor(self) -> Arc<dyn Compactor> {
        match self {
            Compaction::BinaryXml => Arc::new(BinaryXml),
            Compaction::Plain => Arc::new(PlainText),
        }
    }
}

impl std::str::FromStr for Compaction {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary-xml" => Ok(Compaction::BinaryXml),
            "plain" => Ok(Compaction::Plain),
            other => Err(CodecError::Compaction(format!("unknown scheme {other:?}"))),
        }
    }
}

/// Identity compaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl Compactor for PlainText {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn compact(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        Ok(text.as_bytes().to_vec())
    }

    fn expand(&self, bytes: &[u8]) -> Result<String, CodecError> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

/// String-table compaction of the element tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryXml;

#[derive(Debug, Serialize, Deserialize)]
struct CompactDoc {
    names: Vec<String>,
    root: CompactNode,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompactNode {
    name: u32,
    attrs: Vec<(u32, String)>,
    text: Option<String>,
    children: Vec<CompactNode>,
}

#[derive(Default)]
struct Interner {
    index: HashMap<String, u32>,
    names: Vec<String>,
}

impl Interner {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        i
    }

    fn pack(&mut self, node: &DetailNode) -> CompactNode {
        CompactNode {
            name: self.intern(&node.name),
            attrs: node
                .attributes
                .iter()
                .map(|(k, v)| (self.intern(k), v.clone()))
                .collect(),
            text: node.text.clone(),
            children: node.children.iter().map(|c| self.pack(c)).collect(),
        }
    }
}

fn unpack(node: CompactNode, names: &[String]) -> Result<DetailNode, CodecError> {
    let lookup = |i: u32| {
        names
            .get(i as usize)
            .cloned()
            .ok_or_else(|| CodecError::Compaction(format!("name index {i} out of range")))
    };

    let mut out = DetailNode::new(lookup(node.name)?);
    for (key, value) in node.attrs {
        out.attributes.push((lookup(key)?, value));
    }
    out.text = node.text;
    for child in node.children {
        out.children.push(unpack(child, names)?);
    }
    Ok(out)
}

impl Compactor for BinaryXml {
    fn name(&self) -> &'static str {
        "binary-xml"
    }

    fn compact(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        let tree = DetailNode::parse(text)?;
        let mut interner = Interner::default();
        let root = interner.pack(&tree);
        let doc = CompactDoc {
            names: interner.names,
            root,
        };
        rmp_serde::to_vec(&doc).map_err(|e| CodecError::Compaction(e.to_string()))
    }

    fn expand(&self, bytes: &[u8]) -> Result<String, CodecError> {
        let doc: CompactDoc =
            rmp_serde::from_slice(bytes).map_err(|e| CodecError::Compaction(e.to_string()))?;
        Ok(unpack(doc.root, &doc.names)?.to_xml())
    }
}
