//! Tree definition parsing
//!
//! Definitions use the BehaviorTree XML dialect:
//!
//! ```xml
//! <root main_tree_to_execute="snp">
//!   <BehaviorTree ID="snp">
//!     <SequenceWithMemory name="workflow">
//!       <RemoteTrigger service="scan"/>
//!     </SequenceWithMemory>
//!   </BehaviorTree>
//! </root>
//! ```
//!
//! The element name is the node type. The `name` attribute names the node
//! instance; every other attribute is passed to the node factory untouched.

use crate::error::ConfigurationError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const ROOT_TAG: &str = "root";
const TREE_TAG: &str = "BehaviorTree";
const MODEL_TAG: &str = "TreeNodesModel";

/// One node of a tree blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub type_name: String,
    pub name: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<NodeDefinition>,
}

impl NodeDefinition {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: None,
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Instance name, falling back to the type name
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.type_name)
    }
}

/// A named tree blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDefinition {
    pub id: String,
    pub root: NodeDefinition,
}

/// All trees found in one definition source
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionDocument {
    pub origin: String,
    pub main_tree: Option<String>,
    pub trees: Vec<TreeDefinition>,
}

struct OpenTree {
    id: String,
    root: Option<NodeDefinition>,
}

fn invalid(origin: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidDefinition {
        origin: origin.to_string(),
        reason: reason.into(),
    }
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn get_attribute(origin: &str, e: &BytesStart, name: &str) -> Result<Option<String>, ConfigurationError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| invalid(origin, err.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr.unescape_value().map_err(|err| invalid(origin, err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn node_from(origin: &str, e: &BytesStart) -> Result<NodeDefinition, ConfigurationError> {
    let mut node = NodeDefinition::new(tag_name(e));
    for attr in e.attributes() {
        let attr = attr.map_err(|err| invalid(origin, err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| invalid(origin, err.to_string()))?
            .into_owned();
        if key == "name" {
            node.name = Some(value);
        } else {
            node.attributes.insert(key, value);
        }
    }
    Ok(node)
}

fn open_tree(origin: &str, e: &BytesStart) -> Result<OpenTree, ConfigurationError> {
    let id = get_attribute(origin, e, "ID")?
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid(origin, "<BehaviorTree> is missing its ID attribute"))?;
    Ok(OpenTree { id, root: None })
}

fn attach(
    origin: &str,
    node: NodeDefinition,
    stack: &mut Vec<NodeDefinition>,
    tree: &mut Option<OpenTree>,
) -> Result<(), ConfigurationError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    match tree {
        Some(open) if open.root.is_none() => {
            open.root = Some(node);
            Ok(())
        }
        Some(open) => Err(invalid(
            origin,
            format!("BehaviorTree '{}' must have exactly one root node", open.id),
        )),
        None => Err(invalid(
            origin,
            format!("node <{}> is outside of a <BehaviorTree>", node.type_name),
        )),
    }
}

fn close_tree(
    origin: &str,
    tree: Option<OpenTree>,
    document: &mut DefinitionDocument,
) -> Result<(), ConfigurationError> {
    let open = tree.ok_or_else(|| invalid(origin, "unbalanced </BehaviorTree>"))?;
    let root = open
        .root
        .ok_or_else(|| invalid(origin, format!("BehaviorTree '{}' has no root node", open.id)))?;
    if document.trees.iter().any(|t| t.id == open.id) {
        return Err(invalid(origin, format!("BehaviorTree '{}' is defined twice", open.id)));
    }
    document.trees.push(TreeDefinition { id: open.id, root });
    Ok(())
}

/// Parse every tree in an XML definition source
pub fn parse_definitions(origin: &str, xml: &str) -> Result<DefinitionDocument, ConfigurationError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut document = DefinitionDocument {
        origin: origin.to_string(),
        main_tree: None,
        trees: Vec::new(),
    };
    let mut tree: Option<OpenTree> = None;
    let mut stack: Vec<NodeDefinition> = Vec::new();
    // Depth inside a TreeNodesModel block, whose content is ignored
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if skip_depth > 0 {
                    skip_depth += 1;
                    continue;
                }
                let tag = tag_name(&e);
                if tree.is_some() {
                    stack.push(node_from(origin, &e)?);
                } else if tag == MODEL_TAG {
                    skip_depth = 1;
                } else if tag == TREE_TAG {
                    tree = Some(open_tree(origin, &e)?);
                } else if tag == ROOT_TAG {
                    document.main_tree = get_attribute(origin, &e, "main_tree_to_execute")?;
                } else {
                    return Err(invalid(origin, format!("unexpected element <{}>", tag)));
                }
            }
            Ok(Event::Empty(e)) => {
                if skip_depth > 0 {
                    continue;
                }
                let tag = tag_name(&e);
                if tree.is_some() {
                    let node = node_from(origin, &e)?;
                    attach(origin, node, &mut stack, &mut tree)?;
                } else if tag == TREE_TAG {
                    let open = open_tree(origin, &e)?;
                    return Err(invalid(origin, format!("BehaviorTree '{}' has no root node", open.id)));
                } else if tag != MODEL_TAG && tag != ROOT_TAG {
                    return Err(invalid(origin, format!("unexpected element <{}>", tag)));
                }
            }
            Ok(Event::End(_)) => {
                if skip_depth > 0 {
                    skip_depth -= 1;
                    continue;
                }
                if let Some(node) = stack.pop() {
                    attach(origin, node, &mut stack, &mut tree)?;
                } else if tree.is_some() {
                    close_tree(origin, tree.take(), &mut document)?;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(invalid(
                    origin,
                    format!("XML error at position {}: {}", reader.buffer_position(), e),
                ))
            }
            _ => {}
        }
    }

    if tree.is_some() || !stack.is_empty() {
        return Err(invalid(origin, "unexpected end of document"));
    }
    if document.trees.is_empty() {
        return Err(invalid(origin, "no <BehaviorTree> elements found"));
    }
    Ok(document)
}

/// Read and parse a definition file
pub fn parse_file(path: impl AsRef<Path>) -> Result<DefinitionDocument, ConfigurationError> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let xml = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
        path: origin.clone(),
        reason: e.to_string(),
    })?;
    parse_definitions(&origin, &xml)
}
