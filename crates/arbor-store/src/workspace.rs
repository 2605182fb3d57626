//! Node arena and the rules that govern it
//!
//! A `Workspace` is a complete, cloneable copy of store state: the node table
//! keyed by `NodeId`, the namespace registry and the node-type registry.
//! Sessions mutate a private workspace and commit it wholesale.

use crate::error::{StoreError, StoreResult};
use crate::namespace::NamespaceRegistry;
use crate::node::{Node, NodeId};
use crate::nodetype::{NodeTypeDefinition, NodeTypeRegistry, NT_UNSTRUCTURED};
use crate::value::{Property, PropertyType, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One segment of a store path, with an optional 1-based same-name-sibling index
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathSegment {
    pub name: String,
    pub index: Option<usize>,
}

/// Parse an absolute path into segments
pub(crate) fn parse_path(path: &str) -> StoreResult<Vec<PathSegment>> {
    if !path.starts_with('/') {
        return Err(StoreError::invalid_path(path, "path must be absolute"));
    }
    arbor_core::path::segments(path)
        .map(|segment| parse_segment(path, segment))
        .collect()
}

fn parse_segment(path: &str, segment: &str) -> StoreResult<PathSegment> {
    match segment.strip_suffix(']') {
        Some(head) => {
            let (name, index) = head
                .split_once('[')
                .ok_or_else(|| StoreError::invalid_path(path, "unbalanced ']'"))?;
            let index: usize = index
                .parse()
                .map_err(|_| StoreError::invalid_path(path, "index must be a positive number"))?;
            if index == 0 || name.is_empty() {
                return Err(StoreError::invalid_path(path, "invalid same-name-sibling index"));
            }
            Ok(PathSegment {
                name: name.to_string(),
                index: Some(index),
            })
        }
        None => Ok(PathSegment {
            name: segment.to_string(),
            index: None,
        }),
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    root: NodeId,
    nodes: Vec<Node>,
    namespaces: NamespaceRegistry,
    node_types: NodeTypeRegistry,
}

/// Complete store state
#[derive(Debug, Clone)]
pub struct Workspace {
    root: NodeId,
    nodes: HashMap<NodeId, Node>,
    pub(crate) namespaces: NamespaceRegistry,
    pub(crate) node_types: NodeTypeRegistry,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    /// An empty workspace holding only the root node
    pub fn new() -> Self {
        let root = Node::new("", None, NT_UNSTRUCTURED);
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            root: root_id,
            nodes,
            namespaces: NamespaceRegistry::default(),
            node_types: NodeTypeRegistry::default(),
        }
    }

    pub(crate) fn to_json(&self) -> StoreResult<Vec<u8>> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        let snapshot = Snapshot {
            root: self.root,
            nodes,
            namespaces: self.namespaces.clone(),
            node_types: self.node_types.clone(),
        };
        Ok(serde_json::to_vec_pretty(&snapshot)?)
    }

    pub(crate) fn from_json(bytes: &[u8]) -> StoreResult<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        let nodes: HashMap<NodeId, Node> = snapshot.nodes.into_iter().map(|n| (n.id, n)).collect();
        if !nodes.contains_key(&snapshot.root) {
            return Err(StoreError::content_parse("snapshot has no root node"));
        }
        Ok(Self {
            root: snapshot.root,
            nodes,
            namespaces: snapshot.namespaces,
            node_types: snapshot.node_types,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> StoreResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| StoreError::path_not_found(format!("[{}]", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> StoreResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::path_not_found(format!("[{}]", id)))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children of `parent` named `name`, in order
    pub fn children_named(&self, parent: NodeId, name: &str) -> StoreResult<Vec<NodeId>> {
        let parent = self.node(parent)?;
        Ok(parent
            .children
            .iter()
            .copied()
            .filter(|c| self.nodes.get(c).is_some_and(|n| n.name == name))
            .collect())
    }

    /// Resolve a path to every node it matches
    ///
    /// Intermediate segments must be unambiguous; the last segment may match
    /// several same-name siblings when it carries no index.
    pub fn resolve_all(&self, path: &str) -> StoreResult<Vec<NodeId>> {
        let segments = parse_path(path)?;
        let mut current = vec![self.root];
        let last = segments.len();
        for (i, segment) in segments.iter().enumerate() {
            let parent = match current.as_slice() {
                [single] => *single,
                [] => return Err(StoreError::path_not_found(path)),
                many => {
                    return Err(StoreError::AmbiguousPath {
                        path: path.to_string(),
                        count: many.len(),
                    })
                }
            };
            let matches = self.children_named(parent, &segment.name)?;
            current = match segment.index {
                Some(index) => matches.get(index - 1).copied().into_iter().collect(),
                None => matches,
            };
            if current.is_empty() {
                return Err(StoreError::path_not_found(path));
            }
            if i + 1 < last && current.len() > 1 {
                return Err(StoreError::AmbiguousPath {
                    path: path.to_string(),
                    count: current.len(),
                });
            }
        }
        Ok(current)
    }

    /// Resolve a path that must name exactly one node
    pub fn resolve(&self, path: &str) -> StoreResult<NodeId> {
        let matches = self.resolve_all(path)?;
        match matches.as_slice() {
            [single] => Ok(*single),
            many => Err(StoreError::AmbiguousPath {
                path: path.to_string(),
                count: many.len(),
            }),
        }
    }

    /// Absolute path of a node; an index is rendered when same-name siblings exist
    pub fn path_of(&self, id: NodeId) -> StoreResult<String> {
        let mut segments = Vec::new();
        let mut current = self.node(id)?;
        while let Some(parent_id) = current.parent {
            let siblings = self.children_named(parent_id, &current.name)?;
            if siblings.len() > 1 {
                let position = siblings.iter().position(|s| *s == current.id).unwrap_or(0);
                segments.push(format!("{}[{}]", current.name, position + 1));
            } else {
                segments.push(current.name.clone());
            }
            current = self.node(parent_id)?;
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    /// Whether `id` is `ancestor` or lies beneath it
    pub fn is_descendant(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.nodes.get(&node_id).and_then(|n| n.parent);
        }
        false
    }

    fn types_of(&self, node: &Node) -> Vec<String> {
        std::iter::once(node.primary_type.clone())
            .chain(node.mixins.iter().cloned())
            .collect()
    }

    /// Whether the children of this node keep a caller-defined order
    pub fn is_orderable(&self, id: NodeId) -> StoreResult<bool> {
        let types = self.types_of(self.node(id)?);
        let refs: Vec<&str> = types.iter().map(String::as_str).collect();
        Ok(self.node_types.is_orderable(&refs))
    }

    /// Whether the parent's type allows another child with this name
    pub fn allows_same_name_sibling(&self, parent: NodeId, name: &str) -> StoreResult<bool> {
        let types = self.types_of(self.node(parent)?);
        let refs: Vec<&str> = types.iter().map(String::as_str).collect();
        Ok(self
            .node_types
            .child_definition(&refs, name)
            .is_some_and(|d| d.same_name_siblings))
    }

    fn check_item_name(&self, name: &str) -> StoreResult<()> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(|c| matches!(c, '/' | '[' | ']' | '*' | '|'))
        {
            return Err(StoreError::invalid_path(name, "invalid item name"));
        }
        self.namespaces.check_name(name)
    }

    /// Add a child node
    ///
    /// Without an explicit type the parent's child definition supplies the default.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        name: &str,
        primary_type: Option<&str>,
    ) -> StoreResult<NodeId> {
        self.check_item_name(name)?;
        let parent_node = self.node(parent)?;
        let parent_types = self.types_of(parent_node);
        let refs: Vec<&str> = parent_types.iter().map(String::as_str).collect();

        let definition = self
            .node_types
            .child_definition(&refs, name)
            .ok_or_else(|| {
                StoreError::constraint(format!(
                    "type '{}' does not allow child node '{}'",
                    parent_node.primary_type, name
                ))
            })?;

        let node_type = match primary_type.or(definition.default_type.as_deref()) {
            Some(t) => t.to_string(),
            None => {
                return Err(StoreError::constraint(format!(
                    "no primary type given for '{}' and no default is defined",
                    name
                )))
            }
        };
        let type_def = self
            .node_types
            .get(&node_type)
            .ok_or_else(|| StoreError::UnknownNodeType {
                name: node_type.clone(),
            })?;
        if type_def.mixin || type_def.is_abstract {
            return Err(StoreError::constraint(format!(
                "'{}' cannot be used as a primary type",
                node_type
            )));
        }
        if !self.node_types.is_subtype(&node_type, &definition.required_type) {
            return Err(StoreError::constraint(format!(
                "'{}' is not a '{}' required for child '{}'",
                node_type, definition.required_type, name
            )));
        }

        let same_name_allowed = definition.same_name_siblings;
        if !same_name_allowed && !self.children_named(parent, name)?.is_empty() {
            let path = arbor_core::path::join(&self.path_of(parent)?, name);
            return Err(StoreError::ItemExists { path });
        }

        let node = Node::new(name, Some(parent), &node_type);
        let id = node.id;
        self.nodes.insert(id, node);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Add a mixin type to a node
    pub fn add_mixin(&mut self, id: NodeId, mixin: &str) -> StoreResult<()> {
        let def = self
            .node_types
            .get(mixin)
            .ok_or_else(|| StoreError::UnknownNodeType {
                name: mixin.to_string(),
            })?;
        if !def.mixin {
            return Err(StoreError::constraint(format!("'{}' is not a mixin", mixin)));
        }
        let node = self.node_mut(id)?;
        if !node.mixins.iter().any(|m| m == mixin) {
            node.mixins.push(mixin.to_string());
        }
        Ok(())
    }

    /// Remove a node and its subtree
    pub fn remove_node(&mut self, id: NodeId) -> StoreResult<()> {
        if id == self.root {
            return Err(StoreError::constraint("the root node cannot be removed"));
        }
        let subtree = self.subtree(id)?;
        let removed: HashSet<NodeId> = subtree.iter().copied().collect();

        for node in self.nodes.values() {
            if removed.contains(&node.id) {
                continue;
            }
            let references_removed = node.properties.values().any(|p| {
                p.values()
                    .iter()
                    .any(|v| matches!(v, Value::Reference(target) if removed.contains(target)))
            });
            if references_removed {
                return Err(StoreError::ReferenceIntegrity {
                    path: self.path_of(id)?,
                    referrer: self.path_of(node.id)?,
                });
            }
        }

        let parent = self.node(id)?.parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|c| *c != id);
        }
        for node_id in subtree {
            self.nodes.remove(&node_id);
        }
        Ok(())
    }

    /// The node and all its descendants, depth first
    pub fn subtree(&self, id: NodeId) -> StoreResult<Vec<NodeId>> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = self.node(next)?;
            result.push(next);
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(result)
    }

    /// Set a property, checking it against the node's type definitions
    pub fn set_property(&mut self, id: NodeId, name: &str, property: Property) -> StoreResult<()> {
        self.check_item_name(name)?;
        let node = self.node(id)?;
        let types = self.types_of(node);
        let refs: Vec<&str> = types.iter().map(String::as_str).collect();
        let multiple = property.is_multiple();

        let definition = self
            .node_types
            .property_definition(&refs, name, multiple)
            .ok_or_else(|| {
                StoreError::constraint(format!(
                    "type '{}' does not allow {} property '{}'",
                    node.primary_type,
                    if multiple { "multi-valued" } else { "single-valued" },
                    name
                ))
            })?;
        if definition.multiple != multiple {
            return Err(StoreError::constraint(format!(
                "property '{}' must be {}",
                name,
                if definition.multiple { "multi-valued" } else { "single-valued" }
            )));
        }
        if definition.required_type != PropertyType::Undefined {
            if let Some(bad) = property
                .values()
                .iter()
                .find(|v| v.property_type() != definition.required_type)
            {
                return Err(StoreError::constraint(format!(
                    "property '{}' requires {} values, got {}",
                    name,
                    definition.required_type,
                    bad.property_type()
                )));
            }
        }

        self.node_mut(id)?.properties.insert(name.to_string(), property);
        Ok(())
    }

    /// Remove a property; absent properties are an error
    pub fn remove_property(&mut self, id: NodeId, name: &str) -> StoreResult<()> {
        let path = arbor_core::path::join(&self.path_of(id)?, name);
        let node = self.node_mut(id)?;
        match node.properties.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::path_not_found(path)),
        }
    }

    /// Zero-based position of a node among its parent's children
    pub fn child_position(&self, id: NodeId) -> StoreResult<usize> {
        let node = self.node(id)?;
        let parent = node
            .parent
            .ok_or_else(|| StoreError::unsupported("the root node has no position"))?;
        self.node(parent)?
            .children
            .iter()
            .position(|c| *c == id)
            .ok_or_else(|| StoreError::path_not_found(format!("[{}]", id)))
    }

    /// Move a node to a position among its siblings; the parent must be orderable
    pub fn move_to_position(&mut self, id: NodeId, position: usize) -> StoreResult<()> {
        let parent = self
            .node(id)?
            .parent
            .ok_or_else(|| StoreError::unsupported("the root node cannot be ordered"))?;
        if !self.is_orderable(parent)? {
            return Err(StoreError::unsupported(format!(
                "children of {} are not orderable",
                self.path_of(parent)?
            )));
        }
        let children = &mut self.node_mut(parent)?.children;
        children.retain(|c| *c != id);
        let position = position.min(children.len());
        children.insert(position, id);
        Ok(())
    }

    pub fn register_namespace(&mut self, prefix: &str, uri: &str) -> StoreResult<()> {
        self.namespaces.register(prefix, uri)
    }

    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces.uri(prefix)
    }

    fn check_type_names(&self, definition: &NodeTypeDefinition) -> StoreResult<()> {
        self.namespaces.check_name(&definition.name)?;
        for property in &definition.properties {
            if property.name != crate::nodetype::RESIDUAL {
                self.namespaces.check_name(&property.name)?;
            }
        }
        for child in &definition.children {
            if child.name != crate::nodetype::RESIDUAL {
                self.namespaces.check_name(&child.name)?;
            }
        }
        Ok(())
    }

    pub fn register_node_type(&mut self, definition: NodeTypeDefinition) -> StoreResult<()> {
        self.check_type_names(&definition)?;
        self.node_types.register(definition)
    }

    pub fn reregister_node_type(&mut self, definition: NodeTypeDefinition) -> StoreResult<()> {
        self.check_type_names(&definition)?;
        self.node_types.reregister(definition)
    }

    pub fn has_node_type(&self, name: &str) -> bool {
        self.node_types.contains(name)
    }

    /// Check mandatory properties across the tree
    pub fn validate(&self) -> StoreResult<()> {
        for node in self.nodes.values() {
            let types = self.types_of(node);
            let refs: Vec<&str> = types.iter().map(String::as_str).collect();
            for mandatory in self.node_types.mandatory_properties(&refs) {
                if !node.properties.contains_key(mandatory) {
                    return Err(StoreError::constraint(format!(
                        "{} is missing mandatory property '{}'",
                        self.path_of(node.id)?,
                        mandatory
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodetype::NT_FOLDER;

    fn sample() -> (Workspace, NodeId) {
        let mut ws = Workspace::new();
        let content = ws.add_node(ws.root(), "content", None).unwrap();
        ws.add_node(content, "a", None).unwrap();
        ws.add_node(content, "b", None).unwrap();
        (ws, content)
    }

    #[test]
    fn test_resolve_and_path_of() {
        let (ws, content) = sample();
        let b = ws.resolve("/content/b").unwrap();
        assert_eq!(ws.path_of(b).unwrap(), "/content/b");
        assert_eq!(ws.resolve("/content").unwrap(), content);
        assert!(matches!(
            ws.resolve("/content/missing"),
            Err(StoreError::PathNotFound { .. })
        ));
        assert!(matches!(
            ws.resolve("content"),
            Err(StoreError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_same_name_siblings_are_ambiguous_without_index() {
        let (mut ws, content) = sample();
        let second = ws.add_node(content, "a", None).unwrap();
        assert!(matches!(
            ws.resolve("/content/a"),
            Err(StoreError::AmbiguousPath { count: 2, .. })
        ));
        assert_eq!(ws.resolve_all("/content/a").unwrap().len(), 2);
        assert_eq!(ws.resolve("/content/a[2]").unwrap(), second);
        assert_eq!(ws.path_of(second).unwrap(), "/content/a[2]");
    }

    #[test]
    fn test_folder_rejects_same_name_sibling() {
        let mut ws = Workspace::new();
        let folder = ws.add_node(ws.root(), "files", Some(NT_FOLDER)).unwrap();
        ws.add_node(folder, "x", None).unwrap();
        assert!(matches!(
            ws.add_node(folder, "x", None),
            Err(StoreError::ItemExists { .. })
        ));
        assert!(!ws.is_orderable(folder).unwrap());
    }

    #[test]
    fn test_remove_checks_references() {
        let (mut ws, content) = sample();
        let a = ws.resolve("/content/a").unwrap();
        let b = ws.resolve("/content/b").unwrap();
        ws.set_property(b, "link", Property::single(Value::Reference(a)))
            .unwrap();

        assert!(matches!(
            ws.remove_node(a),
            Err(StoreError::ReferenceIntegrity { .. })
        ));
        ws.remove_node(content).unwrap();
        assert_eq!(ws.node_count(), 1);
        assert!(ws.remove_node(ws.root()).is_err());
    }

    #[test]
    fn test_move_to_position() {
        let (mut ws, content) = sample();
        let b = ws.resolve("/content/b").unwrap();
        assert_eq!(ws.child_position(b).unwrap(), 1);
        ws.move_to_position(b, 0).unwrap();
        assert_eq!(ws.child_position(b).unwrap(), 0);
        assert_eq!(ws.node(content).unwrap().children()[1], ws.resolve("/content/a").unwrap());
    }

    #[test]
    fn test_property_names_need_registered_prefix() {
        let (mut ws, content) = sample();
        assert!(matches!(
            ws.set_property(content, "demo:title", Property::single("x")),
            Err(StoreError::UnknownPrefix { .. })
        ));
        ws.register_namespace("demo", "http://example.org/demo/1.0")
            .unwrap();
        ws.set_property(content, "demo:title", Property::single("x"))
            .unwrap();
    }

    #[test]
    fn test_snapshot_round_trip_preserves_tree() {
        let (ws, _) = sample();
        let restored = Workspace::from_json(&ws.to_json().unwrap()).unwrap();
        assert_eq!(restored.node_count(), ws.node_count());
        assert!(restored.resolve("/content/b").is_ok());
    }
}
