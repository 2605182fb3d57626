//! Node type definitions and registry

use crate::error::{StoreError, StoreResult};
use crate::value::PropertyType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Name used by residual (wildcard) item definitions
pub const RESIDUAL: &str = "*";

/// Definition of a property a node type allows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub required_type: PropertyType,
    pub multiple: bool,
    pub mandatory: bool,
}

impl PropertyDefinition {
    pub fn residual(multiple: bool) -> Self {
        Self {
            name: RESIDUAL.to_string(),
            required_type: PropertyType::Undefined,
            multiple,
            mandatory: false,
        }
    }
}

/// Definition of a child node a node type allows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildDefinition {
    pub name: String,
    pub required_type: String,
    pub default_type: Option<String>,
    pub same_name_siblings: bool,
}

/// A complete node type definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeDefinition {
    pub name: String,
    #[serde(default)]
    pub supertypes: Vec<String>,
    #[serde(default)]
    pub orderable: bool,
    #[serde(default)]
    pub mixin: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub children: Vec<ChildDefinition>,
}

impl NodeTypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supertypes: Vec::new(),
            orderable: false,
            mixin: false,
            is_abstract: false,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }
}

pub const NT_BASE: &str = "nt:base";
pub const NT_UNSTRUCTURED: &str = "nt:unstructured";
pub const NT_FOLDER: &str = "nt:folder";
pub const MIX_REFERENCEABLE: &str = "mix:referenceable";

/// Registered node types, including the built-ins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeRegistry {
    types: BTreeMap<String, NodeTypeDefinition>,
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        let mut base = NodeTypeDefinition::new(NT_BASE);
        base.is_abstract = true;

        let mut unstructured = NodeTypeDefinition::new(NT_UNSTRUCTURED);
        unstructured.supertypes = vec![NT_BASE.to_string()];
        unstructured.orderable = true;
        unstructured.properties = vec![
            PropertyDefinition::residual(false),
            PropertyDefinition::residual(true),
        ];
        unstructured.children = vec![ChildDefinition {
            name: RESIDUAL.to_string(),
            required_type: NT_BASE.to_string(),
            default_type: Some(NT_UNSTRUCTURED.to_string()),
            same_name_siblings: true,
        }];

        let mut folder = NodeTypeDefinition::new(NT_FOLDER);
        folder.supertypes = vec![NT_BASE.to_string()];
        folder.children = vec![ChildDefinition {
            name: RESIDUAL.to_string(),
            required_type: NT_BASE.to_string(),
            default_type: Some(NT_FOLDER.to_string()),
            same_name_siblings: false,
        }];

        let mut referenceable = NodeTypeDefinition::new(MIX_REFERENCEABLE);
        referenceable.mixin = true;

        let types = [base, unstructured, folder, referenceable]
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Self { types }
    }
}

impl NodeTypeRegistry {
    pub fn get(&self, name: &str) -> Option<&NodeTypeDefinition> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Register a new type; fails with `NodeTypeExists` when the name is taken
    pub fn register(&mut self, definition: NodeTypeDefinition) -> StoreResult<()> {
        if self.types.contains_key(&definition.name) {
            return Err(StoreError::NodeTypeExists {
                name: definition.name,
            });
        }
        self.check_supertypes(&definition)?;
        self.types.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Replace an existing type definition
    pub fn reregister(&mut self, definition: NodeTypeDefinition) -> StoreResult<()> {
        if !self.types.contains_key(&definition.name) {
            return Err(StoreError::UnknownNodeType {
                name: definition.name,
            });
        }
        self.check_supertypes(&definition)?;
        if definition
            .supertypes
            .iter()
            .any(|s| self.is_subtype(s, &definition.name))
        {
            return Err(StoreError::constraint(format!(
                "node type '{}' would inherit from itself",
                definition.name
            )));
        }
        self.types.insert(definition.name.clone(), definition);
        Ok(())
    }

    fn check_supertypes(&self, definition: &NodeTypeDefinition) -> StoreResult<()> {
        for supertype in &definition.supertypes {
            if supertype == &definition.name {
                return Err(StoreError::constraint(format!(
                    "node type '{}' lists itself as a supertype",
                    definition.name
                )));
            }
            if !self.types.contains_key(supertype) {
                return Err(StoreError::UnknownNodeType {
                    name: supertype.clone(),
                });
            }
        }
        Ok(())
    }

    /// The type and all its transitive supertypes, nearest first
    fn supertype_names<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        std::iter::from_fn(move || {
            while let Some(next) = queue.pop_front() {
                if !seen.insert(next) {
                    continue;
                }
                if let Some(def) = self.types.get(next) {
                    queue.extend(def.supertypes.iter().map(String::as_str));
                }
                return Some(next);
            }
            None
        })
    }

    fn closure<'s>(&'s self, types: &[&str]) -> Vec<&'s NodeTypeDefinition> {
        let mut seen = BTreeSet::new();
        let mut result = Vec::new();
        for name in types {
            for ancestor in self.supertype_names(name) {
                if seen.insert(ancestor.to_string()) {
                    if let Some(def) = self.types.get(ancestor) {
                        result.push(def);
                    }
                }
            }
        }
        result
    }

    /// Whether `name` is `ancestor` or inherits from it
    pub fn is_subtype(&self, name: &str, ancestor: &str) -> bool {
        self.supertype_names(name).any(|n| n == ancestor)
    }

    /// Whether children of a node with these types keep a caller-defined order
    pub fn is_orderable(&self, types: &[&str]) -> bool {
        self.closure(types).iter().any(|d| d.orderable)
    }

    /// Find the definition governing a property
    ///
    /// A named definition wins over residual ones even when its multiplicity
    /// differs, so callers can report the mismatch.
    pub fn property_definition(
        &self,
        types: &[&str],
        name: &str,
        multiple: bool,
    ) -> Option<&PropertyDefinition> {
        let defs: Vec<&PropertyDefinition> = self
            .closure(types)
            .into_iter()
            .flat_map(|d| d.properties.iter())
            .collect();

        let named = || defs.iter().copied().filter(|p| p.name == name);
        named()
            .find(|p| p.multiple == multiple)
            .or_else(|| named().next())
            .or_else(|| {
                defs.iter()
                    .copied()
                    .find(|p| p.name == RESIDUAL && p.multiple == multiple)
            })
    }

    /// Find the definition governing a child node name
    pub fn child_definition(&self, types: &[&str], name: &str) -> Option<&ChildDefinition> {
        let defs: Vec<&ChildDefinition> = self
            .closure(types)
            .into_iter()
            .flat_map(|d| d.children.iter())
            .collect();
        defs.iter()
            .copied()
            .find(|c| c.name == name)
            .or_else(|| defs.iter().copied().find(|c| c.name == RESIDUAL))
    }

    /// Names of mandatory properties for a node with these types
    pub fn mandatory_properties(&self, types: &[&str]) -> Vec<&str> {
        self.closure(types)
            .into_iter()
            .flat_map(|d| d.properties.iter())
            .filter(|p| p.mandatory && p.name != RESIDUAL)
            .map(|p| p.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_type() -> NodeTypeDefinition {
        let mut page = NodeTypeDefinition::new("demo:page");
        page.supertypes = vec![NT_BASE.to_string()];
        page.properties.push(PropertyDefinition {
            name: "demo:title".to_string(),
            required_type: PropertyType::String,
            multiple: false,
            mandatory: true,
        });
        page
    }

    #[test]
    fn test_register_then_conflict_then_reregister() {
        let mut registry = NodeTypeRegistry::default();
        registry.register(page_type()).unwrap();

        let err = registry.register(page_type()).unwrap_err();
        assert!(matches!(err, StoreError::NodeTypeExists { .. }));

        let mut updated = page_type();
        updated.orderable = true;
        registry.reregister(updated).unwrap();
        assert!(registry.get("demo:page").unwrap().orderable);
    }

    #[test]
    fn test_unknown_supertype_is_rejected() {
        let mut registry = NodeTypeRegistry::default();
        let mut def = NodeTypeDefinition::new("demo:thing");
        def.supertypes = vec!["demo:missing".to_string()];
        assert!(matches!(
            registry.register(def),
            Err(StoreError::UnknownNodeType { .. })
        ));
    }

    #[test]
    fn test_inherited_definitions() {
        let mut registry = NodeTypeRegistry::default();
        let mut article = NodeTypeDefinition::new("demo:article");
        article.supertypes = vec![NT_UNSTRUCTURED.to_string()];
        registry.register(article).unwrap();

        assert!(registry.is_subtype("demo:article", NT_BASE));
        assert!(registry.is_orderable(&["demo:article"]));
        assert!(registry
            .child_definition(&["demo:article"], "anything")
            .unwrap()
            .same_name_siblings);
        assert!(!registry.is_orderable(&[NT_FOLDER]));
    }

    #[test]
    fn test_named_property_definition_wins() {
        let mut registry = NodeTypeRegistry::default();
        registry.register(page_type()).unwrap();

        let def = registry
            .property_definition(&["demo:page"], "demo:title", true)
            .unwrap();
        assert!(!def.multiple);
        assert!(registry
            .property_definition(&["demo:page"], "other", false)
            .is_none());
        assert_eq!(
            registry.mandatory_properties(&["demo:page"]),
            vec!["demo:title"]
        );
    }
}
