//! Descriptor builders for creating extension fixtures
//!
//! Provides fluent builders producing descriptor YAML, so tests read as the
//! extension an operator would ship.

#![allow(dead_code)]

use serde_yaml_ng::{Mapping, Value};

/// Builder for one declared operation
#[derive(Debug, Clone)]
pub struct ItemBuilder {
    fields: Mapping,
}

impl ItemBuilder {
    pub fn new(name: &str, sequence: i64) -> Self {
        let mut fields = Mapping::new();
        fields.insert("name".into(), name.into());
        fields.insert("sequence".into(), sequence.into());
        Self { fields }
    }

    fn set(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    fn list(values: &[&str]) -> Value {
        Value::Sequence(values.iter().map(|v| Value::from(*v)).collect())
    }

    /// Inline content import beneath `root`
    pub fn content(name: &str, sequence: i64, root: &str, yaml: &str) -> Self {
        Self::new(name, sequence)
            .content_root(root)
            .set("content", yaml.into())
    }

    pub fn version(self, version: &str) -> Self {
        self.set("version", version.into())
    }

    pub fn reload(self) -> Self {
        self.set("reload-on-startup", true.into())
    }

    pub fn delta_directive(self, directive: &str) -> Self {
        self.set("delta-directive", directive.into())
    }

    pub fn disabled(self) -> Self {
        self.set("status", "disabled".into())
    }

    pub fn content_root(self, root: &str) -> Self {
        self.set("content-root", root.into())
    }

    pub fn namespace(self, prefix: &str, uri: &str) -> Self {
        let mut binding = Mapping::new();
        binding.insert("prefix".into(), prefix.into());
        binding.insert("uri".into(), uri.into());
        self.set("namespace", Value::Mapping(binding))
    }

    pub fn node_types(self, cnd: &str) -> Self {
        self.set("node-types", cnd.into())
    }

    pub fn node_types_resource(self, reference: &str) -> Self {
        self.set("node-types-resource", reference.into())
    }

    pub fn content_resource(self, reference: &str) -> Self {
        self.set("content-resource", reference.into())
    }

    pub fn content_delete(self, path: &str) -> Self {
        self.set("content-delete", path.into())
    }

    pub fn property_delete(self, path: &str) -> Self {
        self.set("content-property-delete", path.into())
    }

    pub fn property_set(self, values: &[&str]) -> Self {
        self.set("content-property-set", Self::list(values))
    }

    pub fn property_add(self, values: &[&str]) -> Self {
        self.set("content-property-add", Self::list(values))
    }

    fn into_value(self) -> Value {
        Value::Mapping(self.fields)
    }
}

/// Builder for a whole extension descriptor
#[derive(Debug, Clone, Default)]
pub struct DescriptorBuilder {
    module_version: Option<String>,
    items: Vec<ItemBuilder>,
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module_version(mut self, version: &str) -> Self {
        self.module_version = Some(version.to_string());
        self
    }

    pub fn item(mut self, item: ItemBuilder) -> Self {
        self.items.push(item);
        self
    }

    pub fn to_yaml(&self) -> String {
        let mut root = Mapping::new();
        if let Some(version) = &self.module_version {
            root.insert("module-version".into(), version.as_str().into());
        }
        let items = self.items.iter().cloned().map(ItemBuilder::into_value).collect();
        root.insert("items".into(), Value::Sequence(items));
        serde_yaml_ng::to_string(&Value::Mapping(root)).expect("descriptor serializes")
    }
}
