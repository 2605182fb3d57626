//! Extension descriptor parsing
//!
//! ```yaml
//! module-version: "2.0"
//! items:
//!   - name: seed-content
//!     sequence: 30000
//!     reload-on-startup: true
//!     content-root: /content
//!     content-resource: seed.yaml
//! ```

use arbor_core::path;
use arbor_core::types::{DeltaDirective, NamespaceBinding, OperationRecord, Source, Status};
use arbor_core::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use tracing::warn;

/// A parsed extension descriptor
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExtensionDescriptor {
    #[serde(default, deserialize_with = "version_string")]
    pub module_version: Option<String>,
    #[serde(default)]
    pub items: Vec<DescriptorItem>,
}

/// One declared operation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DescriptorItem {
    pub name: String,
    pub sequence: i64,
    #[serde(default, deserialize_with = "version_string")]
    pub version: Option<String>,
    #[serde(default)]
    pub reload_on_startup: bool,
    #[serde(default)]
    pub delta_directive: Option<DeltaDirective>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub content_root: Option<String>,
    #[serde(default)]
    pub namespace: Option<NamespaceBinding>,
    #[serde(default)]
    pub node_types_resource: Option<String>,
    #[serde(default)]
    pub node_types: Option<String>,
    #[serde(default)]
    pub content_resource: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_delete: Option<String>,
    #[serde(default)]
    pub content_property_delete: Option<String>,
    #[serde(default)]
    pub content_property_set: Option<Vec<String>>,
    #[serde(default)]
    pub content_property_add: Option<Vec<String>>,
}

/// Accept versions written as YAML strings or bare numbers
fn version_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml_ng::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml_ng::Value::Null) => Ok(None),
        Some(serde_yaml_ng::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml_ng::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "version must be a string or number, got {:?}",
            other
        ))),
    }
}

impl ExtensionDescriptor {
    /// Parse and validate a descriptor read from `origin`
    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let descriptor: ExtensionDescriptor = serde_yaml_ng::from_str(text)
            .map_err(|e| Error::descriptor(origin, e.to_string()))?;

        let mut seen = HashSet::new();
        for item in &descriptor.items {
            if item.name.trim().is_empty() {
                return Err(Error::descriptor(origin, "item with an empty name"));
            }
            check_item_name(&item.name).map_err(|reason| {
                Error::descriptor(origin, format!("item name '{}' {}", item.name, reason))
            })?;
            if !seen.insert(item.name.as_str()) {
                return Err(Error::descriptor(
                    origin,
                    format!("duplicate item name '{}'", item.name),
                ));
            }
            if item.content.is_some() && item.content_resource.is_some() {
                return Err(Error::descriptor(
                    origin,
                    format!("item '{}' declares content both inline and as a resource", item.name),
                ));
            }
            if item.node_types.is_some() && item.node_types_resource.is_some() {
                return Err(Error::descriptor(
                    origin,
                    format!("item '{}' declares node types both inline and as a resource", item.name),
                ));
            }
            item.to_record(descriptor.module_version.as_deref(), origin)
                .validate_payload()
                .map_err(|message| Error::descriptor(origin, message))?;
        }

        Ok(descriptor)
    }
}

/// Item names become record node names, so they follow the store's naming rules
fn check_item_name(name: &str) -> std::result::Result<(), &'static str> {
    if name == "." || name == ".." {
        return Err("is reserved");
    }
    if name.contains(|c| matches!(c, '/' | '[' | ']' | '*' | '|')) {
        return Err("contains a character not allowed in node names");
    }
    if name.contains(':') {
        return Err("must not carry a namespace prefix");
    }
    Ok(())
}

impl DescriptorItem {
    /// Stage this item as a fresh pending record
    pub fn to_record(&self, module_version: Option<&str>, origin: &str) -> OperationRecord {
        let mut record = OperationRecord::new(self.name.clone(), self.sequence);
        record.item_version = self.version.clone();
        record.module_version = module_version.map(str::to_string);
        record.reload_on_startup = self.reload_on_startup;
        record.delta_directive = self.delta_directive;
        record.content_root = path::normalize(self.content_root.as_deref().unwrap_or(path::ROOT));
        record.namespace = self.namespace.clone();
        record.node_types = source(&self.node_types_resource, &self.node_types);
        record.content = source(&self.content_resource, &self.content);
        record.content_delete = self.content_delete.as_deref().map(path::normalize);
        record.content_property_delete = self.content_property_delete.as_deref().map(path::normalize);
        record.content_property_set = self.content_property_set.clone();
        record.content_property_add = self.content_property_add.clone();
        record.origin_url = Some(origin.to_string());

        match self.status {
            Some(Status::Disabled) => record.status = Status::Disabled,
            Some(other) => warn!(
                "Ignoring declared status '{}' on item '{}' in {}",
                other, self.name, origin
            ),
            None => {}
        }
        record
    }
}

fn source(resource: &Option<String>, inline: &Option<String>) -> Option<Source> {
    match (resource, inline) {
        (Some(r), _) => Some(Source::Resource(r.clone())),
        (None, Some(i)) => Some(Source::Inline(i.clone())),
        (None, None) => None,
    }
}
