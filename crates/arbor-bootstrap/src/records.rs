//! Persisted operation records
//!
//! Every record is a node `<root>/<name>` of type `arbor:initializeitem`. The
//! root node carries the accumulated set of module version tags.

use anyhow::{bail, Context, Result};
use arbor_core::path;
use arbor_core::types::{NamespaceBinding, OperationRecord, Source, Status};
use arbor_store::{cnd, Node, Property, Session, StoreError, Value};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub const NAMESPACE_PREFIX: &str = "arbor";
pub const NAMESPACE_URI: &str = "http://www.arbor.dev/arbor/1.0";
pub const ITEM_TYPE: &str = "arbor:initializeitem";
pub const FOLDER_TYPE: &str = "arbor:initializefolder";

const RECORD_TYPES: &str = r#"
<arbor = 'http://www.arbor.dev/arbor/1.0'>

[arbor:initializeitem] > nt:base
  - arbor:sequence (long) mandatory
  - arbor:status (string) mandatory
  - arbor:version (string)
  - arbor:moduleversion (string)
  - arbor:reloadonstartup (boolean)
  - arbor:deltadirective (string)
  - arbor:contentroot (string)
  - arbor:contextnodename (string)
  - arbor:contextpaths (string) multiple
  - arbor:namespace (string)
  - arbor:namespaceuri (string)
  - arbor:nodetypesresource (string)
  - arbor:nodetypes (string)
  - arbor:contentresource (string)
  - arbor:content (string)
  - arbor:contentdelete (string)
  - arbor:contentpropdelete (string)
  - arbor:contentpropset (string) multiple
  - arbor:contentpropadd (string) multiple
  - arbor:extensionsource (string)
  - arbor:appliedat (date)
  - arbor:errormessage (string)

[arbor:initializefolder] > nt:base
  - arbor:version (string) multiple
  + * (arbor:initializeitem) = arbor:initializeitem
"#;

const SEQUENCE: &str = "arbor:sequence";
const STATUS: &str = "arbor:status";
const VERSION: &str = "arbor:version";
const MODULE_VERSION: &str = "arbor:moduleversion";
const RELOAD_ON_STARTUP: &str = "arbor:reloadonstartup";
const DELTA_DIRECTIVE: &str = "arbor:deltadirective";
const CONTENT_ROOT: &str = "arbor:contentroot";
const CONTEXT_NODE_NAME: &str = "arbor:contextnodename";
const CONTEXT_PATHS: &str = "arbor:contextpaths";
const NAMESPACE: &str = "arbor:namespace";
const NAMESPACE_URI_PROP: &str = "arbor:namespaceuri";
const NODE_TYPES_RESOURCE: &str = "arbor:nodetypesresource";
const NODE_TYPES: &str = "arbor:nodetypes";
const CONTENT_RESOURCE: &str = "arbor:contentresource";
const CONTENT: &str = "arbor:content";
const CONTENT_DELETE: &str = "arbor:contentdelete";
const CONTENT_PROP_DELETE: &str = "arbor:contentpropdelete";
const CONTENT_PROP_SET: &str = "arbor:contentpropset";
const CONTENT_PROP_ADD: &str = "arbor:contentpropadd";
const EXTENSION_SOURCE: &str = "arbor:extensionsource";
const APPLIED_AT: &str = "arbor:appliedat";
const ERROR_MESSAGE: &str = "arbor:errormessage";

/// Facade over the record nodes beneath one root path
#[derive(Debug, Clone)]
pub struct RecordTree {
    root: String,
}

impl RecordTree {
    pub fn new(root: impl AsRef<str>) -> Self {
        Self {
            root: path::normalize(root.as_ref()),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn record_path(&self, name: &str) -> String {
        path::join(&self.root, name)
    }

    /// Register the record types and create the root path if missing
    pub fn ensure(&self, session: &mut Session) -> Result<()> {
        if path::is_root(&self.root) {
            bail!("The record root cannot be the store root");
        }
        if session.namespace_uri(NAMESPACE_PREFIX)?.is_none() {
            session.register_namespace(NAMESPACE_PREFIX, NAMESPACE_URI)?;
        }
        let definitions = cnd::parse(RECORD_TYPES);
        for definition in definitions.types {
            if !session.has_node_type(&definition.name)? {
                debug!("Registering record type {}", definition.name);
                session.register_node_type(definition)?;
            }
        }

        let segments: Vec<&str> = path::segments(&self.root).collect();
        let mut current = path::ROOT.to_string();
        for (i, segment) in segments.iter().enumerate() {
            let next = path::join(&current, segment);
            if !session.node_exists(&next)? {
                let node_type = if i + 1 == segments.len() {
                    FOLDER_TYPE
                } else {
                    arbor_store::nodetype::NT_UNSTRUCTURED
                };
                session
                    .add_node(&current, segment, Some(node_type))
                    .with_context(|| format!("Failed to create record root {}", self.root))?;
            }
            current = next;
        }
        Ok(())
    }

    pub fn get(&self, session: &Session, name: &str) -> Result<Option<OperationRecord>> {
        let path = self.record_path(name);
        if !session.node_exists(&path)? {
            return Ok(None);
        }
        let node = session.node_at(&path)?;
        read_record(node).map(Some)
    }

    /// All readable records, ordered by sequence then name
    pub fn list(&self, session: &Session) -> Result<Vec<OperationRecord>> {
        let mut records = Vec::new();
        for node in session.children(&self.root)? {
            match read_record(node) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {:#}", node.name(), e),
            }
        }
        records.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }

    pub fn pending(&self, session: &Session) -> Result<Vec<OperationRecord>> {
        Ok(self
            .list(session)?
            .into_iter()
            .filter(|r| r.status == Status::Pending)
            .collect())
    }

    /// Create or fully replace a record
    pub fn write(&self, session: &mut Session, record: &OperationRecord) -> Result<()> {
        let path = self.record_path(&record.name);
        if session.node_exists(&path)? {
            session.remove(&path)?;
        }
        session
            .add_node(&self.root, &record.name, Some(ITEM_TYPE))
            .with_context(|| format!("Failed to create record '{}'", record.name))?;

        for (name, property) in record_properties(record) {
            session
                .set_property(&path, name, property)
                .with_context(|| format!("Failed to write {} on record '{}'", name, record.name))?;
        }
        Ok(())
    }

    pub fn remove(&self, session: &mut Session, name: &str) -> Result<()> {
        session.remove(&self.record_path(name))?;
        Ok(())
    }

    pub fn set_status(&self, session: &mut Session, name: &str, status: Status) -> Result<()> {
        session.set_property(
            &self.record_path(name),
            STATUS,
            Property::single(status.to_string()),
        )?;
        Ok(())
    }

    /// Refresh the applied-at timestamp without changing anything else
    pub fn touch(&self, session: &mut Session, name: &str, at: DateTime<Utc>) -> Result<()> {
        session.set_property(&self.record_path(name), APPLIED_AT, Property::single(at))?;
        Ok(())
    }

    pub fn mark_done(&self, session: &mut Session, name: &str, at: DateTime<Utc>) -> Result<()> {
        let path = self.record_path(name);
        self.set_status(session, name, Status::Done)?;
        self.touch(session, name, at)?;
        clear_property(session, &path, ERROR_MESSAGE)
    }

    /// Store the reason of a failed attempt; the record stays pending
    pub fn record_failure(
        &self,
        session: &mut Session,
        name: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let path = self.record_path(name);
        self.set_status(session, name, Status::Pending)?;
        self.touch(session, name, at)?;
        session.set_property(&path, ERROR_MESSAGE, Property::single(message))?;
        Ok(())
    }

    pub fn set_context_paths(&self, session: &mut Session, name: &str, paths: &[String]) -> Result<()> {
        let values = paths.iter().map(|p| Value::from(p.as_str())).collect();
        session.set_property(&self.record_path(name), CONTEXT_PATHS, Property::multiple(values))?;
        Ok(())
    }

    /// The module version tags seen so far
    pub fn version_tags(&self, session: &Session) -> Result<Vec<String>> {
        let node = session.node_at(&self.root)?;
        Ok(node.property(VERSION).map(Property::strings).unwrap_or_default())
    }

    /// Add a module version tag; tags are never removed
    pub fn add_version_tag(&self, session: &mut Session, tag: &str) -> Result<()> {
        let mut tags = self.version_tags(session)?;
        if tags.iter().any(|t| t == tag) {
            return Ok(());
        }
        tags.push(tag.to_string());
        let values = tags.into_iter().map(Value::from).collect();
        session.set_property(&self.root, VERSION, Property::multiple(values))?;
        Ok(())
    }
}

fn clear_property(session: &mut Session, node_path: &str, name: &str) -> Result<()> {
    match session.remove_property(&path::join(node_path, name)) {
        Ok(()) | Err(StoreError::PathNotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn record_properties(record: &OperationRecord) -> Vec<(&'static str, Property)> {
    let mut props = vec![
        (SEQUENCE, Property::single(record.sequence)),
        (STATUS, Property::single(record.status.to_string())),
        (RELOAD_ON_STARTUP, Property::single(record.reload_on_startup)),
        (CONTENT_ROOT, Property::single(record.content_root.as_str())),
    ];

    let mut text = |name: &'static str, value: Option<&str>| {
        if let Some(value) = value {
            props.push((name, Property::single(value)));
        }
    };
    text(VERSION, record.item_version.as_deref());
    text(MODULE_VERSION, record.module_version.as_deref());
    text(
        DELTA_DIRECTIVE,
        record.delta_directive.map(|d| d.to_string()).as_deref(),
    );
    text(CONTEXT_NODE_NAME, record.context_node_name.as_deref());
    text(NAMESPACE, record.namespace.as_ref().map(|n| n.prefix.as_str()));
    text(NAMESPACE_URI_PROP, record.namespace.as_ref().map(|n| n.uri.as_str()));
    match &record.node_types {
        Some(Source::Resource(r)) => text(NODE_TYPES_RESOURCE, Some(r.as_str())),
        Some(Source::Inline(i)) => text(NODE_TYPES, Some(i.as_str())),
        None => {}
    }
    match &record.content {
        Some(Source::Resource(r)) => text(CONTENT_RESOURCE, Some(r.as_str())),
        Some(Source::Inline(i)) => text(CONTENT, Some(i.as_str())),
        None => {}
    }
    text(CONTENT_DELETE, record.content_delete.as_deref());
    text(CONTENT_PROP_DELETE, record.content_property_delete.as_deref());
    text(EXTENSION_SOURCE, record.origin_url.as_deref());
    text(ERROR_MESSAGE, record.error_message.as_deref());

    let list = |values: &[String]| Property::multiple(values.iter().map(|v| Value::from(v.as_str())).collect());
    if !record.context_paths.is_empty() {
        props.push((CONTEXT_PATHS, list(&record.context_paths)));
    }
    if let Some(values) = &record.content_property_set {
        props.push((CONTENT_PROP_SET, list(values)));
    }
    if let Some(values) = &record.content_property_add {
        props.push((CONTENT_PROP_ADD, list(values)));
    }
    if let Some(at) = record.applied_at {
        props.push((APPLIED_AT, Property::single(at)));
    }
    props
}

fn text(node: &Node, name: &str) -> Option<String> {
    node.property(name)
        .and_then(Property::value)
        .map(|v| v.to_string())
}

fn list(node: &Node, name: &str) -> Option<Vec<String>> {
    node.property(name).map(Property::strings)
}

fn read_record(node: &Node) -> Result<OperationRecord> {
    let sequence = node
        .property(SEQUENCE)
        .and_then(Property::value)
        .and_then(Value::as_long)
        .with_context(|| format!("record '{}' has no sequence", node.name()))?;
    let mut record = OperationRecord::new(node.name(), sequence);

    record.status = match text(node, STATUS) {
        Some(status) => status
            .parse()
            .map_err(|e: String| anyhow::anyhow!("record '{}': {}", node.name(), e))?,
        None => Status::Pending,
    };
    record.item_version = text(node, VERSION);
    record.module_version = text(node, MODULE_VERSION);
    record.reload_on_startup = node
        .property(RELOAD_ON_STARTUP)
        .and_then(Property::value)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    record.delta_directive = match text(node, DELTA_DIRECTIVE) {
        Some(d) => Some(
            d.parse()
                .map_err(|e: String| anyhow::anyhow!("record '{}': {}", node.name(), e))?,
        ),
        None => None,
    };
    record.content_root = text(node, CONTENT_ROOT).unwrap_or_else(|| path::ROOT.to_string());
    record.context_node_name = text(node, CONTEXT_NODE_NAME);
    record.context_paths = list(node, CONTEXT_PATHS).unwrap_or_default();
    record.namespace = match (text(node, NAMESPACE), text(node, NAMESPACE_URI_PROP)) {
        (Some(prefix), Some(uri)) => Some(NamespaceBinding { prefix, uri }),
        _ => None,
    };
    record.node_types = text(node, NODE_TYPES_RESOURCE)
        .map(Source::Resource)
        .or_else(|| text(node, NODE_TYPES).map(Source::Inline));
    record.content = text(node, CONTENT_RESOURCE)
        .map(Source::Resource)
        .or_else(|| text(node, CONTENT).map(Source::Inline));
    record.content_delete = text(node, CONTENT_DELETE);
    record.content_property_delete = text(node, CONTENT_PROP_DELETE);
    record.content_property_set = list(node, CONTENT_PROP_SET);
    record.content_property_add = list(node, CONTENT_PROP_ADD);
    record.origin_url = text(node, EXTENSION_SOURCE);
    record.applied_at = node
        .property(APPLIED_AT)
        .and_then(Property::value)
        .and_then(Value::as_date);
    record.error_message = text(node, ERROR_MESSAGE);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::types::DeltaDirective;
    use arbor_store::Repository;

    fn tree_with_session() -> (RecordTree, Session) {
        let repo = Repository::in_memory();
        let mut session = repo.login();
        let tree = RecordTree::new("/arbor:configuration/arbor:initialize");
        tree.ensure(&mut session).unwrap();
        (tree, session)
    }

    #[test]
    fn test_write_and_read_back() {
        let (tree, mut session) = tree_with_session();
        let mut record = OperationRecord::new("seed-content", 30000);
        record.item_version = Some("1.1".to_string());
        record.module_version = Some("2.0".to_string());
        record.reload_on_startup = true;
        record.delta_directive = Some(DeltaDirective::Replace);
        record.content_root = "/content".to_string();
        record.context_node_name = Some("docs".to_string());
        record.content = Some(Source::Resource("seed.yaml".to_string()));
        record.origin_url = Some("file:///ext/arbor-extension.yaml".to_string());
        record.applied_at = Some(Utc::now());
        tree.write(&mut session, &record).unwrap();

        let read = tree.get(&session, "seed-content").unwrap().unwrap();
        assert_eq!(read.name, record.name);
        assert_eq!(read.item_version, record.item_version);
        assert_eq!(read.module_version, record.module_version);
        assert_eq!(read.delta_directive, record.delta_directive);
        assert_eq!(read.content, record.content);
        assert_eq!(read.ownership_path(), "/content/docs");
        assert!(read.reload_on_startup);
        session.save().unwrap();
    }

    #[test]
    fn test_status_transitions() {
        let (tree, mut session) = tree_with_session();
        let mut record = OperationRecord::new("ns", 1);
        record.namespace = Some(NamespaceBinding {
            prefix: "demo".to_string(),
            uri: "http://example.org/demo".to_string(),
        });
        tree.write(&mut session, &record).unwrap();
        assert_eq!(tree.pending(&session).unwrap().len(), 1);

        tree.record_failure(&mut session, "ns", "boom", Utc::now()).unwrap();
        let failed = tree.get(&session, "ns").unwrap().unwrap();
        assert_eq!(failed.status, Status::Pending);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        tree.mark_done(&mut session, "ns", Utc::now()).unwrap();
        let done = tree.get(&session, "ns").unwrap().unwrap();
        assert_eq!(done.status, Status::Done);
        assert!(done.error_message.is_none());
        assert!(tree.pending(&session).unwrap().is_empty());
    }

    #[test]
    fn test_list_orders_by_sequence() {
        let (tree, mut session) = tree_with_session();
        for (name, sequence) in [("late", 300), ("early", 100), ("middle", 200)] {
            let mut record = OperationRecord::new(name, sequence);
            record.content_delete = Some("/x".to_string());
            tree.write(&mut session, &record).unwrap();
        }
        let names: Vec<String> = tree.list(&session).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_version_tags_accumulate() {
        let (tree, mut session) = tree_with_session();
        tree.add_version_tag(&mut session, "1.0").unwrap();
        tree.add_version_tag(&mut session, "2.0").unwrap();
        tree.add_version_tag(&mut session, "1.0").unwrap();
        assert_eq!(tree.version_tags(&session).unwrap(), vec!["1.0", "2.0"]);
    }

    #[test]
    fn test_record_root_cannot_be_store_root() {
        let repo = Repository::in_memory();
        let mut session = repo.login();
        assert!(RecordTree::new("/").ensure(&mut session).is_err());
    }
}
