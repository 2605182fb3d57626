//! Content import into a workspace

use super::{ContentNode, ContentValue, Scalar, TypedValue};
use crate::error::{StoreError, StoreResult};
use crate::node::NodeId;
use crate::value::{Property, PropertyType, Value};
use crate::workspace::Workspace;
use arbor_core::types::DeltaDirective;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Supplies the bytes of binary side files named by content documents
pub trait BinaryResolver {
    fn resolve(&self, name: &str) -> StoreResult<Vec<u8>>;
}

/// Resolver for documents that must not reference side files
pub struct NoBinaries;

impl BinaryResolver for NoBinaries {
    fn resolve(&self, name: &str) -> StoreResult<Vec<u8>> {
        Err(StoreError::content_parse(format!(
            "binary resource '{}' referenced but no side files are available",
            name
        )))
    }
}

/// Options for a single import
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Merge behaviour; overrides the document's own `merge` hint when set
    pub merge: Option<DeltaDirective>,
}

/// Outcome of an import
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Absolute paths of the top-level nodes written by the import
    pub context_paths: Vec<String>,
    /// Paths that were skipped because a node of that name already existed
    pub skipped: Vec<String>,
    /// Reference targets that could not be resolved and were dropped
    pub dropped_references: Vec<String>,
}

enum Converted {
    Ready(Property),
    References { multiple: bool, targets: Vec<String> },
}

struct PendingReference {
    node: NodeId,
    name: String,
    multiple: bool,
    targets: Vec<String>,
}

struct Importer<'a> {
    ws: &'a mut Workspace,
    binaries: &'a dyn BinaryResolver,
    ids: HashMap<String, NodeId>,
    references: Vec<PendingReference>,
    report: ImportReport,
}

/// Import a document beneath `parent`
///
/// Every created node gets a freshly minted identifier. Document `id`s are
/// only used to wire up references inside the document.
pub(crate) fn import_document(
    ws: &mut Workspace,
    parent: NodeId,
    document: &ContentNode,
    options: ImportOptions,
    binaries: &dyn BinaryResolver,
) -> StoreResult<ImportReport> {
    let mode = options
        .merge
        .or(document.merge)
        .unwrap_or(DeltaDirective::Replace);
    debug!("Importing '{}' with {} semantics", document.name, mode);

    let mut importer = Importer {
        ws,
        binaries,
        ids: HashMap::new(),
        references: Vec::new(),
        report: ImportReport::default(),
    };

    let top = importer.place(parent, document, mode)?;
    importer.resolve_references()?;

    let mut report = importer.report;
    if let Some(top) = top {
        report.context_paths.push(importer.ws.path_of(top)?);
    }
    Ok(report)
}

impl Importer<'_> {
    fn place(
        &mut self,
        parent: NodeId,
        doc: &ContentNode,
        mode: DeltaDirective,
    ) -> StoreResult<Option<NodeId>> {
        let existing = self.ws.children_named(parent, &doc.name)?;

        if mode != DeltaDirective::Replace && !existing.is_empty() {
            let target = match existing.as_slice() {
                [single] => *single,
                many => {
                    let path = arbor_core::path::join(&self.ws.path_of(parent)?, &doc.name);
                    return Err(StoreError::AmbiguousPath {
                        path,
                        count: many.len(),
                    });
                }
            };
            self.fill(target, doc, mode)?;
            return Ok(Some(target));
        }

        if !existing.is_empty() && !self.ws.allows_same_name_sibling(parent, &doc.name)? {
            let path = arbor_core::path::join(&self.ws.path_of(parent)?, &doc.name);
            warn!("Skipping import of {}: node already exists", path);
            self.report.skipped.push(path);
            return Ok(None);
        }

        let id = self
            .ws
            .add_node(parent, &doc.name, doc.primary_type.as_deref())?;
        self.fill(id, doc, DeltaDirective::Replace)?;
        Ok(Some(id))
    }

    /// Write mixins, properties and children of `doc` onto `target`
    fn fill(&mut self, target: NodeId, doc: &ContentNode, mode: DeltaDirective) -> StoreResult<()> {
        if let Some(id) = &doc.id {
            self.ids.insert(id.clone(), target);
        }
        for mixin in &doc.mixins {
            self.ws.add_mixin(target, mixin)?;
        }

        for (name, value) in &doc.properties {
            let exists = self.ws.node(target)?.property(name).is_some();
            if mode == DeltaDirective::Combine && exists {
                continue;
            }
            match convert(value, self.binaries)? {
                Converted::Ready(property) => self.ws.set_property(target, name, property)?,
                Converted::References { multiple, targets } => {
                    self.references.push(PendingReference {
                        node: target,
                        name: name.clone(),
                        multiple,
                        targets,
                    })
                }
            }
        }

        for child in &doc.children {
            self.place(target, child, mode)?;
        }
        Ok(())
    }

    fn resolve_references(&mut self) -> StoreResult<()> {
        for pending in std::mem::take(&mut self.references) {
            let mut resolved = Vec::new();
            for target in &pending.targets {
                let id = self.ids.get(target).copied().or_else(|| {
                    target
                        .parse::<NodeId>()
                        .ok()
                        .filter(|id| self.ws.contains(*id))
                });
                match id {
                    Some(id) => resolved.push(Value::Reference(id)),
                    None => {
                        warn!(
                            "Dropping reference '{}' from property '{}': target not found",
                            target, pending.name
                        );
                        self.report.dropped_references.push(target.clone());
                    }
                }
            }

            let property = if pending.multiple {
                Property::multiple(resolved)
            } else {
                match resolved.into_iter().next() {
                    Some(value) => Property::single(value),
                    None => continue,
                }
            };
            self.ws.set_property(pending.node, &pending.name, property)?;
        }
        Ok(())
    }
}

fn convert(value: &ContentValue, binaries: &dyn BinaryResolver) -> StoreResult<Converted> {
    match value {
        ContentValue::Single(scalar) => Ok(Converted::Ready(Property::single(plain(scalar)))),
        ContentValue::List(items) => Ok(Converted::Ready(Property::multiple(
            items.iter().map(plain).collect(),
        ))),
        ContentValue::Typed(typed) => convert_typed(typed, binaries),
    }
}

fn plain(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Boolean(v) => Value::Boolean(*v),
        Scalar::Long(v) => Value::Long(*v),
        Scalar::Double(v) => Value::Double(*v),
        Scalar::String(v) => Value::String(v.clone()),
    }
}

fn convert_typed(typed: &TypedValue, binaries: &dyn BinaryResolver) -> StoreResult<Converted> {
    let value_type = typed
        .value_type
        .parse::<PropertyType>()
        .map_err(StoreError::content_parse)?;

    let (multiple, scalars): (bool, Vec<&Scalar>) = match (&typed.value, &typed.values) {
        (Some(v), None) => (false, vec![v]),
        (None, Some(vs)) => (true, vs.iter().collect()),
        (None, None) if typed.resource.is_some() => (false, Vec::new()),
        _ => {
            return Err(StoreError::content_parse(
                "typed value needs exactly one of 'value' or 'values'",
            ))
        }
    };

    if value_type == PropertyType::Reference {
        return Ok(Converted::References {
            multiple,
            targets: scalars.iter().map(|s| s.as_text()).collect(),
        });
    }

    if let Some(resource) = &typed.resource {
        if value_type != PropertyType::Binary {
            return Err(StoreError::content_parse(
                "'resource' is only allowed on binary values",
            ));
        }
        let bytes = binaries.resolve(resource)?;
        return Ok(Converted::Ready(Property::single(Value::Binary(bytes))));
    }

    let values = scalars
        .into_iter()
        .map(|s| typed_value(value_type, s))
        .collect::<StoreResult<Vec<_>>>()?;
    let property = if multiple {
        Property::multiple(values)
    } else {
        match values.into_iter().next() {
            Some(value) => Property::single(value),
            None => return Err(StoreError::content_parse("typed value is empty")),
        }
    };
    Ok(Converted::Ready(property))
}

fn typed_value(value_type: PropertyType, scalar: &Scalar) -> StoreResult<Value> {
    let text = scalar.as_text();
    let invalid = || StoreError::content_parse(format!("'{}' is not a valid {}", text, value_type));
    let value = match (value_type, scalar) {
        (PropertyType::String, _) => Value::String(text.clone()),
        (PropertyType::Name, _) => Value::Name(text.clone()),
        (PropertyType::Path, _) => Value::Path(text.clone()),
        (PropertyType::Long, Scalar::Long(v)) => Value::Long(*v),
        (PropertyType::Long, _) => Value::Long(text.parse().map_err(|_| invalid())?),
        (PropertyType::Double, Scalar::Double(v)) => Value::Double(*v),
        (PropertyType::Double, Scalar::Long(v)) => Value::Double(*v as f64),
        (PropertyType::Double, _) => Value::Double(text.parse().map_err(|_| invalid())?),
        (PropertyType::Boolean, Scalar::Boolean(v)) => Value::Boolean(*v),
        (PropertyType::Boolean, _) => Value::Boolean(text.parse().map_err(|_| invalid())?),
        (PropertyType::Date, _) => Value::Date(
            DateTime::parse_from_rfc3339(&text)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|_| invalid())?,
        ),
        (PropertyType::Binary, _) => Value::Binary(text.clone().into_bytes()),
        (PropertyType::Reference, _) | (PropertyType::Undefined, _) => return Err(invalid()),
    };
    Ok(value)
}
