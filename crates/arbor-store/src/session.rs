//! Sessions: a private working copy with commit and rollback

use crate::content::{import_document, BinaryResolver, ContentNode, ImportOptions, ImportReport};
use crate::error::{StoreError, StoreResult};
use crate::node::{Node, NodeId};
use crate::nodetype::NodeTypeDefinition;
use crate::repository::Repository;
use crate::value::Property;
use crate::workspace::Workspace;
use arbor_core::path;
use tracing::debug;

/// A saved copy of a session's uncommitted state
#[derive(Clone)]
pub struct Checkpoint(Workspace);

/// A unit of work against a repository
///
/// Changes are invisible to other sessions until `save`. `refresh(false)`
/// discards them.
pub struct Session {
    repository: Repository,
    workspace: Workspace,
    live: bool,
}

impl Session {
    pub(crate) fn new(repository: Repository, workspace: Workspace) -> Self {
        Self {
            repository,
            workspace,
            live: true,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn logout(&mut self) {
        self.live = false;
    }

    fn ws(&self) -> StoreResult<&Workspace> {
        if self.is_live() {
            Ok(&self.workspace)
        } else {
            Err(StoreError::NotLive)
        }
    }

    fn ws_mut(&mut self) -> StoreResult<&mut Workspace> {
        if self.is_live() {
            Ok(&mut self.workspace)
        } else {
            Err(StoreError::NotLive)
        }
    }

    pub fn root(&self) -> StoreResult<&Node> {
        let ws = self.ws()?;
        ws.node(ws.root())
    }

    pub fn node(&self, id: NodeId) -> StoreResult<&Node> {
        self.ws()?.node(id)
    }

    /// The single node at `path`
    pub fn node_at(&self, path: &str) -> StoreResult<&Node> {
        let ws = self.ws()?;
        ws.node(ws.resolve(path)?)
    }

    /// Every same-name sibling the path matches
    pub fn nodes_at(&self, path: &str) -> StoreResult<Vec<&Node>> {
        let ws = self.ws()?;
        ws.resolve_all(path)?
            .into_iter()
            .map(|id| ws.node(id))
            .collect()
    }

    pub fn node_exists(&self, path: &str) -> StoreResult<bool> {
        match self.ws()?.resolve_all(path) {
            Ok(_) => Ok(true),
            Err(StoreError::PathNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn path_of(&self, id: NodeId) -> StoreResult<String> {
        self.ws()?.path_of(id)
    }

    /// Children of the node at `path`, in order
    pub fn children(&self, path: &str) -> StoreResult<Vec<&Node>> {
        let ws = self.ws()?;
        let node = ws.node(ws.resolve(path)?)?;
        node.children().iter().map(|id| ws.node(*id)).collect()
    }

    /// The property at `path`, the last segment naming the property
    pub fn property_at(&self, property_path: &str) -> StoreResult<&Property> {
        let (parent, name) = split_property_path(property_path)?;
        let node = self.node_at(&parent)?;
        node.property(&name)
            .ok_or_else(|| StoreError::path_not_found(property_path))
    }

    pub fn add_node(
        &mut self,
        parent_path: &str,
        name: &str,
        primary_type: Option<&str>,
    ) -> StoreResult<NodeId> {
        let ws = self.ws_mut()?;
        let parent = ws.resolve(parent_path)?;
        ws.add_node(parent, name, primary_type)
    }

    pub fn add_mixin(&mut self, path: &str, mixin: &str) -> StoreResult<()> {
        let ws = self.ws_mut()?;
        let id = ws.resolve(path)?;
        ws.add_mixin(id, mixin)
    }

    /// Remove the node at `path` with its subtree
    pub fn remove(&mut self, path: &str) -> StoreResult<()> {
        let ws = self.ws_mut()?;
        let id = ws.resolve(path)?;
        ws.remove_node(id)?;
        debug!("Removed {}", path);
        Ok(())
    }

    pub fn set_property(&mut self, node_path: &str, name: &str, property: Property) -> StoreResult<()> {
        let ws = self.ws_mut()?;
        let id = ws.resolve(node_path)?;
        ws.set_property(id, name, property)
    }

    pub fn remove_property(&mut self, property_path: &str) -> StoreResult<()> {
        let (parent, name) = split_property_path(property_path)?;
        let ws = self.ws_mut()?;
        let id = ws.resolve(&parent)?;
        ws.remove_property(id, &name)
    }

    /// Zero-based position of the node among its siblings
    pub fn child_position(&self, path: &str) -> StoreResult<usize> {
        let ws = self.ws()?;
        ws.child_position(ws.resolve(path)?)
    }

    /// Move the node to a zero-based position among its siblings
    ///
    /// Fails with `Unsupported` when the parent's type is not orderable.
    pub fn move_to_position(&mut self, path: &str, position: usize) -> StoreResult<()> {
        let ws = self.ws_mut()?;
        let id = ws.resolve(path)?;
        ws.move_to_position(id, position)
    }

    pub fn register_namespace(&mut self, prefix: &str, uri: &str) -> StoreResult<()> {
        self.ws_mut()?.register_namespace(prefix, uri)
    }

    pub fn namespace_uri(&self, prefix: &str) -> StoreResult<Option<String>> {
        Ok(self.ws()?.namespace_uri(prefix).map(str::to_string))
    }

    pub fn register_node_type(&mut self, definition: NodeTypeDefinition) -> StoreResult<()> {
        self.ws_mut()?.register_node_type(definition)
    }

    pub fn reregister_node_type(&mut self, definition: NodeTypeDefinition) -> StoreResult<()> {
        self.ws_mut()?.reregister_node_type(definition)
    }

    pub fn has_node_type(&self, name: &str) -> StoreResult<bool> {
        Ok(self.ws()?.has_node_type(name))
    }

    /// Import a content document beneath `parent_path`
    pub fn import_content(
        &mut self,
        parent_path: &str,
        document: &ContentNode,
        options: ImportOptions,
        binaries: &dyn BinaryResolver,
    ) -> StoreResult<ImportReport> {
        let ws = self.ws_mut()?;
        let parent = ws.resolve(parent_path)?;
        import_document(ws, parent, document, options, binaries)
    }

    /// Commit the working copy
    pub fn save(&mut self) -> StoreResult<()> {
        let ws = self.ws()?;
        ws.validate()?;
        self.repository.commit(ws)
    }

    /// Reload committed state; `keep_changes = false` discards uncommitted work
    pub fn refresh(&mut self, keep_changes: bool) -> StoreResult<()> {
        if !self.is_live() {
            return Err(StoreError::NotLive);
        }
        if !keep_changes {
            self.workspace = self.repository.snapshot();
        }
        Ok(())
    }

    /// Capture the current working copy, including uncommitted changes
    pub fn checkpoint(&self) -> StoreResult<Checkpoint> {
        Ok(Checkpoint(self.ws()?.clone()))
    }

    /// Return the working copy to a checkpoint
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> StoreResult<()> {
        *self.ws_mut()? = checkpoint.0.clone();
        Ok(())
    }
}

fn split_property_path(property_path: &str) -> StoreResult<(String, String)> {
    if !property_path.starts_with('/') {
        return Err(StoreError::invalid_path(property_path, "path must be absolute"));
    }
    path::split_parent(property_path)
        .ok_or_else(|| StoreError::invalid_path(property_path, "the root is not a property"))
}
