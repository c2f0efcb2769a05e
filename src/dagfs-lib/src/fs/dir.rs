use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use super::file::{FileHandle, FileNode, OpenMode};
use super::path::split_path;
use crate::dag::{DagNode, DagService, ObjId};
use crate::unixfs::{UnixFsData, UnixFsKind};
use crate::{DagFsError, DagFsResult};

/// Either kind of overlay node a directory entry can resolve to.
pub enum FsNode {
    Dir(Arc<Directory>),
    File(Arc<FileNode>),
}

impl std::fmt::Debug for FsNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsNode::Dir(_) => write!(f, "FsNode::Dir"),
            FsNode::File(_) => write!(f, "FsNode::File"),
        }
    }
}

impl FsNode {
    pub fn is_dir(&self) -> bool {
        matches!(self, FsNode::Dir(_))
    }

    pub async fn get_node(&self) -> DagNode {
        match self {
            FsNode::Dir(dir) => dir.get_node().await,
            FsNode::File(file) => file.get_node().await,
        }
    }
}

/// The upward capability of a directory. The root's parent is a terminal
/// sink; everyone else notifies a parent directory. The backref is weak:
/// the tree owns strictly downward through the caches.
enum DirParent {
    Root,
    Dir(Weak<Directory>),
}

struct DirState {
    name: String,
    node: DagNode,
    child_dirs: HashMap<String, Arc<Directory>>,
    files: HashMap<String, Arc<FileNode>>,
}

/// Mutable in-memory handle for a directory, layered over an immutable
/// snapshot. Children are materialized lazily and cached; every mutation
/// rewrites this node and propagates new content-addressed nodes up to
/// the root.
pub struct Directory {
    dserv: Arc<dyn DagService>,
    parent: DirParent,
    self_ref: Weak<Directory>,
    state: Mutex<DirState>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory").finish_non_exhaustive()
    }
}

impl Directory {
    /// Wrap a directory node as an overlay root. The root's parent is the
    /// no-op sink; embedders persist `get_node()` themselves when they
    /// want the new root hash durable.
    pub fn new_root(node: DagNode, dserv: Arc<dyn DagService>) -> DagFsResult<Arc<Self>> {
        let payload = UnixFsData::decode(&node.data)?;
        if payload.kind != UnixFsKind::Directory {
            return Err(DagFsError::NotADirectory(
                "root node is not a directory".to_string(),
            ));
        }
        Ok(Arc::new_cyclic(|self_ref| Self {
            dserv,
            parent: DirParent::Root,
            self_ref: self_ref.clone(),
            state: Mutex::new(DirState {
                name: String::new(),
                node,
                child_dirs: HashMap::new(),
                files: HashMap::new(),
            }),
        }))
    }

    /// Fetch `id` from the store and wrap it as an overlay root.
    pub async fn from_id(id: &ObjId, dserv: Arc<dyn DagService>) -> DagFsResult<Arc<Self>> {
        let node = dserv.get(id).await?;
        Self::new_root(node, dserv)
    }

    fn new_child(&self, name: &str, node: DagNode) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            dserv: self.dserv.clone(),
            parent: DirParent::Dir(self.self_ref.clone()),
            self_ref: self_ref.clone(),
            state: Mutex::new(DirState {
                name: name.to_string(),
                node,
                child_dirs: HashMap::new(),
                files: HashMap::new(),
            }),
        })
    }

    pub async fn name(&self) -> String {
        self.state.lock().await.name.clone()
    }

    /// The current immutable snapshot of this directory.
    pub async fn get_node(&self) -> DagNode {
        self.state.lock().await.node.clone()
    }

    /// Entry names in link order.
    pub async fn list(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .node
            .links
            .iter()
            .map(|l| l.name.clone())
            .collect()
    }

    /// Resolve a path to a file handle. With `mode.create`, a missing last
    /// segment is created as an empty file; the new file lands only in
    /// this directory's cache and becomes visible in the link set once it
    /// is flushed (a write or a writable-handle close).
    pub fn open<'a>(
        &'a self,
        path: &'a [&'a str],
        mode: OpenMode,
    ) -> BoxFuture<'a, DagFsResult<FileHandle>> {
        Box::pin(async move {
            let Some((first, rest)) = path.split_first() else {
                return Err(DagFsError::IsDirectory(
                    "open needs a file path".to_string(),
                ));
            };
            if rest.is_empty() {
                match self.child_file(first).await {
                    Ok(file) => return Ok(file.with_mode(mode)),
                    Err(DagFsError::NoSuchEntry(_)) if mode.create => {}
                    Err(err) => return Err(err),
                }
                debug!("create new file {} in overlay cache", first);
                let fnode = DagNode::new(UnixFsData::new_file(Vec::new(), Vec::new()).encode());
                let file = FileNode::new(first, fnode, self.self_ref.clone(), self.dserv.clone());
                self.state
                    .lock()
                    .await
                    .files
                    .insert(first.to_string(), file.clone());
                return Ok(file.with_mode(mode));
            }
            let dir = self.child_dir(first).await?;
            dir.open(rest, mode).await
        })
    }

    /// `open` for a slash-delimited path.
    pub async fn open_path(&self, path: &str, mode: OpenMode) -> DagFsResult<FileHandle> {
        let segments = split_path(path);
        self.open(&segments, mode).await
    }

    /// Resolve an entry to a directory or file overlay.
    pub async fn child(&self, name: &str) -> DagFsResult<FsNode> {
        if let Ok(dir) = self.child_dir(name).await {
            return Ok(FsNode::Dir(dir));
        }
        match self.child_file(name).await {
            Ok(file) => Ok(FsNode::File(file)),
            Err(_) => Err(DagFsError::NoSuchEntry(name.to_string())),
        }
    }

    /// Create an empty child directory and propagate the change upward.
    pub async fn mkdir(&self, name: &str) -> DagFsResult<Arc<Directory>> {
        let dir = {
            let mut state = self.state.lock().await;
            if state.child_dirs.contains_key(name)
                || state.files.contains_key(name)
                || state.node.get_link(name).is_some()
            {
                return Err(DagFsError::AlreadyExists(name.to_string()));
            }
            let dnode = DagNode::new(UnixFsData::new_directory().encode());
            // persisted up front so the minted link resolves immediately
            self.dserv.add(&dnode).await?;
            state.node.add_link_clean(name, dnode.id());
            let dir = self.new_child(name, dnode);
            state.child_dirs.insert(name.to_string(), dir.clone());
            dir
        };
        self.close_upward().await?;
        Ok(dir)
    }

    /// Remove an entry. `NoSuchEntry` when no link carries the name.
    pub async fn unlink(&self, name: &str) -> DagFsResult<()> {
        {
            let mut state = self.state.lock().await;
            state.child_dirs.remove(name);
            state.files.remove(name);
            state.node.remove_link(name)?;
        }
        self.close_upward().await
    }

    /// Rename an entry in place. The target name is not guarded: a clean
    /// add replaces any same-name link.
    pub async fn rename_entry(&self, oldname: &str, newname: &str) -> DagFsResult<()> {
        if let Ok(dir) = self.child_dir(oldname).await {
            let child_node = {
                let mut child_state = dir.state.lock().await;
                child_state.name = newname.to_string();
                child_state.node.clone()
            };
            {
                let mut state = self.state.lock().await;
                state.node.remove_link(oldname)?;
                state.node.add_link_clean(newname, child_node.id());
                if let Some(cached) = state.child_dirs.remove(oldname) {
                    state.child_dirs.insert(newname.to_string(), cached);
                }
            }
            return self.close_upward().await;
        }

        if let Ok(file) = self.child_file(oldname).await {
            file.set_name(newname).await;
            let child_node = file.get_node().await;
            {
                let mut state = self.state.lock().await;
                state.node.remove_link(oldname)?;
                state.node.add_link_clean(newname, child_node.id());
                if let Some(cached) = state.files.remove(oldname) {
                    state.files.insert(newname.to_string(), cached);
                }
            }
            return self.close_upward().await;
        }

        Err(DagFsError::NoSuchEntry(oldname.to_string()))
    }

    /// Link an externally built node under `name`. The node itself is
    /// expected to already live in the store.
    pub async fn add_child(&self, name: &str, node: DagNode) -> DagFsResult<()> {
        let payload = UnixFsData::decode(&node.data)?;
        {
            let mut state = self.state.lock().await;
            if state.child_dirs.contains_key(name)
                || state.files.contains_key(name)
                || state.node.get_link(name).is_some()
            {
                return Err(DagFsError::AlreadyExists(name.to_string()));
            }
            state.node.add_link_clean(name, node.id());
            match payload.kind {
                UnixFsKind::Directory => {
                    let dir = self.new_child(name, node);
                    state.child_dirs.insert(name.to_string(), dir);
                }
                UnixFsKind::File | UnixFsKind::Raw | UnixFsKind::Metadata => {
                    let file =
                        FileNode::new(name, node, self.self_ref.clone(), self.dserv.clone());
                    state.files.insert(name.to_string(), file);
                }
            }
        }
        self.close_upward().await
    }

    async fn child_dir(&self, name: &str) -> DagFsResult<Arc<Directory>> {
        let mut state = self.state.lock().await;
        if let Some(dir) = state.child_dirs.get(name) {
            return Ok(dir.clone());
        }
        let Some(link) = state.node.get_link(name).cloned() else {
            return Err(DagFsError::NoSuchEntry(name.to_string()));
        };
        let node = self.dserv.get(&link.id).await?;
        let payload = UnixFsData::decode(&node.data)?;
        match payload.kind {
            UnixFsKind::Directory => {
                debug!("materialize child dir {}", name);
                let dir = self.new_child(name, node);
                state.child_dirs.insert(name.to_string(), dir.clone());
                Ok(dir)
            }
            UnixFsKind::File | UnixFsKind::Raw => Err(DagFsError::NotADirectory(name.to_string())),
            UnixFsKind::Metadata => Err(DagFsError::MetadataUnsupported(name.to_string())),
        }
    }

    async fn child_file(&self, name: &str) -> DagFsResult<Arc<FileNode>> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.files.get(name) {
            return Ok(file.clone());
        }
        let Some(link) = state.node.get_link(name).cloned() else {
            return Err(DagFsError::NoSuchEntry(name.to_string()));
        };
        let node = self.dserv.get(&link.id).await?;
        let payload = UnixFsData::decode(&node.data)?;
        match payload.kind {
            UnixFsKind::File | UnixFsKind::Raw => {
                debug!("materialize child file {}", name);
                let file = FileNode::new(name, node, self.self_ref.clone(), self.dserv.clone());
                state.files.insert(name.to_string(), file.clone());
                Ok(file)
            }
            UnixFsKind::Directory => Err(DagFsError::IsDirectory(name.to_string())),
            UnixFsKind::Metadata => Err(DagFsError::MetadataUnsupported(name.to_string())),
        }
    }

    /// A child overlay changed: persist its node, rewrite our link to it,
    /// and recurse to the root. Idempotent for an unchanged child (the
    /// persisted node and the rewritten link hash the same).
    pub(crate) fn close_child<'a>(&'a self, name: &'a str) -> BoxFuture<'a, DagFsResult<()>> {
        Box::pin(async move {
            let child = self.child(name).await?;
            let child_node = child.get_node().await;
            self.dserv.add(&child_node).await.map_err(|err| {
                warn!("persisting child {} failed: {}", name, err);
                err
            })?;
            {
                let mut state = self.state.lock().await;
                // tolerate absence: a freshly created file has no link yet
                let _ = state.node.remove_link(name);
                state.node.add_link_clean(name, child_node.id());
            }
            self.close_upward().await
        })
    }

    async fn close_upward(&self) -> DagFsResult<()> {
        match &self.parent {
            DirParent::Root => Ok(()),
            DirParent::Dir(parent) => {
                let parent = parent.upgrade().ok_or_else(|| {
                    DagFsError::Internal("parent directory handle was dropped".to_string())
                })?;
                let name = self.name().await;
                parent.close_child(&name).await
            }
        }
    }
}
