use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use super::dir::Directory;
use crate::dag::{DagNode, DagService};
use crate::io::DagReader;
use crate::unixfs::UnixFsData;
use crate::{DagFsError, DagFsResult};

/// Access mode for a file handle. The create flag only matters to
/// `Directory::open`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub create: bool,
}

impl OpenMode {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            create: false,
        }
    }

    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
        }
    }
}

struct FileState {
    name: String,
    node: DagNode,
}

/// In-memory handle for a file: owns the current immutable snapshot and
/// notifies the parent directory when it is replaced.
pub struct FileNode {
    dserv: Arc<dyn DagService>,
    parent: Weak<Directory>,
    state: Mutex<FileState>,
}

impl FileNode {
    pub(crate) fn new(
        name: &str,
        node: DagNode,
        parent: Weak<Directory>,
        dserv: Arc<dyn DagService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dserv,
            parent,
            state: Mutex::new(FileState {
                name: name.to_string(),
                node,
            }),
        })
    }

    pub async fn name(&self) -> String {
        self.state.lock().await.name.clone()
    }

    pub(crate) async fn set_name(&self, name: &str) {
        self.state.lock().await.name = name.to_string();
    }

    /// The current immutable snapshot of this file.
    pub async fn get_node(&self) -> DagNode {
        self.state.lock().await.node.clone()
    }

    /// Total logical size, decoded from the snapshot payload.
    pub async fn size(&self) -> DagFsResult<u64> {
        let state = self.state.lock().await;
        Ok(UnixFsData::decode(&state.node.data)?.filesize())
    }

    /// Open a reader over the current snapshot.
    pub async fn open_reader(&self) -> DagFsResult<DagReader> {
        let node = self.get_node().await;
        DagReader::open(node, self.dserv.clone()).await
    }

    /// Replace the snapshot and propagate the change to the root.
    pub async fn set_node(&self, node: DagNode) -> DagFsResult<()> {
        {
            self.state.lock().await.node = node;
        }
        self.flush().await
    }

    /// Persist this file into its parent's link set (and on up to the
    /// root). This is what makes a freshly created file visible.
    pub async fn flush(&self) -> DagFsResult<()> {
        let name = self.name().await;
        let parent = self.parent.upgrade().ok_or_else(|| {
            DagFsError::Internal(format!("parent directory of {} was dropped", name))
        })?;
        parent.close_child(&name).await
    }

    /// View this file through `mode`.
    pub fn with_mode(self: Arc<Self>, mode: OpenMode) -> FileHandle {
        FileHandle { file: self, mode }
    }
}

/// A mode-checked view of a `FileNode`. Closing a writable handle flushes
/// the file upward; closing a read-only handle touches nothing.
impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle").field("mode", &self.mode).finish()
    }
}

pub struct FileHandle {
    file: Arc<FileNode>,
    mode: OpenMode,
}

impl FileHandle {
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn file(&self) -> &Arc<FileNode> {
        &self.file
    }

    pub async fn open_reader(&self) -> DagFsResult<DagReader> {
        if !self.mode.read {
            return Err(DagFsError::PermissionDenied(
                "file is not opened for reading".to_string(),
            ));
        }
        self.file.open_reader().await
    }

    pub async fn get_node(&self) -> DagNode {
        self.file.get_node().await
    }

    pub async fn set_node(&self, node: DagNode) -> DagFsResult<()> {
        if !self.mode.write {
            return Err(DagFsError::PermissionDenied(
                "file is not opened for writing".to_string(),
            ));
        }
        self.file.set_node(node).await
    }

    pub async fn close(self) -> DagFsResult<()> {
        if self.mode.write {
            self.file.flush().await
        } else {
            Ok(())
        }
    }
}
