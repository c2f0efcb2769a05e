use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{DagFsError, DagFsResult, DagNode, DagService, ObjId};

/// In-memory content-addressed node store.
///
/// The reference `DagService` for tests and embedders that persist root
/// nodes elsewhere.
#[derive(Default)]
pub struct MemDagService {
    nodes: Mutex<HashMap<ObjId, DagNode>>,
}

impl MemDagService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.nodes.lock().await.len()
    }

    pub async fn contains(&self, id: &ObjId) -> bool {
        self.nodes.lock().await.contains_key(id)
    }
}

#[async_trait]
impl DagService for MemDagService {
    async fn add(&self, node: &DagNode) -> DagFsResult<ObjId> {
        let id = node.id();
        self.nodes.lock().await.insert(id.clone(), node.clone());
        Ok(id)
    }

    async fn get(&self, id: &ObjId) -> DagFsResult<DagNode> {
        self.nodes
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DagFsError::NotFound(id.to_string()))
    }
}
