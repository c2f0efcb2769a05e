use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{DagFsError, DagFsResult, DagNode, ObjId};

/// The store capability consumed by readers and overlays.
///
/// `add` is content-addressed and idempotent by hash; implementations must
/// be safe for concurrent use.
#[async_trait]
pub trait DagService: Send + Sync + 'static {
    async fn add(&self, node: &DagNode) -> DagFsResult<ObjId>;
    async fn get(&self, id: &ObjId) -> DagFsResult<DagNode>;
}

/// A pending, cancellable fetch of a DAG node.
///
/// The fetch starts as soon as the promise is created. `wait` caches the
/// resolved node, so a promise can be realized again after a backward seek;
/// a failed fetch is retried on the next `wait`.
pub struct NodePromise {
    dserv: Arc<dyn DagService>,
    id: ObjId,
    cancel: CancellationToken,
    state: PromiseState,
}

enum PromiseState {
    Fetching(JoinHandle<DagFsResult<DagNode>>),
    Ready(DagNode),
    Idle,
}

impl NodePromise {
    pub fn spawn(dserv: Arc<dyn DagService>, id: ObjId, cancel: CancellationToken) -> Self {
        let handle = Self::start_fetch(dserv.clone(), id.clone(), cancel.clone());
        Self {
            dserv,
            id,
            cancel,
            state: PromiseState::Fetching(handle),
        }
    }

    fn start_fetch(
        dserv: Arc<dyn DagService>,
        id: ObjId,
        cancel: CancellationToken,
    ) -> JoinHandle<DagFsResult<DagNode>> {
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    Err(DagFsError::Cancelled(format!("fetch of {} aborted", id)))
                }
                node = dserv.get(&id) => node,
            }
        })
    }

    pub fn id(&self) -> &ObjId {
        &self.id
    }

    pub async fn wait(&mut self) -> DagFsResult<DagNode> {
        loop {
            match std::mem::replace(&mut self.state, PromiseState::Idle) {
                PromiseState::Ready(node) => {
                    self.state = PromiseState::Ready(node.clone());
                    return Ok(node);
                }
                PromiseState::Fetching(handle) => {
                    if self.cancel.is_cancelled() {
                        handle.abort();
                        return Err(DagFsError::Cancelled(format!(
                            "fetch of {} aborted",
                            self.id
                        )));
                    }
                    match handle.await {
                        Ok(Ok(node)) => {
                            self.state = PromiseState::Ready(node.clone());
                            return Ok(node);
                        }
                        Ok(Err(err)) => return Err(err),
                        Err(join_err) if join_err.is_cancelled() => {
                            return Err(DagFsError::Cancelled(format!(
                                "fetch of {} aborted",
                                self.id
                            )));
                        }
                        Err(join_err) => {
                            return Err(DagFsError::Internal(format!(
                                "prefetch task for {} failed: {}",
                                self.id, join_err
                            )));
                        }
                    }
                }
                PromiseState::Idle => {
                    if self.cancel.is_cancelled() {
                        return Err(DagFsError::Cancelled(format!(
                            "fetch of {} aborted",
                            self.id
                        )));
                    }
                    self.state = PromiseState::Fetching(Self::start_fetch(
                        self.dserv.clone(),
                        self.id.clone(),
                        self.cancel.clone(),
                    ));
                }
            }
        }
    }
}

/// One promise per link of `node`, in declaration order, all scoped to
/// `cancel`.
pub fn get_many(
    dserv: &Arc<dyn DagService>,
    node: &DagNode,
    cancel: &CancellationToken,
) -> Vec<NodePromise> {
    node.links
        .iter()
        .map(|link| NodePromise::spawn(dserv.clone(), link.id.clone(), cancel.clone()))
        .collect()
}
