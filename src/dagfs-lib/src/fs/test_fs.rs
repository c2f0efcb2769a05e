use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::dag::{DagNode, DagService, MemDagService, ObjId};
use crate::fs::{Directory, OpenMode};
use crate::unixfs::UnixFsData;
use crate::{DagFsError, DagFsResult};

fn file_node(data: &[u8]) -> DagNode {
    DagNode::new(UnixFsData::new_file(data.to_vec(), Vec::new()).encode())
}

fn dir_node() -> DagNode {
    DagNode::new(UnixFsData::new_directory().encode())
}

/// Root directory with links `{"a" -> empty dir, "b" -> file "hi"}`.
async fn build_tree() -> (Arc<dyn DagService>, Arc<Directory>) {
    let dserv: Arc<dyn DagService> = Arc::new(MemDagService::new());

    let sub = dir_node();
    dserv.add(&sub).await.unwrap();
    let file_b = file_node(b"hi");
    dserv.add(&file_b).await.unwrap();

    let mut root = dir_node();
    root.add_link_clean("a", sub.id());
    root.add_link_clean("b", file_b.id());
    dserv.add(&root).await.unwrap();

    let root = Directory::new_root(root, dserv.clone()).unwrap();
    (dserv, root)
}

async fn read_file(root: &Arc<Directory>, path: &[&str]) -> DagFsResult<Vec<u8>> {
    let handle = root.open(path, OpenMode::read_only()).await?;
    let mut reader = handle.open_reader().await?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await?;
    reader.close();
    Ok(out)
}

#[tokio::test]
async fn test_new_root_rejects_file_node() {
    let dserv: Arc<dyn DagService> = Arc::new(MemDagService::new());
    let err = Directory::new_root(file_node(b"x"), dserv).unwrap_err();
    assert!(matches!(err, DagFsError::NotADirectory(_)));
}

#[tokio::test]
async fn test_list_in_link_order() {
    let (_dserv, root) = build_tree().await;
    assert_eq!(root.list().await, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_open_empty_path() {
    let (_dserv, root) = build_tree().await;
    let err = root.open(&[], OpenMode::read_only()).await.unwrap_err();
    assert!(matches!(err, DagFsError::IsDirectory(_)));
}

#[tokio::test]
async fn test_open_directory_entry() {
    let (_dserv, root) = build_tree().await;
    let err = root.open(&["a"], OpenMode::read_only()).await.unwrap_err();
    assert!(matches!(err, DagFsError::IsDirectory(_)));
}

#[tokio::test]
async fn test_open_and_read_file() {
    let (_dserv, root) = build_tree().await;
    assert_eq!(read_file(&root, &["b"]).await.unwrap(), b"hi");
}

#[tokio::test]
async fn test_open_missing_without_create() {
    let (_dserv, root) = build_tree().await;
    let err = root.open(&["c"], OpenMode::read_only()).await.unwrap_err();
    assert!(matches!(err, DagFsError::NoSuchEntry(_)));
}

#[tokio::test]
async fn test_create_is_deferred_until_flush() {
    let (dserv, root) = build_tree().await;
    let before = root.get_node().await;

    let handle = root.open(&["c"], OpenMode::create()).await.unwrap();

    // the new file lives only in the overlay cache so far
    assert_eq!(root.list().await, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(root.get_node().await, before);

    // a writable-handle close flushes the file into the link set
    handle.close().await.unwrap();
    assert_eq!(
        root.list().await,
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
    assert_ne!(root.get_node().await, before);

    let node = root.child("c").await.unwrap();
    assert!(!node.is_dir());
    // the flushed node is resolvable from the store
    let link = root.get_node().await.get_link("c").unwrap().id.clone();
    dserv.get(&link).await.unwrap();
}

#[tokio::test]
async fn test_child_returns_cached_unflushed_file() {
    let (_dserv, root) = build_tree().await;
    let _handle = root.open(&["c"], OpenMode::create()).await.unwrap();
    // not linked yet, but the overlay cache resolves it
    let node = root.child("c").await.unwrap();
    assert!(!node.is_dir());
}

#[tokio::test]
async fn test_open_path_through_subdir() {
    let (_dserv, root) = build_tree().await;

    let handle = root.open(&["a", "f"], OpenMode::create()).await.unwrap();
    handle.set_node(file_node(b"nested")).await.unwrap();
    handle.close().await.unwrap();

    assert_eq!(read_file(&root, &["a", "f"]).await.unwrap(), b"nested");

    let via_path = root
        .open_path("/a/f", OpenMode::read_only())
        .await
        .unwrap();
    let mut reader = via_path.open_reader().await.unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"nested");
}

#[tokio::test]
async fn test_open_through_file_segment() {
    let (_dserv, root) = build_tree().await;
    let err = root
        .open(&["b", "x"], OpenMode::read_only())
        .await
        .unwrap_err();
    assert!(matches!(err, DagFsError::NotADirectory(_)));
}

#[tokio::test]
async fn test_handle_mode_checks() {
    let (_dserv, root) = build_tree().await;

    let handle = root.open(&["b"], OpenMode::read_only()).await.unwrap();
    let err = handle.set_node(file_node(b"nope")).await.unwrap_err();
    assert!(matches!(err, DagFsError::PermissionDenied(_)));

    let write_only = OpenMode {
        read: false,
        write: true,
        create: false,
    };
    let handle = root.open(&["b"], write_only).await.unwrap();
    let err = handle.open_reader().await.unwrap_err();
    assert!(matches!(err, DagFsError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_mkdir_and_navigate() {
    let (_dserv, root) = build_tree().await;
    let before = root.get_node().await;

    let sub = root.mkdir("sub").await.unwrap();
    assert_eq!(sub.name().await, "sub");

    let names = root.list().await;
    assert!(names.contains(&"sub".to_string()));
    assert_ne!(root.get_node().await, before);

    let node = root.child("sub").await.unwrap();
    assert!(node.is_dir());
}

#[tokio::test]
async fn test_mkdir_existing_names() {
    let (_dserv, root) = build_tree().await;
    let err = root.mkdir("a").await.unwrap_err();
    assert!(matches!(err, DagFsError::AlreadyExists(_)));
    let err = root.mkdir("b").await.unwrap_err();
    assert!(matches!(err, DagFsError::AlreadyExists(_)));

    root.mkdir("sub").await.unwrap();
    let err = root.mkdir("sub").await.unwrap_err();
    assert!(matches!(err, DagFsError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_mkdir_link_resolves_from_store() {
    let (dserv, root) = build_tree().await;
    root.mkdir("sub").await.unwrap();
    let link = root.get_node().await.get_link("sub").unwrap().id.clone();
    let node = dserv.get(&link).await.unwrap();
    let payload = UnixFsData::decode(&node.data).unwrap();
    assert_eq!(payload.kind, crate::unixfs::UnixFsKind::Directory);
}

#[tokio::test]
async fn test_unlink() {
    let (_dserv, root) = build_tree().await;

    root.unlink("b").await.unwrap();
    assert_eq!(root.list().await, vec!["a".to_string()]);
    let err = root.child("b").await.unwrap_err();
    assert!(matches!(err, DagFsError::NoSuchEntry(_)));

    let err = root.unlink("b").await.unwrap_err();
    assert!(matches!(err, DagFsError::NoSuchEntry(_)));
}

#[tokio::test]
async fn test_rename_file_keeps_content_hash() {
    let (_dserv, root) = build_tree().await;
    let before = root.get_node().await;
    let old_target = before.get_link("b").unwrap().id.clone();

    root.rename_entry("b", "y").await.unwrap();

    let err = root.child("b").await.unwrap_err();
    assert!(matches!(err, DagFsError::NoSuchEntry(_)));

    let node = root.child("y").await.unwrap();
    assert!(!node.is_dir());
    let after = root.get_node().await;
    assert_eq!(after.get_link("y").unwrap().id, old_target);
    assert_ne!(after, before);

    assert_eq!(read_file(&root, &["y"]).await.unwrap(), b"hi");
}

#[tokio::test]
async fn test_rename_file_moves_cache_entry() {
    let (_dserv, root) = build_tree().await;
    // materialize the file overlay first so the cache entry must move
    root.open(&["b"], OpenMode::read_only()).await.unwrap();

    root.rename_entry("b", "y").await.unwrap();
    let handle = root.open(&["y"], OpenMode::read_only()).await.unwrap();
    assert_eq!(handle.file().name().await, "y");
}

#[tokio::test]
async fn test_rename_directory() {
    let (_dserv, root) = build_tree().await;
    root.rename_entry("a", "d").await.unwrap();

    let node = root.child("d").await.unwrap();
    match node {
        crate::fs::FsNode::Dir(dir) => assert_eq!(dir.name().await, "d"),
        crate::fs::FsNode::File(_) => panic!("expected a directory"),
    }
    let err = root.child("a").await.unwrap_err();
    assert!(matches!(err, DagFsError::NoSuchEntry(_)));
}

#[tokio::test]
async fn test_rename_missing() {
    let (_dserv, root) = build_tree().await;
    let err = root.rename_entry("zzz", "y").await.unwrap_err();
    assert!(matches!(err, DagFsError::NoSuchEntry(_)));
}

#[tokio::test]
async fn test_add_child_file_and_dir() {
    let (dserv, root) = build_tree().await;

    let extern_file = file_node(b"imported");
    dserv.add(&extern_file).await.unwrap();
    root.add_child("x", extern_file.clone()).await.unwrap();
    assert_eq!(read_file(&root, &["x"]).await.unwrap(), b"imported");

    let extern_dir = dir_node();
    dserv.add(&extern_dir).await.unwrap();
    root.add_child("imported-dir", extern_dir).await.unwrap();
    assert!(root.child("imported-dir").await.unwrap().is_dir());

    let err = root.add_child("x", extern_file).await.unwrap_err();
    assert!(matches!(err, DagFsError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_add_child_metadata_lands_in_file_cache() {
    let (dserv, root) = build_tree().await;
    let meta = DagNode::new(UnixFsData::new_metadata(Vec::new()).encode());
    dserv.add(&meta).await.unwrap();

    root.add_child("m", meta).await.unwrap();
    // resolved through the file cache; a cold lookup would reject it
    let node = root.child("m").await.unwrap();
    assert!(!node.is_dir());
}

#[tokio::test]
async fn test_cold_metadata_entry_is_rejected() {
    let dserv: Arc<dyn DagService> = Arc::new(MemDagService::new());
    let meta = DagNode::new(UnixFsData::new_metadata(Vec::new()).encode());
    dserv.add(&meta).await.unwrap();
    let mut root_node = dir_node();
    root_node.add_link_clean("m", meta.id());
    dserv.add(&root_node).await.unwrap();
    let root = Directory::new_root(root_node, dserv).unwrap();

    let err = root.open(&["m"], OpenMode::read_only()).await.unwrap_err();
    assert!(matches!(err, DagFsError::MetadataUnsupported(_)));
}

#[tokio::test]
async fn test_deep_mutation_propagates_to_root() {
    let (dserv, root) = build_tree().await;

    let sub = root.mkdir("sub").await.unwrap();
    sub.mkdir("inner").await.unwrap();

    let handle = root
        .open(&["sub", "inner", "f"], OpenMode::create())
        .await
        .unwrap();
    handle.set_node(file_node(b"deep")).await.unwrap();
    handle.close().await.unwrap();

    // every ancestor snapshot was rewritten; a fresh overlay walked from
    // the persisted root resolves the file's post-state
    let root_node = root.get_node().await;
    let root_id = dserv.add(&root_node).await.unwrap();
    let fresh = Directory::from_id(&root_id, dserv.clone()).await.unwrap();
    assert_eq!(
        read_file(&fresh, &["sub", "inner", "f"]).await.unwrap(),
        b"deep"
    );
}

#[tokio::test]
async fn test_set_node_replaces_ancestors() {
    let (_dserv, root) = build_tree().await;
    let sub = root.mkdir("sub").await.unwrap();
    let root_before = root.get_node().await;
    let sub_before = sub.get_node().await;

    let handle = root.open(&["sub", "f"], OpenMode::create()).await.unwrap();
    handle.set_node(file_node(b"data")).await.unwrap();

    let sub_after = sub.get_node().await;
    let root_after = root.get_node().await;
    assert_ne!(sub_after, sub_before);
    assert_ne!(root_after, root_before);
    assert_eq!(
        root_after.get_link("sub").unwrap().id,
        sub_after.id(),
        "parent link must track the child snapshot"
    );
}

#[tokio::test]
async fn test_close_child_is_idempotent_by_hash() {
    let (_dserv, root) = build_tree().await;
    let handle = root.open(&["c"], OpenMode::create()).await.unwrap();
    handle.set_node(file_node(b"stable")).await.unwrap();
    let first = root.get_node().await;

    // flushing the unchanged file again rewrites the same link
    handle.file().flush().await.unwrap();
    assert_eq!(root.get_node().await, first);
}

struct FlakyDagService {
    inner: MemDagService,
    fail_adds: AtomicBool,
}

#[async_trait]
impl DagService for FlakyDagService {
    async fn add(&self, node: &DagNode) -> DagFsResult<ObjId> {
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(DagFsError::IoError("store write refused".to_string()));
        }
        self.inner.add(node).await
    }

    async fn get(&self, id: &ObjId) -> DagFsResult<DagNode> {
        self.inner.get(id).await
    }
}

#[tokio::test]
async fn test_upward_close_failure_aborts_mutation() {
    let flaky = Arc::new(FlakyDagService {
        inner: MemDagService::new(),
        fail_adds: AtomicBool::new(false),
    });
    let dserv: Arc<dyn DagService> = flaky.clone();

    let root_node = dir_node();
    dserv.add(&root_node).await.unwrap();
    let root = Directory::new_root(root_node, dserv.clone()).unwrap();
    let sub = root.mkdir("sub").await.unwrap();

    flaky.fail_adds.store(true, Ordering::SeqCst);
    let handle = sub.open(&["f"], OpenMode::create()).await.unwrap();
    let err = handle.set_node(file_node(b"data")).await.unwrap_err();
    assert!(matches!(err, DagFsError::IoError(_)));

    // the store heals and the retry converges
    flaky.fail_adds.store(false, Ordering::SeqCst);
    handle.file().flush().await.unwrap();
    assert!(sub.list().await.contains(&"f".to_string()));
    assert_eq!(
        root.get_node().await.get_link("sub").unwrap().id,
        sub.get_node().await.id()
    );
}
