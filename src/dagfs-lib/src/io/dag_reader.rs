use std::io::Cursor;
use std::io::Read;
use std::io::SeekFrom;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::dag::{get_many, DagNode, DagService, NodePromise};
use crate::unixfs::{UnixFsData, UnixFsKind};
use crate::{DagFsError, DagFsResult};

/// The buffer the read head is currently draining: a cursor over this
/// level's inline bytes or over a raw chunk, or a nested reader when the
/// chunk is itself a file dag.
enum ChunkBuf {
    Bytes(Cursor<Vec<u8>>),
    Node(Box<DagReader>),
}

/// Byte-addressable stream over a file encoded as a dag of chunks.
///
/// Single consumer. Child chunks are prefetched in link order and realized
/// on demand; `close` cancels the prefetch scope and is idempotent.
impl std::fmt::Debug for DagReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagReader")
            .field("offset", &self.offset)
            .field("closed", &self.closed)
            .finish()
    }
}

pub struct DagReader {
    dserv: Arc<dyn DagService>,
    node: DagNode,
    payload: UnixFsData,
    promises: Vec<NodePromise>,
    link_position: usize,
    buf: ChunkBuf,
    offset: u64,
    cancel: CancellationToken,
    closed: bool,
}

impl DagReader {
    /// Open a reader over `node`. `Directory` nodes are rejected; a
    /// `Metadata` node is unwrapped by descending into its single child.
    pub async fn open(node: DagNode, dserv: Arc<dyn DagService>) -> DagFsResult<Self> {
        Self::open_inner(CancellationToken::new(), node, dserv).await
    }

    /// Like `open`, scoped under `cancel`: cancelling it aborts in-flight
    /// prefetches and fails subsequent reads.
    pub async fn open_with_cancel(
        cancel: CancellationToken,
        node: DagNode,
        dserv: Arc<dyn DagService>,
    ) -> DagFsResult<Self> {
        Self::open_inner(cancel, node, dserv).await
    }

    fn open_inner(
        cancel: CancellationToken,
        node: DagNode,
        dserv: Arc<dyn DagService>,
    ) -> BoxFuture<'static, DagFsResult<Self>> {
        Box::pin(async move {
            let payload = UnixFsData::decode(&node.data)?;
            match payload.kind {
                UnixFsKind::Directory => Err(DagFsError::IsDirectory(
                    "cannot read a directory node as a file".to_string(),
                )),
                UnixFsKind::Raw | UnixFsKind::File => {
                    Self::new_file_reader(node, payload, dserv, cancel.child_token())
                }
                UnixFsKind::Metadata => {
                    if node.links.len() != 1 {
                        return Err(DagFsError::MalformedPayload(format!(
                            "metadata node must reference exactly one child, got {}",
                            node.links.len()
                        )));
                    }
                    let child = dserv.get(&node.links[0].id).await?;
                    Self::open_inner(cancel, child, dserv).await
                }
            }
        })
    }

    fn new_file_reader(
        node: DagNode,
        payload: UnixFsData,
        dserv: Arc<dyn DagService>,
        cancel: CancellationToken,
    ) -> DagFsResult<Self> {
        match payload.kind {
            UnixFsKind::Raw if !node.links.is_empty() => {
                return Err(DagFsError::MalformedPayload(format!(
                    "raw node must not carry links, got {}",
                    node.links.len()
                )));
            }
            UnixFsKind::File if payload.blocksizes.len() != node.links.len() => {
                return Err(DagFsError::MalformedPayload(format!(
                    "blocksize count {} does not match link count {}",
                    payload.blocksizes.len(),
                    node.links.len()
                )));
            }
            _ => {}
        }
        let promises = get_many(&dserv, &node, &cancel);
        Ok(Self {
            dserv,
            buf: ChunkBuf::Bytes(Cursor::new(payload.data.clone())),
            payload,
            node,
            promises,
            link_position: 0,
            offset: 0,
            cancel,
            closed: false,
        })
    }

    pub fn node(&self) -> &DagNode {
        &self.node
    }

    /// Total logical length of the file.
    pub fn size(&self) -> u64 {
        self.payload.filesize()
    }

    /// Current absolute byte offset of the read head.
    pub fn tell(&self) -> u64 {
        self.offset
    }

    fn ensure_open(&self) -> DagFsResult<()> {
        if self.closed {
            return Err(DagFsError::Cancelled("reader is closed".to_string()));
        }
        Ok(())
    }

    /// Fail the reader permanently; the payload under the read head was
    /// not what the parent declared.
    fn fail_closed(&mut self, err: DagFsError) -> DagFsError {
        warn!("dag reader closed on bad chunk: {}", err);
        self.close();
        err
    }

    /// Realize the next chunk under the read head. Returns false at end of
    /// stream.
    async fn next_chunk(&mut self) -> DagFsResult<bool> {
        if let ChunkBuf::Node(child) = &mut self.buf {
            child.close();
            self.buf = ChunkBuf::Bytes(Cursor::new(Vec::new()));
        }
        if self.link_position >= self.promises.len() {
            return Ok(false);
        }
        let next = self.promises[self.link_position].wait().await?;
        self.link_position += 1;

        let payload = match UnixFsData::decode(&next.data) {
            Ok(payload) => payload,
            Err(err) => return Err(self.fail_closed(err)),
        };
        match payload.kind {
            UnixFsKind::Directory => Err(self.fail_closed(DagFsError::InvalidDirLocation(
                "directory node inside a file dag".to_string(),
            ))),
            UnixFsKind::Metadata => Err(self.fail_closed(DagFsError::UnexpectedMetadata(
                "metadata node inside a file dag".to_string(),
            ))),
            UnixFsKind::Raw => {
                self.buf = ChunkBuf::Bytes(Cursor::new(payload.data));
                Ok(true)
            }
            UnixFsKind::File => {
                let child = match Self::new_file_reader(
                    next,
                    payload,
                    self.dserv.clone(),
                    self.cancel.child_token(),
                ) {
                    Ok(child) => child,
                    Err(err) => return Err(self.fail_closed(err)),
                };
                self.buf = ChunkBuf::Node(Box::new(child));
                Ok(true)
            }
        }
    }

    /// Fill `dst`, advancing across chunks as buffers drain. A short count
    /// (possibly zero) is returned only at end of stream.
    pub async fn read(&mut self, dst: &mut [u8]) -> DagFsResult<usize> {
        self.ensure_open()?;
        let mut total = 0;
        while total < dst.len() {
            let n = match &mut self.buf {
                ChunkBuf::Bytes(cursor) => cursor.read(&mut dst[total..])?,
                ChunkBuf::Node(child) => Box::pin(child.read(&mut dst[total..])).await?,
            };
            total += n;
            self.offset += n as u64;
            if n == 0 && !self.next_chunk().await? {
                break;
            }
        }
        Ok(total)
    }

    /// Read from the current offset to end of stream, appending to `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> DagFsResult<usize> {
        let mut chunk = [0u8; 8192];
        let mut total = 0;
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// Bulk-drain the remaining bytes into `sink`, returning the count
    /// written. Nested file chunks drain through their own reader.
    pub async fn write_to<W>(&mut self, sink: &mut W) -> DagFsResult<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.ensure_open()?;
        let mut total = 0u64;
        loop {
            let n = match &mut self.buf {
                ChunkBuf::Bytes(cursor) => {
                    let pos = cursor.position() as usize;
                    let data = cursor.get_ref();
                    let n = data.len().saturating_sub(pos);
                    if n > 0 {
                        sink.write_all(&data[pos..]).await?;
                        cursor.set_position(data.len() as u64);
                    }
                    n as u64
                }
                ChunkBuf::Node(child) => Box::pin(child.write_to(sink)).await?,
            };
            total += n;
            self.offset += n;
            if !self.next_chunk().await? {
                return Ok(total);
            }
        }
    }

    /// Move the read head. The resolved target must fall in
    /// `[0, filesize]`; `SeekFrom::End` takes the usual negative deltas
    /// for end-relative positions.
    pub async fn seek(&mut self, pos: SeekFrom) -> DagFsResult<u64> {
        self.ensure_open()?;
        let filesize = self.size();
        let target = match pos {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::Current(delta) => self.offset as i128 + delta as i128,
            SeekFrom::End(delta) => filesize as i128 + delta as i128,
        };
        if target < 0 || target > filesize as i128 {
            return Err(DagFsError::InvalidOffset(format!(
                "seek target {} out of range [0, {}]",
                target, filesize
            )));
        }
        let target = target as u64;

        let inline_len = self.payload.data.len() as u64;
        if target <= inline_len {
            if let ChunkBuf::Node(child) = &mut self.buf {
                child.close();
            }
            let mut cursor = Cursor::new(self.payload.data.clone());
            cursor.set_position(target);
            self.buf = ChunkBuf::Bytes(cursor);
            self.link_position = 0;
            self.offset = target;
            return Ok(target);
        }

        // Walk the chunk sizes for the residual. Strict '>': a byte at a
        // cumulative boundary is the first byte of the next chunk.
        let mut left = target - inline_len;
        let mut chunk_index = None;
        for (i, size) in self.payload.blocksizes.iter().enumerate() {
            if *size > left {
                chunk_index = Some(i);
                break;
            }
            left -= *size;
        }

        match chunk_index {
            Some(i) => {
                self.link_position = i;
                if !self.next_chunk().await? {
                    return Err(DagFsError::SeekMismatch(
                        "chunk list ended before the seek target".to_string(),
                    ));
                }
                match &mut self.buf {
                    ChunkBuf::Bytes(cursor) => {
                        if left > cursor.get_ref().len() as u64 {
                            return Err(self.fail_closed(DagFsError::SeekMismatch(format!(
                                "chunk {} is shorter than its declared size",
                                i
                            ))));
                        }
                        cursor.set_position(left);
                    }
                    ChunkBuf::Node(child) => {
                        match Box::pin(child.seek(SeekFrom::Start(left))).await {
                            Ok(landed) if landed == left => {}
                            Ok(landed) => {
                                return Err(self.fail_closed(DagFsError::SeekMismatch(format!(
                                    "child consumed {} of a {} byte seek",
                                    landed, left
                                ))));
                            }
                            Err(DagFsError::InvalidOffset(_)) => {
                                return Err(self.fail_closed(DagFsError::SeekMismatch(format!(
                                    "chunk {} is shorter than its declared size",
                                    i
                                ))));
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            }
            None => {
                // target == filesize: park the reader at end of stream
                if let ChunkBuf::Node(child) = &mut self.buf {
                    child.close();
                }
                self.link_position = self.promises.len();
                self.buf = ChunkBuf::Bytes(Cursor::new(Vec::new()));
            }
        }
        self.offset = target;
        Ok(target)
    }

    /// Cancel the prefetch scope and release any nested reader. Idempotent;
    /// every other operation fails once the reader is closed.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        if let ChunkBuf::Node(child) = &mut self.buf {
            child.close();
        }
        self.buf = ChunkBuf::Bytes(Cursor::new(Vec::new()));
    }
}

impl Drop for DagReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read an entire file dag into memory.
pub async fn read_all(node: DagNode, dserv: Arc<dyn DagService>) -> DagFsResult<Vec<u8>> {
    let mut reader = DagReader::open(node, dserv).await?;
    let mut out = Vec::with_capacity(reader.size() as usize);
    reader.read_to_end(&mut out).await?;
    reader.close();
    Ok(out)
}
