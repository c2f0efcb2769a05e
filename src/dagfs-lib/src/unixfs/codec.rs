use prost::Message;

use crate::{DagFsError, DagFsResult};

/// Wire structure of the payload carried in a node's data field.
///
/// Tag-length-value: kind (1), inline bytes (2), total filesize (3),
/// per-chunk sizes (4). Encoding is deterministic so that equal payloads
/// hash equally.
mod wire {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DataPb {
        #[prost(int32, tag = "1")]
        pub kind: i32,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub data: Option<Vec<u8>>,
        #[prost(uint64, optional, tag = "3")]
        pub filesize: Option<u64>,
        #[prost(uint64, repeated, packed = "false", tag = "4")]
        pub blocksizes: Vec<u64>,
    }
}

pub const KIND_TAG_RAW: i32 = 0;
pub const KIND_TAG_DIRECTORY: i32 = 1;
pub const KIND_TAG_FILE: i32 = 2;
pub const KIND_TAG_METADATA: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnixFsKind {
    Raw,
    Directory,
    File,
    Metadata,
}

impl UnixFsKind {
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            KIND_TAG_RAW => Some(UnixFsKind::Raw),
            KIND_TAG_DIRECTORY => Some(UnixFsKind::Directory),
            KIND_TAG_FILE => Some(UnixFsKind::File),
            KIND_TAG_METADATA => Some(UnixFsKind::Metadata),
            _ => None,
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            UnixFsKind::Raw => KIND_TAG_RAW,
            UnixFsKind::Directory => KIND_TAG_DIRECTORY,
            UnixFsKind::File => KIND_TAG_FILE,
            UnixFsKind::Metadata => KIND_TAG_METADATA,
        }
    }
}

/// Decoded payload of a filesystem node.
///
/// `Raw` carries the file bytes inline and its node has no links. `File`
/// carries optional inline bytes plus one blocksize per link; the total
/// filesize is inline length + the blocksize sum. `Directory` marks the
/// kind only. `Metadata` describes the single child its node links to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnixFsData {
    pub kind: UnixFsKind,
    pub data: Vec<u8>,
    pub filesize: Option<u64>,
    pub blocksizes: Vec<u64>,
}

impl UnixFsData {
    pub fn new_raw(data: Vec<u8>) -> Self {
        let filesize = data.len() as u64;
        Self {
            kind: UnixFsKind::Raw,
            data,
            filesize: Some(filesize),
            blocksizes: Vec::new(),
        }
    }

    pub fn new_file(data: Vec<u8>, blocksizes: Vec<u64>) -> Self {
        let filesize = data.len() as u64 + blocksizes.iter().sum::<u64>();
        Self {
            kind: UnixFsKind::File,
            data,
            filesize: Some(filesize),
            blocksizes,
        }
    }

    pub fn new_directory() -> Self {
        Self {
            kind: UnixFsKind::Directory,
            data: Vec::new(),
            filesize: None,
            blocksizes: Vec::new(),
        }
    }

    pub fn new_metadata(data: Vec<u8>) -> Self {
        Self {
            kind: UnixFsKind::Metadata,
            data,
            filesize: None,
            blocksizes: Vec::new(),
        }
    }

    pub fn decode(bytes: &[u8]) -> DagFsResult<Self> {
        let pb = wire::DataPb::decode(bytes)
            .map_err(|e| DagFsError::MalformedPayload(e.to_string()))?;
        let kind = UnixFsKind::from_tag(pb.kind).ok_or_else(|| {
            DagFsError::UnrecognizedKind(format!("unknown payload kind tag {}", pb.kind))
        })?;
        Ok(Self {
            kind,
            data: pb.data.unwrap_or_default(),
            filesize: pb.filesize,
            blocksizes: pb.blocksizes,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let pb = wire::DataPb {
            kind: self.kind.tag(),
            data: if self.data.is_empty() {
                None
            } else {
                Some(self.data.clone())
            },
            filesize: self.filesize,
            blocksizes: self.blocksizes.clone(),
        };
        pb.encode_to_vec()
    }

    /// Total logical size of the file this payload describes.
    pub fn filesize(&self) -> u64 {
        match self.kind {
            UnixFsKind::Raw => self.data.len() as u64,
            _ => self.filesize.unwrap_or(self.data.len() as u64),
        }
    }
}
