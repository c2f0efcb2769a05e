use std::fmt;

use prost::Message;
use sha2::{Digest, Sha256};

use crate::{DagFsError, DagFsResult};

pub const OBJ_ID_PREFIX: &str = "sha256";

/// Content id of a DAG node: sha256 over the node's canonical encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjId([u8; 32]);

impl ObjId {
    pub fn from_bytes(bytes: &[u8]) -> DagFsResult<Self> {
        if bytes.len() != 32 {
            return Err(DagFsError::InvalidParam(format!(
                "object id must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(Self(hash))
    }

    pub fn parse(s: &str) -> DagFsResult<Self> {
        let hex_part = s
            .strip_prefix(OBJ_ID_PREFIX)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| {
                DagFsError::InvalidParam(format!("invalid object id format: {}", s))
            })?;
        let raw = hex::decode(hex_part)
            .map_err(|e| DagFsError::InvalidParam(format!("invalid object id hex: {}", e)))?;
        Self::from_bytes(&raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", OBJ_ID_PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self)
    }
}

/// A named reference from a parent node to a child node by content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DagLink {
    pub name: String,
    pub id: ObjId,
}

impl DagLink {
    pub fn new(name: &str, id: ObjId) -> Self {
        Self {
            name: name.to_string(),
            id,
        }
    }
}

/// An immutable content-addressed object: a byte payload plus an ordered
/// list of named links. Equality and identity are by content hash.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DagNode {
    pub data: Vec<u8>,
    pub links: Vec<DagLink>,
}

mod envelope {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PbLink {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub hash: Option<Vec<u8>>,
        #[prost(string, optional, tag = "2")]
        pub name: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PbNode {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub data: Option<Vec<u8>>,
        #[prost(message, repeated, tag = "2")]
        pub links: Vec<PbLink>,
    }
}

impl DagNode {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            links: Vec::new(),
        }
    }

    /// Canonical encoding; `id()` hashes these bytes.
    pub fn encode(&self) -> Vec<u8> {
        let pb = envelope::PbNode {
            data: if self.data.is_empty() {
                None
            } else {
                Some(self.data.clone())
            },
            links: self
                .links
                .iter()
                .map(|l| envelope::PbLink {
                    hash: Some(l.id.as_bytes().to_vec()),
                    name: if l.name.is_empty() {
                        None
                    } else {
                        Some(l.name.clone())
                    },
                })
                .collect(),
        };
        pb.encode_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> DagFsResult<Self> {
        let pb = envelope::PbNode::decode(bytes)
            .map_err(|e| DagFsError::MalformedPayload(format!("node envelope: {}", e)))?;
        let mut links = Vec::with_capacity(pb.links.len());
        for l in pb.links {
            let hash = l.hash.unwrap_or_default();
            links.push(DagLink {
                name: l.name.unwrap_or_default(),
                id: ObjId::from_bytes(&hash).map_err(|_| {
                    DagFsError::MalformedPayload(format!(
                        "link hash must be 32 bytes, got {}",
                        hash.len()
                    ))
                })?,
            });
        }
        Ok(Self {
            data: pb.data.unwrap_or_default(),
            links,
        })
    }

    pub fn id(&self) -> ObjId {
        let digest = Sha256::digest(self.encode());
        ObjId(digest.into())
    }

    pub fn get_link(&self, name: &str) -> Option<&DagLink> {
        self.links.iter().find(|l| l.name == name)
    }

    /// Remove any prior link with `name`, then append a link to `id`.
    pub fn add_link_clean(&mut self, name: &str, id: ObjId) {
        self.links.retain(|l| l.name != name);
        self.links.push(DagLink::new(name, id));
    }

    pub fn remove_link(&mut self, name: &str) -> DagFsResult<()> {
        let before = self.links.len();
        self.links.retain(|l| l.name != name);
        if self.links.len() == before {
            return Err(DagFsError::NoSuchEntry(name.to_string()));
        }
        Ok(())
    }
}
