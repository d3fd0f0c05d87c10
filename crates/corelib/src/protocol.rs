//! Request/response envelope shared by the name service, storage nodes and callers.
//!
//! Every call sends one `Request` and gets back one `Reply`. The request body
//! names the operation and carries its payload; the response carries an outcome,
//! an optional error code and whichever payload the operation produces.

use crate::error::{Error, ErrorCode};
use crate::file::{Block, FileHandle, OpenMode, ReplicaAssignment};
use crate::node::Node;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Caller-chosen request identifier, echoed back as the response id.
///
/// Advisory only: duplicate deliveries are not deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Used when replying to a request that could not be decoded.
    pub const NIL: RequestId = RequestId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a held file lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Inventory a storage node reports with every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: Node,
    /// Number of replicas held.
    pub blocks: u64,
    /// Total bytes held.
    pub bytes: u64,
}

/// Operation kind plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Name service: open `path` for reading, or create it for writing.
    OpenFile {
        path: String,
        size: u64,
        mode: OpenMode,
    },
    /// Name service: release the lock taken by an open.
    CloseFile {
        path: String,
        mode: OpenMode,
        lease: LeaseId,
    },
    /// Name service: extend a lease.
    RenewLease { lease: LeaseId },
    /// Name service: list committed files.
    List,
    /// Name service: storage node liveness and inventory.
    Heartbeat(NodeReport),
    /// Storage node: persist the head of `chain`, relay the rest.
    WriteBlock { chain: Vec<Block> },
    /// Storage node: read one replica.
    ReadBlock { replica: ReplicaAssignment },
}

impl RequestBody {
    /// Operation name, for logs and error messages.
    pub fn operation(&self) -> &'static str {
        match self {
            RequestBody::OpenFile { .. } => "OpenFile",
            RequestBody::CloseFile { .. } => "CloseFile",
            RequestBody::RenewLease { .. } => "RenewLease",
            RequestBody::List => "List",
            RequestBody::Heartbeat(_) => "Heartbeat",
            RequestBody::WriteBlock { .. } => "WriteBlock",
            RequestBody::ReadBlock { .. } => "ReadBlock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub body: RequestBody,
}

impl Request {
    /// Wrap `body` with a fresh request id.
    pub fn new(body: RequestBody) -> Self {
        Self {
            request_id: RequestId::new(),
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub response_id: RequestId,
    pub outcome: Outcome,
    /// Set on FAILURE.
    pub error: Option<ErrorCode>,
    pub file_handle: Option<FileHandle>,
    /// Lease taken by a successful open.
    pub lease: Option<LeaseId>,
    pub block: Option<Block>,
    pub message: String,
}

impl Response {
    pub fn success(response_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            response_id,
            outcome: Outcome::Success,
            error: None,
            file_handle: None,
            lease: None,
            block: None,
            message: message.into(),
        }
    }

    pub fn failure(response_id: RequestId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            response_id,
            outcome: Outcome::Failure,
            error: Some(code),
            file_handle: None,
            lease: None,
            block: None,
            message: message.into(),
        }
    }

    pub fn failure_from(response_id: RequestId, err: &Error) -> Self {
        Self::failure(response_id, err.code(), err.to_string())
    }

    pub fn with_file_handle(mut self, handle: FileHandle) -> Self {
        self.file_handle = Some(handle);
        self
    }

    pub fn with_lease(mut self, lease: LeaseId) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn with_block(mut self, block: Block) -> Self {
        self.block = Some(block);
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Turn a FAILURE into an `Error::Rejected`, keeping SUCCESS as is.
    pub fn into_result(self) -> crate::Result<Self> {
        match self.outcome {
            Outcome::Success => Ok(self),
            Outcome::Failure => Err(Error::Rejected {
                code: self.error.unwrap_or(ErrorCode::MalformedMessage),
                message: self.message,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    pub response_id: RequestId,
    pub outcome: Outcome,
    /// Sorted lexicographically.
    pub file_names: Vec<String>,
    pub message: String,
}

/// Anything a service writes back on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Response(Response),
    List(ListResponse),
}

impl Reply {
    pub fn response_id(&self) -> RequestId {
        match self {
            Reply::Response(r) => r.response_id,
            Reply::List(l) => l.response_id,
        }
    }

    pub fn into_response(self) -> crate::Result<Response> {
        match self {
            Reply::Response(r) => Ok(r),
            Reply::List(_) => Err(Error::Malformed(
                "expected a response, got a list response".to_string(),
            )),
        }
    }

    pub fn into_list(self) -> crate::Result<ListResponse> {
        match self {
            Reply::List(l) => Ok(l),
            Reply::Response(r) if !r.is_success() => Err(Error::Rejected {
                code: r.error.unwrap_or(ErrorCode::MalformedMessage),
                message: r.message,
            }),
            Reply::Response(_) => Err(Error::Malformed(
                "expected a list response, got a response".to_string(),
            )),
        }
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self {
        Reply::Response(r)
    }
}

impl From<ListResponse> for Reply {
    fn from(l: ListResponse) -> Self {
        Reply::List(l)
    }
}
