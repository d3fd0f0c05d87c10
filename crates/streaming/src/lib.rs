//! Network transport for chainfs services.
//!
//! This crate moves the shared request/response envelope over TCP:
//! - A length-prefixed bincode frame codec
//! - The server loop feeding decoded requests to a `RequestHandler`
//! - Remote stubs implementing the RPC traits for callers and peers

pub mod codec;
pub mod error;
pub mod receiver;
pub mod sender;

pub use codec::{read_frame, write_frame, MAX_FRAME_LEN};
pub use error::StreamingError;
pub use receiver::serve;
pub use sender::{Endpoint, RemoteDataNode, RemoteNameNode, TcpConnector};
