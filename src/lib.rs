//! metadrop: a TCP file upload server
//!
//! Clients send one or more frames per connection. Each frame carries a
//! metadata header (name, extension, creation time), the file payload and a
//! trailing digest. The server stores the payload and answers with a SHAKE-128
//! digest of the header and payload it received, which the client compares
//! against its own.
//!
//! Modules:
//! - `protocol`: frame header codec
//! - `accumulator`: exact-length reads from a chunked stream
//! - `hasher`: SHAKE-128 digests
//! - `session`: per-connection state machine
//! - `server`: listening socket and accept loop
//! - `storage`: where received files go
//! - `client`: sending side, with digest verification

pub mod accumulator;
pub mod client;
pub mod config;
pub mod error;
pub mod hasher;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use client::{FileUpload, UploadReceipt, Uploader};
pub use config::Config;
pub use error::{ClientError, FrameError, ServerError, StoreError, TransferError};
pub use protocol::TransferHeader;
pub use server::{LifecycleState, Server, ShutdownHandle};
pub use storage::{DirectoryStore, FileStore, MemoryStore};
