//! Upload client.
//!
//! The server replies to every frame with its own digest of what it
//! received; comparing that against the locally computed digest is the
//! sender's job. `Uploader` does both halves.

use crate::accumulator;
use crate::error::ClientError;
use crate::hasher;
use crate::protocol::{self, TransferHeader};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Local};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// A file ready to be sent as one frame.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub extension: String,
    pub created: String,
    pub data: Vec<u8>,
    pub hash_length: u8,
}

impl FileUpload {
    /// Upload of in-memory data, stamped with the current time.
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>, hash_length: u8) -> Self {
        let filename = filename.into();
        let extension = extension_of(&filename);
        Self {
            filename,
            extension,
            created: Local::now().to_rfc3339(),
            data: data.into(),
            hash_length,
        }
    }

    /// Upload of a file on disk, stamped with its modification time.
    pub fn from_path(path: impl AsRef<Path>, hash_length: u8) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let modified: DateTime<Local> = std::fs::metadata(path)?.modified()?.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            extension: extension_of(&filename),
            filename,
            created: modified.to_rfc3339(),
            data,
            hash_length,
        })
    }

    pub fn with_created(mut self, created: impl Into<String>) -> Self {
        self.created = created.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn header(&self) -> Result<TransferHeader, ClientError> {
        let file_size = u32::try_from(self.data.len()).map_err(|_| ClientError::TooLarge {
            len: self.data.len(),
            max: u32::MAX as usize,
        })?;
        Ok(TransferHeader::new(
            self.filename.clone(),
            self.extension.clone(),
            self.created.clone(),
            file_size,
            self.hash_length,
        ))
    }

    /// Encode the frame and return it with the digest the server should reply with.
    pub fn encode(&self) -> Result<(BytesMut, Vec<u8>), ClientError> {
        let header = self.header()?;
        let mut frame = BytesMut::with_capacity(
            header.encoded_len() + self.data.len() + self.hash_length as usize,
        );
        protocol::encode_header(&header, &mut frame)?;
        frame.put_slice(&self.data);

        let digest = hasher::digest(&frame, self.hash_length as usize);
        frame.put_slice(&digest);
        Ok((frame, digest))
    }
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Server reply for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub server_digest: Vec<u8>,
    pub expected_digest: Vec<u8>,
}

impl UploadReceipt {
    /// Whether the server saw exactly what was sent.
    pub fn verified(&self) -> bool {
        self.server_digest == self.expected_digest
    }
}

/// Client connection to an upload server.
pub struct Uploader {
    stream: TcpStream,
}

impl Uploader {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send one frame and wait for the server's digest.
    ///
    /// Several uploads may be sent over one `Uploader`.
    pub fn upload(&mut self, upload: &FileUpload) -> Result<UploadReceipt, ClientError> {
        let (frame, expected_digest) = upload.encode()?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        debug!(filename = %upload.filename, bytes = frame.len(), "Frame sent");

        let hash_length = upload.hash_length as usize;
        let reply = accumulator::accumulate(
            &mut self.stream,
            BytesMut::new(),
            hash_length,
            hash_length.max(1),
        )?;

        Ok(UploadReceipt {
            server_digest: reply.body.to_vec(),
            expected_digest,
        })
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}
