#![allow(dead_code)]

use metadrop::server::{Server, ShutdownHandle};
use metadrop::storage::DirectoryStore;
use metadrop::{Config, ServerError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Server running on a background thread, storing into a temp directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ShutdownHandle,
    pub join: JoinHandle<Result<(), ServerError>>,
    pub dir: TempDir,
}

impl TestServer {
    pub fn read_file(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.dir.path().join(name)).expect("Failed to read stored file")
    }

    pub fn stop(self) {
        self.handle.shutdown();
        self.join
            .join()
            .expect("server thread panicked")
            .expect("server returned an error");
    }
}

pub fn test_config(max_frames: Option<u64>) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        accept_timeout: Duration::from_millis(20),
        read_timeout: Duration::from_secs(2),
        max_frames,
        ..Config::default()
    }
}

pub fn spawn_server(max_frames: Option<u64>) -> TestServer {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = DirectoryStore::new(dir.path()).expect("Failed to create store");

    let mut server = Server::new(test_config(max_frames), Arc::new(store));
    let addr = server.start().expect("Failed to start server");
    let handle = server.shutdown_handle();
    let join = thread::spawn(move || server.run());

    TestServer {
        addr,
        handle,
        join,
        dir,
    }
}
