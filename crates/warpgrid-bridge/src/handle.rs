use std::time::Duration;

use warpgrid_host_api::HostHandle;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::task::Spawner;

/// Everything bridge code needs to reach the host and the task pool.
///
/// Cheap to clone; handed to every invocation through its
/// [`RuntimeContext`](crate::context::RuntimeContext).
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    host: HostHandle,
    spawner: Spawner,
    chunk_size: usize,
    socket_timeout: Option<Duration>,
}

impl BridgeHandle {
    pub fn new(host: HostHandle, spawner: Spawner) -> Self {
        Self {
            host,
            spawner,
            chunk_size: DEFAULT_CHUNK_SIZE,
            socket_timeout: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Deadline applied to sockets opened through this handle, relative to
    /// connect time.
    pub fn with_socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout
    }
}
