// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Per-connection metadata carried into request logs.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    pub id: Uuid,
    pub remote_addr: SocketAddr,
    pub established: Instant,
    /// Accepted through the TLS listener.
    pub tls: bool,
}

impl ConnectionMetadata {
    pub fn new(remote_addr: SocketAddr, tls: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            established: Instant::now(),
            tls,
        }
    }

    pub fn age(&self) -> Duration {
        self.established.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_connection() {
        let addr: SocketAddr = "127.0.0.1:1".parse().expect("valid address");
        let a = ConnectionMetadata::new(addr, false);
        let b = ConnectionMetadata::new(addr, true);
        assert_ne!(a.id, b.id);
        assert!(b.tls);
        assert!(a.age() <= b.established.elapsed() + Duration::from_secs(1));
    }
}
