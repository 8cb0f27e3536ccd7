use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::trace;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::core::{
    error::FrameResult,
    traits::{PortId, Transport, TransportPort},
};

/// In-process transport shared by a host and the embedded contexts it drives.
///
/// Every posted message reaches every connected port, including the port of
/// the bus that posted it, in posting order per port.
#[derive(Default)]
pub struct LoopbackTransport {
    ports: DashMap<PortId, UnboundedSender<Value>>,
    next_id: AtomicU64,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }
}

impl Transport for LoopbackTransport {
    fn post(&self, message: Value) -> FrameResult<()> {
        let mut closed = Vec::new();
        for port in self.ports.iter() {
            if port.value().send(message.clone()).is_err() {
                closed.push(*port.key());
            }
        }
        for id in closed {
            trace!("Dropping closed transport port {}", id);
            self.ports.remove(&id);
        }
        Ok(())
    }

    fn connect(&self) -> TransportPort {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded_channel();
        self.ports.insert(id, sender);
        TransportPort { id, receiver }
    }

    fn disconnect(&self, id: PortId) {
        self.ports.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_delivers_to_every_port_including_sender() {
        let transport = LoopbackTransport::new();
        let mut a = transport.connect();
        let mut b = transport.connect();

        transport.post(json!({"n": 1})).unwrap();
        transport.post(json!({"n": 2})).unwrap();

        assert_eq!(a.receiver.recv().await.unwrap(), json!({"n": 1}));
        assert_eq!(a.receiver.recv().await.unwrap(), json!({"n": 2}));
        assert_eq!(b.receiver.recv().await.unwrap(), json!({"n": 1}));

        transport.disconnect(a.id);
        assert_eq!(transport.port_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_ports_are_pruned() {
        let transport = LoopbackTransport::new();
        let port = transport.connect();
        drop(port);
        transport.post(json!({})).unwrap();
        assert_eq!(transport.port_count(), 0);
    }
}
