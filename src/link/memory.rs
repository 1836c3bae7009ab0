use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::debug;
use tokio::io::duplex;

use crate::error::LinkError;
use crate::link::transport::{Acceptor, BoxedStream, Connection, Transport};
use crate::link::types::{ChannelKind, Peer};

/**
 * Per-direction buffer (bytes) of an in-memory stream.
 */
const MEMORY_STREAM_BUFFER: usize = 64 * 1024;

type ListenKey = (String, ChannelKind);

struct Listening {
    id: u64,
    sender: UnboundedSender<Connection>,
}

struct RadioInner {
    powered: bool,
    next_listen_id: u64,
    listeners: HashMap<ListenKey, Listening>,
}

/// An in-process stand-in for the radio: every endpoint created from the same `MemoryRadio`
/// can reach the others by address.
#[derive(Clone)]
pub struct MemoryRadio {
    inner: Arc<Mutex<RadioInner>>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        MemoryRadio {
            inner: Arc::new(Mutex::new(RadioInner {
                powered: true,
                next_listen_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    pub fn endpoint(&self, address: impl Into<String>, name: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            radio: self.clone(),
            local: Peer::new(address, name),
        }
    }

    pub fn set_powered(&self, powered: bool) {
        self.lock().powered = powered;
    }

    fn lock(&self) -> MutexGuard<'_, RadioInner> {
        // the registry stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    radio: MemoryRadio,
    local: Peer,
}

impl MemoryTransport {
    pub fn local(&self) -> &Peer {
        &self.local
    }
}

pub struct MemoryAcceptor {
    radio: MemoryRadio,
    key: ListenKey,
    id: u64,
    receiver: UnboundedReceiver<Connection>,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    async fn accept(&mut self) -> Result<Connection, LinkError> {
        self.receiver.next().await.ok_or(LinkError::ListenerClosed)
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        let mut inner = self.radio.lock();
        // a newer listener may already have taken over this key
        if inner.listeners.get(&self.key).map(|listening| listening.id) == Some(self.id) {
            inner.listeners.remove(&self.key);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn is_available(&self) -> bool {
        self.radio.lock().powered
    }

    async fn listen(&self, kind: ChannelKind) -> Result<Box<dyn Acceptor>, LinkError> {
        let mut inner = self.radio.lock();
        if !inner.powered {
            return Err(LinkError::Unavailable);
        }

        let (sender, receiver) = unbounded();
        let id = inner.next_listen_id;
        inner.next_listen_id += 1;

        let key = (self.local.address.clone(), kind);
        inner.listeners.insert(key.clone(), Listening { id, sender });
        debug!("{} listening on {} channel", self.local, kind);

        Ok(Box::new(MemoryAcceptor {
            radio: self.radio.clone(),
            key,
            id,
            receiver,
        }))
    }

    async fn connect(&self, peer: &Peer, kind: ChannelKind) -> Result<BoxedStream, LinkError> {
        let inner = self.radio.lock();
        if !inner.powered {
            return Err(LinkError::Unavailable);
        }

        let unreachable = || LinkError::Unreachable { address: peer.address.clone() };
        let listening = inner.listeners.get(&(peer.address.clone(), kind)).ok_or_else(unreachable)?;

        let (local_end, remote_end) = duplex(MEMORY_STREAM_BUFFER);
        let incoming = Connection {
            stream: Box::new(remote_end),
            peer: self.local.clone(),
        };

        listening.sender.unbounded_send(incoming).map_err(|_| unreachable())?;
        debug!("{} connected to {} on {} channel", self.local, peer, kind);
        Ok(Box::new(local_end))
    }
}
