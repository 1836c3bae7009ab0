use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::LinkError;
use crate::link::types::{ChannelKind, Peer};

/// A byte stream over the radio link. Dropping it closes the underlying socket, which unblocks
/// the remote side's pending read with EOF.
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkStream for T {}

pub type BoxedStream = Box<dyn LinkStream>;

/// A freshly established stream together with the peer on the other end.
pub struct Connection {
    pub stream: BoxedStream,
    pub peer: Peer,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// A listening endpoint for one channel kind. Dropping it stops listening.
#[async_trait]
pub trait Acceptor: Send {
    async fn accept(&mut self) -> Result<Connection, LinkError>;
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether the radio can be used at all.
    async fn is_available(&self) -> bool;

    async fn listen(&self, kind: ChannelKind) -> Result<Box<dyn Acceptor>, LinkError>;

    async fn connect(&self, peer: &Peer, kind: ChannelKind) -> Result<BoxedStream, LinkError>;
}
