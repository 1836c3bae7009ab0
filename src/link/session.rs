use std::io;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::link::transport::{BoxedStream, Connection};
use crate::link::types::{LinkEvent, Peer};

/// Identifies one session over the lifetime of a manager, so that late notices from a session
/// that has already been replaced can be told apart.
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLost {
    pub session: SessionId,
}

/// Resolves once the bytes are written, or is cancelled when the session goes away first.
pub type WriteDone = oneshot::Receiver<io::Result<()>>;

struct WriteRequest {
    bytes: Vec<u8>,
    done: oneshot::Sender<io::Result<()>>,
}

/// One live connection: a read task that forwards everything it reads, and a write task that
/// drains queued writes. Both stop on cancel, which closes the stream.
pub struct Session {
    id: SessionId,
    peer: Peer,
    writes: UnboundedSender<WriteRequest>,
    cancel: CancellationToken,
}

impl Session {
    pub fn spawn(
        id: SessionId,
        connection: Connection,
        buffer_size: usize,
        cancel: CancellationToken,
        events: UnboundedSender<LinkEvent>,
        lost: UnboundedSender<SessionLost>,
    ) -> Session {
        let Connection { stream, peer } = connection;
        let (reader, writer) = split(stream);
        let (write_sender, write_receiver) = unbounded();

        read_task(id, peer.clone(), reader, buffer_size, cancel.clone(), events, lost);
        write_task(id, writer, cancel.clone(), write_receiver);

        Session {
            id,
            peer,
            writes: write_sender,
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Queues the bytes behind earlier writes. Does not wait for the transport.
    pub fn write(&self, bytes: Vec<u8>) -> WriteDone {
        let (done, receiver) = oneshot::channel();
        if self.writes.unbounded_send(WriteRequest { bytes, done }).is_err() {
            debug!("Write task of session {} is gone", self.id);
        }
        receiver
    }

    /// Stops both tasks. The stream is closed once they let go of their halves, which also
    /// abandons a write that is stuck on a peer that stopped reading.
    pub fn cancel(self) {
        debug!("Cancelling session {} with {}", self.id, self.peer);
        self.cancel.cancel();
    }
}

async fn write_bytes(writer: &mut WriteHalf<BoxedStream>, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

fn write_task(
    id: SessionId,
    mut writer: WriteHalf<BoxedStream>,
    cancel: CancellationToken,
    mut requests: UnboundedReceiver<WriteRequest>,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                request = requests.next() => match request {
                    Some(WriteRequest { bytes, done }) => {
                        let result = tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!("Session {}: abandoning write of {} bytes", id, bytes.len());
                                break 'mainloop;
                            },
                            result = write_bytes(&mut writer, &bytes) => result,
                        };

                        let failed = result.is_err();
                        let _ = done.send(result);
                        if failed {
                            break 'mainloop;
                        }
                    },
                    None => break 'mainloop,
                },
            }
        }
    })
}

fn read_task(
    id: SessionId,
    peer: Peer,
    mut reader: ReadHalf<BoxedStream>,
    buffer_size: usize,
    cancel: CancellationToken,
    events: UnboundedSender<LinkEvent>,
    lost: UnboundedSender<SessionLost>,
) -> JoinHandle<()> {
    spawn(async move {
        let mut buf = vec![0u8; buffer_size.max(1)];

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session {} cancelled", id);
                    break 'mainloop;
                },
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        info!("Session {}: {} closed the stream", id, peer);
                        break 'mainloop;
                    },
                    Ok(n) => {
                        if events.unbounded_send(LinkEvent::Received(buf[..n].to_vec())).is_err() {
                            debug!("Nobody is listening for link events anymore");
                        }
                    },
                    Err(err) => {
                        warn!("Session {}: read from {} failed: {}", id, peer, err);
                        break 'mainloop;
                    },
                },
            }
        }

        // the manager ignores this for sessions it has already replaced
        let _ = lost.unbounded_send(SessionLost { session: id });
    })
}
