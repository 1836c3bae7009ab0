use std::io;
use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::channel::oneshot;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::LinkConfig;
use crate::error::LinkError;
use crate::link::constants::{TOAST_CONNECTION_LOST, TOAST_CONNECT_FAILED, TOAST_NOT_CONNECTED, TOAST_UNAVAILABLE};
use crate::link::session::{Session, SessionId, SessionLost, WriteDone};
use crate::link::transport::{Acceptor, BoxedStream, Connection, Transport};
use crate::link::types::{ChannelKind, LinkEvent, Peer, SessionState};

type Reply = oneshot::Sender<Result<(), LinkError>>;

enum Command {
    Start(Reply),
    Connect { peer: Peer, kind: ChannelKind, reply: Reply },
    Send { bytes: Vec<u8>, reply: Reply },
    Stop(Reply),
}

// Results of background work, funnelled back into the manager task.
enum Notice {
    Accepted { kind: ChannelKind, connection: Connection },
    ConnectSucceeded { attempt: u64, peer: Peer, kind: ChannelKind, stream: BoxedStream },
    ConnectFailed { attempt: u64, peer: Peer, error: LinkError },
    Written { session: SessionId, bytes: Vec<u8>, result: io::Result<()>, reply: Reply },
}

struct ConnectAttempt {
    id: u64,
    cancel: CancellationToken,
}

struct ManagerTask {
    transport: Arc<dyn Transport>,
    link: LinkConfig,
    cancel: CancellationToken,
    events: UnboundedSender<LinkEvent>,
    notices: UnboundedSender<Notice>,
    lost: UnboundedSender<SessionLost>,

    state: SessionState,
    shared_state: Arc<Mutex<SessionState>>,

    session: Option<Session>,
    next_session: SessionId,
    listen_cancel: Option<CancellationToken>,
    connect_attempt: Option<ConnectAttempt>,
    next_attempt: u64,
}

impl ManagerTask {
    fn post(&self, event: LinkEvent) {
        if self.events.unbounded_send(event).is_err() {
            debug!("Nobody is listening for link events anymore");
        }
    }

    fn toast(&self, text: &str) {
        self.post(LinkEvent::Toast(text.to_string()));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }

        info!("Session state {} -> {}", self.state, state);
        self.state = state;
        *self.shared_state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        self.post(LinkEvent::StateChange(state));
    }

    async fn ensure_listening(&mut self) {
        if self.listen_cancel.is_some() {
            return;
        }

        let listen_cancel = self.cancel.child_token();
        for kind in ChannelKind::ALL {
            match self.transport.listen(kind).await {
                Ok(acceptor) => {
                    accept_task(kind, acceptor, listen_cancel.clone(), self.notices.clone());
                },
                Err(err) => warn!("Listening on {} channel failed: {}", kind, err),
            }
        }
        self.listen_cancel = Some(listen_cancel);
    }

    fn stop_listening(&mut self) {
        if let Some(listen_cancel) = self.listen_cancel.take() {
            listen_cancel.cancel();
        }
    }

    fn cancel_connect(&mut self) {
        if let Some(attempt) = self.connect_attempt.take() {
            debug!("Abandoning connect attempt {}", attempt.id);
            attempt.cancel.cancel();
        }
    }

    fn drop_session(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                session.cancel();
                true
            },
            None => false,
        }
    }

    async fn revert_to_listen(&mut self) {
        self.ensure_listening().await;
        self.set_state(SessionState::Listen);
    }

    async fn start(&mut self) -> Result<(), LinkError> {
        if !self.transport.is_available().await {
            self.toast(TOAST_UNAVAILABLE);
            return Err(LinkError::Unavailable);
        }

        self.cancel_connect();
        self.drop_session();
        self.revert_to_listen().await;
        Ok(())
    }

    async fn connect(&mut self, peer: Peer, kind: ChannelKind) {
        info!("Connecting to {} ({} channel)", peer, kind);
        self.cancel_connect();

        // never go from one connected session to another without passing through a teardown
        if self.drop_session() {
            self.revert_to_listen().await;
        }

        let id = self.next_attempt;
        self.next_attempt += 1;
        let cancel = self.cancel.child_token();
        connect_task(id, self.transport.clone(), peer, kind, cancel.clone(), self.notices.clone());

        self.connect_attempt = Some(ConnectAttempt { id, cancel });
        self.set_state(SessionState::Connecting);
    }

    fn connected(&mut self, connection: Connection, kind: ChannelKind) {
        info!("Connected to {}, Socket Type: {}", connection.peer, kind);
        self.cancel_connect();

        // last writer wins: the previous session is closed before the new one is installed
        if self.drop_session() {
            self.set_state(SessionState::Listen);
        }

        // only one device at a time
        self.stop_listening();

        let id = self.next_session;
        self.next_session += 1;

        self.post(LinkEvent::PeerName(connection.peer.name.clone()));
        self.set_state(SessionState::Connected);

        self.session = Some(Session::spawn(
            id,
            connection,
            self.link.read_buffer_size,
            self.cancel.child_token(),
            self.events.clone(),
            self.lost.clone(),
        ));
    }

    fn send(&self, bytes: Vec<u8>, reply: Reply) {
        let session = match &self.session {
            Some(session) if self.state == SessionState::Connected => session,
            _ => {
                self.toast(TOAST_NOT_CONNECTED);
                let _ = reply.send(Err(LinkError::NotConnected));
                return;
            },
        };

        if bytes.is_empty() {
            let _ = reply.send(Ok(()));
            return;
        }

        let done = session.write(bytes.clone());
        write_waiter(session.id(), bytes, done, reply, self.notices.clone());
    }

    async fn written(&mut self, session: SessionId, bytes: Vec<u8>, result: io::Result<()>) -> Result<(), LinkError> {
        let current = self.session.as_ref().map(|current| current.id()) == Some(session);

        match result {
            Ok(()) => {
                self.post(LinkEvent::Sent(bytes));
                Ok(())
            },
            Err(err) if current => {
                warn!("Write to the connected device failed: {}", err);
                self.drop_session();
                self.toast(TOAST_CONNECTION_LOST);
                self.revert_to_listen().await;
                Err(err.into())
            },
            Err(err) => {
                debug!("Write to closed session {} did not finish: {}", session, err);
                Err(LinkError::NotConnected)
            },
        }
    }

    fn stop(&mut self) {
        self.cancel_connect();
        self.drop_session();
        self.stop_listening();
        self.set_state(SessionState::None);
    }

    async fn handle_command(&mut self, command: Command) {
        // the caller may have stopped waiting, so replies are allowed to fail
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            },
            Command::Connect { peer, kind, reply } => {
                self.connect(peer, kind).await;
                let _ = reply.send(Ok(()));
            },
            // answered from handle_notice once the write is done
            Command::Send { bytes, reply } => self.send(bytes, reply),
            Command::Stop(reply) => {
                self.stop();
                let _ = reply.send(Ok(()));
            },
        }
    }

    async fn handle_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Accepted { kind, connection } => {
                if self.state == SessionState::None {
                    debug!("Closing connection from {} accepted after stop", connection.peer);
                    return;
                }
                self.connected(connection, kind);
            },
            Notice::ConnectSucceeded { attempt, peer, kind, stream } => {
                if self.connect_attempt.as_ref().map(|current| current.id) != Some(attempt) {
                    debug!("Closing stream of abandoned connect attempt {}", attempt);
                    return;
                }
                self.connect_attempt = None;
                self.connected(Connection { stream, peer }, kind);
            },
            Notice::ConnectFailed { attempt, peer, error } => {
                if self.connect_attempt.as_ref().map(|current| current.id) != Some(attempt) {
                    return;
                }
                self.connect_attempt = None;
                warn!("Connecting to {} failed: {}", peer, error);
                self.toast(TOAST_CONNECT_FAILED);
                self.revert_to_listen().await;
            },
            Notice::Written { session, bytes, result, reply } => {
                let result = self.written(session, bytes, result).await;
                let _ = reply.send(result);
            },
        }
    }

    async fn handle_lost(&mut self, lost: SessionLost) {
        if self.session.as_ref().map(|session| session.id()) != Some(lost.session) {
            debug!("Ignoring loss of replaced session {}", lost.session);
            return;
        }

        if let Some(session) = self.session.take() {
            warn!("Connection to {} was lost", session.peer());
            session.cancel();
        }
        self.toast(TOAST_CONNECTION_LOST);
        self.revert_to_listen().await;
    }
}

fn accept_task(
    kind: ChannelKind,
    mut acceptor: Box<dyn Acceptor>,
    cancel: CancellationToken,
    notices: UnboundedSender<Notice>,
) -> JoinHandle<()> {
    spawn(async move {
        info!("Listening on {} channel", kind);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                result = acceptor.accept() => match result {
                    Ok(connection) => {
                        info!("Accepted {} connection from {}", kind, connection.peer);
                        if notices.unbounded_send(Notice::Accepted { kind, connection }).is_err() {
                            break 'mainloop;
                        }
                    },
                    Err(err) => {
                        warn!("Accepting on {} channel failed: {}", kind, err);
                        break 'mainloop;
                    },
                },
            }
        }

        info!("Stopped listening on {} channel", kind);
    })
}

// Waits for a queued write off the manager task, so a peer that stops reading can not hold up
// stop() or any other transition.
fn write_waiter(
    session: SessionId,
    bytes: Vec<u8>,
    done: WriteDone,
    reply: Reply,
    notices: UnboundedSender<Notice>,
) -> JoinHandle<()> {
    spawn(async move {
        let result = done.await.unwrap_or_else(|_| {
            Err(io::Error::new(io::ErrorKind::NotConnected, "session closed before the write finished"))
        });
        let _ = notices.unbounded_send(Notice::Written { session, bytes, result, reply });
    })
}

fn connect_task(
    attempt: u64,
    transport: Arc<dyn Transport>,
    peer: Peer,
    kind: ChannelKind,
    cancel: CancellationToken,
    notices: UnboundedSender<Notice>,
) -> JoinHandle<()> {
    spawn(async move {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connect attempt {} cancelled", attempt);
                return;
            },
            result = transport.connect(&peer, kind) => result,
        };

        let notice = match result {
            Ok(stream) => Notice::ConnectSucceeded { attempt, peer, kind, stream },
            Err(error) => Notice::ConnectFailed { attempt, peer, error },
        };
        let _ = notices.unbounded_send(notice);
    })
}

/// Handle to the session manager task.
///
/// All transitions run on that one task, so a racing accept and a finished outbound connect
/// are applied one after the other. State changes, received and sent data, the peer name and
/// user notices all arrive on the event channel given to [`SessionManager::spawn`].
#[derive(Clone)]
pub struct SessionManager {
    commands: UnboundedSender<Command>,
    state: Arc<Mutex<SessionState>>,
}

impl SessionManager {
    pub fn spawn<T: Transport>(
        transport: T,
        link: LinkConfig,
        cancel: CancellationToken,
        events: UnboundedSender<LinkEvent>,
    ) -> (SessionManager, JoinHandle<()>) {
        let (command_sender, mut command_receiver) = unbounded::<Command>();
        let (notice_sender, mut notice_receiver) = unbounded::<Notice>();
        let (lost_sender, mut lost_receiver) = unbounded::<SessionLost>();
        let shared_state = Arc::new(Mutex::new(SessionState::None));

        let mut task = ManagerTask {
            transport: Arc::new(transport),
            link,
            cancel: cancel.clone(),
            events,
            notices: notice_sender,
            lost: lost_sender,
            state: SessionState::None,
            shared_state: shared_state.clone(),
            session: None,
            next_session: 0,
            listen_cancel: None,
            connect_attempt: None,
            next_attempt: 0,
        };

        let handle = spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    // commands before notices: an accept still queued behind stop() is dropped
                    biased;

                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    command = command_receiver.next() => match command {
                        Some(command) => task.handle_command(command).await,
                        // every handle is gone
                        None => break 'mainloop,
                    },
                    Some(notice) = notice_receiver.next() => task.handle_notice(notice).await,
                    Some(lost) = lost_receiver.next() => task.handle_lost(lost).await,
                }
            }

            task.stop();
            info!("Session manager stopped");
        });

        let manager = SessionManager {
            commands: command_sender,
            state: shared_state,
        };
        (manager, handle)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), LinkError> {
        let (reply, response) = oneshot::channel();
        self.commands.unbounded_send(command(reply)).map_err(|_| LinkError::ManagerStopped)?;
        response.await.map_err(|_| LinkError::ManagerStopped)?
    }

    /// Starts listening on both channels. Fails with [`LinkError::Unavailable`] when the radio
    /// can not be used.
    pub async fn start(&self) -> Result<(), LinkError> {
        self.request(Command::Start).await
    }

    /// Begins an outbound connection. Returns once the attempt is underway; the outcome
    /// arrives as events.
    pub async fn connect(&self, peer: Peer, kind: ChannelKind) -> Result<(), LinkError> {
        self.request(|reply| Command::Connect { peer, kind, reply }).await
    }

    /// Resolves once the bytes are written. A write still pending when the session goes away
    /// fails with [`LinkError::NotConnected`].
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), LinkError> {
        self.request(|reply| Command::Send { bytes, reply }).await
    }

    pub async fn stop(&self) -> Result<(), LinkError> {
        self.request(Command::Stop).await
    }
}
