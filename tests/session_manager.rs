use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::StreamExt;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use mazeball_link::config::types::LinkConfig;
use mazeball_link::error::LinkError;
use mazeball_link::link::constants::{TOAST_CONNECTION_LOST, TOAST_CONNECT_FAILED, TOAST_NOT_CONNECTED, TOAST_UNAVAILABLE};
use mazeball_link::link::memory::MemoryRadio;
use mazeball_link::link::transport::{Acceptor, BoxedStream, Connection, Transport};
use mazeball_link::link::types::{ChannelKind, LinkEvent, Peer, SessionState};
use mazeball_link::link::SessionManager;

const WAIT: Duration = Duration::from_secs(5);

struct Endpoint {
    manager: SessionManager,
    events: UnboundedReceiver<LinkEvent>,
    peer: Peer,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Endpoint {
    fn spawn<T: Transport>(transport: T, peer: Peer) -> Endpoint {
        let cancel = CancellationToken::new();
        let (event_sender, events) = unbounded();
        let (manager, handle) = SessionManager::spawn(transport, LinkConfig::default(), cancel.clone(), event_sender);

        Endpoint { manager, events, peer, cancel, handle }
    }

    fn on_radio(radio: &MemoryRadio, address: &str, name: &str) -> Endpoint {
        let transport = radio.endpoint(address, name);
        let peer = transport.local().clone();
        Self::spawn(transport, peer)
    }

    async fn next_event(&mut self) -> LinkEvent {
        timeout(WAIT, self.events.next())
            .await
            .expect("timed out waiting for a link event")
            .expect("link event channel closed")
    }

    /// Collects events up to and including `wanted`.
    async fn wait_for(&mut self, wanted: LinkEvent) -> Vec<LinkEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            seen.push(event.clone());
            if event == wanted {
                return seen;
            }
        }
    }

    async fn wait_for_state(&mut self, state: SessionState) -> Vec<LinkEvent> {
        self.wait_for(LinkEvent::StateChange(state)).await
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn states(events: &[LinkEvent]) -> Vec<SessionState> {
    events.iter().filter_map(|event| match event {
        LinkEvent::StateChange(state) => Some(*state),
        _ => None,
    }).collect()
}

async fn connected_pair(radio: &MemoryRadio) -> (Endpoint, Endpoint) {
    let mut tablet = Endpoint::on_radio(radio, "66:77:88:99:AA:BB", "tablet");
    let mut phone = Endpoint::on_radio(radio, "00:11:22:33:44:55", "phone");

    tablet.manager.start().await.unwrap();
    tablet.wait_for_state(SessionState::Listen).await;

    phone.manager.connect(tablet.peer.clone(), ChannelKind::Secure).await.unwrap();
    phone.wait_for_state(SessionState::Connected).await;
    tablet.wait_for_state(SessionState::Connected).await;

    (tablet, phone)
}

#[tokio::test]
async fn test_start_listens() {
    let radio = MemoryRadio::new();
    let mut tablet = Endpoint::on_radio(&radio, "66:77:88:99:AA:BB", "tablet");

    assert_eq!(tablet.manager.state(), SessionState::None);
    tablet.manager.start().await.unwrap();

    assert_eq!(tablet.manager.state(), SessionState::Listen);
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Listen));
}

#[tokio::test]
async fn test_start_without_bluetooth() {
    let radio = MemoryRadio::new();
    radio.set_powered(false);
    let mut tablet = Endpoint::on_radio(&radio, "66:77:88:99:AA:BB", "tablet");

    let result = tablet.manager.start().await;

    assert!(matches!(result, Err(LinkError::Unavailable)));
    assert_eq!(tablet.next_event().await, LinkEvent::Toast(TOAST_UNAVAILABLE.to_string()));
    assert_eq!(tablet.manager.state(), SessionState::None);
}

#[tokio::test]
async fn test_outbound_connection_passes_through_connecting() {
    let radio = MemoryRadio::new();
    let mut tablet = Endpoint::on_radio(&radio, "66:77:88:99:AA:BB", "tablet");
    let mut phone = Endpoint::on_radio(&radio, "00:11:22:33:44:55", "phone");

    tablet.manager.start().await.unwrap();
    phone.manager.connect(tablet.peer.clone(), ChannelKind::Insecure).await.unwrap();

    let phone_events = phone.wait_for_state(SessionState::Connected).await;
    assert_eq!(phone_events, vec![
        LinkEvent::StateChange(SessionState::Connecting),
        LinkEvent::PeerName("tablet".to_string()),
        LinkEvent::StateChange(SessionState::Connected),
    ]);

    let tablet_events = tablet.wait_for_state(SessionState::Connected).await;
    assert_eq!(tablet_events, vec![
        LinkEvent::StateChange(SessionState::Listen),
        LinkEvent::PeerName("phone".to_string()),
        LinkEvent::StateChange(SessionState::Connected),
    ]);
}

#[tokio::test]
async fn test_messages_flow_both_ways() {
    let radio = MemoryRadio::new();
    let (mut tablet, mut phone) = connected_pair(&radio).await;

    phone.manager.send(b"tilt 12.5 -3.0".to_vec()).await.unwrap();
    assert_eq!(phone.next_event().await, LinkEvent::Sent(b"tilt 12.5 -3.0".to_vec()));
    assert_eq!(tablet.next_event().await, LinkEvent::Received(b"tilt 12.5 -3.0".to_vec()));

    tablet.manager.send(b"goal".to_vec()).await.unwrap();
    assert_eq!(tablet.next_event().await, LinkEvent::Sent(b"goal".to_vec()));
    assert_eq!(phone.next_event().await, LinkEvent::Received(b"goal".to_vec()));
}

#[tokio::test]
async fn test_empty_message_is_not_sent() {
    let radio = MemoryRadio::new();
    let (mut tablet, mut phone) = connected_pair(&radio).await;

    phone.manager.send(Vec::new()).await.unwrap();
    phone.manager.send(b"x".to_vec()).await.unwrap();

    assert_eq!(phone.next_event().await, LinkEvent::Sent(b"x".to_vec()));
    assert_eq!(tablet.next_event().await, LinkEvent::Received(b"x".to_vec()));
}

#[tokio::test]
async fn test_send_while_not_connected() {
    let radio = MemoryRadio::new();
    let mut tablet = Endpoint::on_radio(&radio, "66:77:88:99:AA:BB", "tablet");

    let result = tablet.manager.send(b"hello".to_vec()).await;
    assert!(matches!(result, Err(LinkError::NotConnected)));
    assert_eq!(tablet.next_event().await, LinkEvent::Toast(TOAST_NOT_CONNECTED.to_string()));

    tablet.manager.start().await.unwrap();
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Listen));

    let result = tablet.manager.send(b"hello".to_vec()).await;
    assert!(matches!(result, Err(LinkError::NotConnected)));
    assert_eq!(tablet.next_event().await, LinkEvent::Toast(TOAST_NOT_CONNECTED.to_string()));
}

#[tokio::test]
async fn test_stop_from_connected_goes_to_none() {
    let radio = MemoryRadio::new();
    let (mut tablet, mut phone) = connected_pair(&radio).await;

    tablet.manager.stop().await.unwrap();
    assert_eq!(tablet.manager.state(), SessionState::None);
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::None));

    // the phone sees its stream close and goes back to listening
    let phone_events = phone.wait_for_state(SessionState::Listen).await;
    assert!(phone_events.contains(&LinkEvent::Toast(TOAST_CONNECTION_LOST.to_string())));
    assert_eq!(phone.manager.state(), SessionState::Listen);
}

#[tokio::test]
async fn test_failed_connect_reverts_to_listen() {
    let radio = MemoryRadio::new();
    let mut phone = Endpoint::on_radio(&radio, "00:11:22:33:44:55", "phone");

    phone.manager.connect(Peer::new("DE:AD:BE:EF:00:01", "nobody"), ChannelKind::Secure).await.unwrap();

    let events = phone.wait_for_state(SessionState::Listen).await;
    assert_eq!(events, vec![
        LinkEvent::StateChange(SessionState::Connecting),
        LinkEvent::Toast(TOAST_CONNECT_FAILED.to_string()),
        LinkEvent::StateChange(SessionState::Listen),
    ]);
    assert_eq!(phone.manager.state(), SessionState::Listen);
}

#[tokio::test]
async fn test_failed_connect_restarts_listening() {
    let radio = MemoryRadio::new();
    let mut phone = Endpoint::on_radio(&radio, "00:11:22:33:44:55", "phone");
    let mut tablet = Endpoint::on_radio(&radio, "66:77:88:99:AA:BB", "tablet");

    phone.manager.connect(Peer::new("DE:AD:BE:EF:00:01", "nobody"), ChannelKind::Secure).await.unwrap();
    phone.wait_for_state(SessionState::Listen).await;

    // after the failure the phone accepts inbound connections again
    tablet.manager.connect(phone.peer.clone(), ChannelKind::Secure).await.unwrap();
    tablet.wait_for_state(SessionState::Connected).await;
    phone.wait_for_state(SessionState::Connected).await;
}

#[tokio::test]
async fn test_connect_while_connected_tears_down_first() {
    let radio = MemoryRadio::new();
    let (mut tablet, mut phone) = connected_pair(&radio).await;

    let mut console = Endpoint::on_radio(&radio, "AA:AA:AA:AA:AA:AA", "console");
    console.manager.start().await.unwrap();
    console.wait_for_state(SessionState::Listen).await;

    phone.manager.connect(console.peer.clone(), ChannelKind::Secure).await.unwrap();
    let phone_events = phone.wait_for_state(SessionState::Connected).await;
    assert_eq!(states(&phone_events), vec![
        SessionState::Listen,
        SessionState::Connecting,
        SessionState::Connected,
    ]);
    assert!(phone_events.contains(&LinkEvent::PeerName("console".to_string())));

    // the tablet lost its session when the phone moved on
    let tablet_events = tablet.wait_for_state(SessionState::Listen).await;
    assert!(tablet_events.contains(&LinkEvent::Toast(TOAST_CONNECTION_LOST.to_string())));
}

#[tokio::test]
async fn test_stop_then_start_again() {
    let radio = MemoryRadio::new();
    let mut tablet = Endpoint::on_radio(&radio, "66:77:88:99:AA:BB", "tablet");
    let mut phone = Endpoint::on_radio(&radio, "00:11:22:33:44:55", "phone");

    tablet.manager.start().await.unwrap();
    tablet.manager.stop().await.unwrap();
    tablet.manager.start().await.unwrap();
    assert_eq!(states(&tablet.wait_for_state(SessionState::Listen).await), vec![SessionState::Listen]);
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::None));
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Listen));

    phone.manager.connect(tablet.peer.clone(), ChannelKind::Secure).await.unwrap();
    tablet.wait_for_state(SessionState::Connected).await;
}

// Inbound connections and the outbound connect result are handed over by the test, so it
// decides when each one lands.
struct ScriptedTransport {
    incoming: Mutex<Option<UnboundedReceiver<Connection>>>,
    outgoing: Mutex<Option<oneshot::Receiver<BoxedStream>>>,
}

struct Script {
    incoming: UnboundedSender<Connection>,
    outgoing: Option<oneshot::Sender<BoxedStream>>,
}

fn scripted() -> (ScriptedTransport, Script) {
    let (incoming_sender, incoming) = unbounded();
    let (outgoing_sender, outgoing) = oneshot::channel();

    let transport = ScriptedTransport {
        incoming: Mutex::new(Some(incoming)),
        outgoing: Mutex::new(Some(outgoing)),
    };
    let script = Script {
        incoming: incoming_sender,
        outgoing: Some(outgoing_sender),
    };
    (transport, script)
}

fn inbound(stream: impl AsyncRead + AsyncWrite + Unpin + Send + 'static, name: &str) -> Connection {
    Connection { stream: Box::new(stream), peer: Peer::new("00:00:00:00:00:01", name) }
}

fn tablet_peer() -> Peer {
    Peer::new("66:77:88:99:AA:BB", "tablet")
}

// Only the first secure listener gets the scripted connections.
struct ScriptedAcceptor {
    incoming: Option<UnboundedReceiver<Connection>>,
}

#[async_trait]
impl Acceptor for ScriptedAcceptor {
    async fn accept(&mut self) -> Result<Connection, LinkError> {
        match &mut self.incoming {
            Some(incoming) => incoming.next().await.ok_or(LinkError::ListenerClosed),
            None => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn is_available(&self) -> bool {
        true
    }

    async fn listen(&self, kind: ChannelKind) -> Result<Box<dyn Acceptor>, LinkError> {
        let incoming = match kind {
            ChannelKind::Secure => self.incoming.lock().unwrap().take(),
            ChannelKind::Insecure => None,
        };
        Ok(Box::new(ScriptedAcceptor { incoming }))
    }

    async fn connect(&self, peer: &Peer, _kind: ChannelKind) -> Result<BoxedStream, LinkError> {
        let unreachable = || LinkError::Unreachable { address: peer.address.clone() };
        let outgoing = self.outgoing.lock().unwrap().take();

        match outgoing {
            Some(outgoing) => outgoing.await.map_err(|_| unreachable()),
            None => Err(unreachable()),
        }
    }
}

// Reads never complete and every write fails, like a link the peer has reset.
struct BrokenLink;

impl AsyncRead for BrokenLink {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenLink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

async fn assert_closed(remote: &mut tokio::io::DuplexStream) {
    let mut buf = [0u8; 8];
    let n = timeout(WAIT, remote.read(&mut buf)).await.expect("stream was not closed").unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_racing_accepts_keep_one_session() {
    let (transport, script) = scripted();
    let (first_local, mut first_remote) = duplex(1024);
    let (second_local, mut second_remote) = duplex(1024);
    script.incoming.unbounded_send(inbound(first_local, "first")).unwrap();
    script.incoming.unbounded_send(inbound(second_local, "second")).unwrap();

    let mut tablet = Endpoint::spawn(transport, tablet_peer());

    tablet.manager.start().await.unwrap();
    let events = tablet.wait_for(LinkEvent::PeerName("second".to_string())).await;
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Connected));

    // the first session is torn down, never replaced in place
    assert_eq!(events, vec![
        LinkEvent::StateChange(SessionState::Listen),
        LinkEvent::PeerName("first".to_string()),
        LinkEvent::StateChange(SessionState::Connected),
        LinkEvent::StateChange(SessionState::Listen),
        LinkEvent::PeerName("second".to_string()),
    ]);

    assert_closed(&mut first_remote).await;

    // the winner is live
    second_remote.write_all(b"ping").await.unwrap();
    assert_eq!(tablet.next_event().await, LinkEvent::Received(b"ping".to_vec()));

    tablet.manager.send(b"pong".to_vec()).await.unwrap();
    let mut buf = [0u8; 8];
    let n = timeout(WAIT, second_remote.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"pong");
}

#[tokio::test]
async fn test_accept_racing_connect_keeps_one_session() {
    let (transport, mut script) = scripted();
    let mut tablet = Endpoint::spawn(transport, tablet_peer());

    tablet.manager.start().await.unwrap();
    tablet.manager.connect(Peer::new("00:00:00:00:00:0A", "outbound"), ChannelKind::Secure).await.unwrap();
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Listen));
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Connecting));

    // both land before the manager runs again
    let (outbound_local, mut outbound_remote) = duplex(1024);
    let (inbound_local, mut inbound_remote) = duplex(1024);
    let outgoing = script.outgoing.take().unwrap();
    assert!(outgoing.send(Box::new(outbound_local)).is_ok());
    script.incoming.unbounded_send(inbound(inbound_local, "inbound")).unwrap();

    let mut events = tablet.wait_for(LinkEvent::PeerName("inbound".to_string())).await;
    events.push(tablet.next_event().await);

    // either the outbound session is installed first and then torn down for the inbound one,
    // or the inbound one wins and the outbound stream is dropped unused
    if events.contains(&LinkEvent::PeerName("outbound".to_string())) {
        assert_eq!(events, vec![
            LinkEvent::PeerName("outbound".to_string()),
            LinkEvent::StateChange(SessionState::Connected),
            LinkEvent::StateChange(SessionState::Listen),
            LinkEvent::PeerName("inbound".to_string()),
            LinkEvent::StateChange(SessionState::Connected),
        ]);
    } else {
        assert_eq!(events, vec![
            LinkEvent::PeerName("inbound".to_string()),
            LinkEvent::StateChange(SessionState::Connected),
        ]);
    }
    assert_eq!(tablet.manager.state(), SessionState::Connected);

    assert_closed(&mut outbound_remote).await;

    inbound_remote.write_all(b"ping").await.unwrap();
    assert_eq!(tablet.next_event().await, LinkEvent::Received(b"ping".to_vec()));
}

#[tokio::test]
async fn test_stop_cancels_blocked_write() {
    let (transport, script) = scripted();
    // the remote end never reads, so a large write fills the buffer and blocks
    let (local, _remote) = duplex(16);
    script.incoming.unbounded_send(inbound(local, "stuck")).unwrap();

    let mut tablet = Endpoint::spawn(transport, tablet_peer());
    tablet.manager.start().await.unwrap();
    tablet.wait_for_state(SessionState::Connected).await;

    let sender = tablet.manager.clone();
    let pending = tokio::spawn(async move { sender.send(vec![b'x'; 1024]).await });
    sleep(Duration::from_millis(100)).await;

    timeout(WAIT, tablet.manager.stop()).await.expect("stop() waited for the blocked write").unwrap();
    assert_eq!(tablet.manager.state(), SessionState::None);
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::None));

    let result = timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(LinkError::NotConnected)));
}

#[tokio::test]
async fn test_cancel_ends_manager_during_blocked_write() {
    let (transport, script) = scripted();
    let (local, _remote) = duplex(16);
    script.incoming.unbounded_send(inbound(local, "stuck")).unwrap();

    let mut tablet = Endpoint::spawn(transport, tablet_peer());
    tablet.manager.start().await.unwrap();
    tablet.wait_for_state(SessionState::Connected).await;

    let sender = tablet.manager.clone();
    let pending = tokio::spawn(async move { sender.send(vec![b'x'; 1024]).await });
    sleep(Duration::from_millis(100)).await;

    tablet.cancel.cancel();
    timeout(WAIT, &mut tablet.handle).await.expect("manager task kept running").unwrap();

    let result = timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_write_failure_reverts_to_listen() {
    let (transport, script) = scripted();
    script.incoming.unbounded_send(inbound(BrokenLink, "broken")).unwrap();

    let mut tablet = Endpoint::spawn(transport, tablet_peer());
    tablet.manager.start().await.unwrap();
    tablet.wait_for_state(SessionState::Connected).await;

    let result = tablet.manager.send(b"hello".to_vec()).await;
    assert!(matches!(result, Err(LinkError::Io { .. })));

    assert_eq!(tablet.next_event().await, LinkEvent::Toast(TOAST_CONNECTION_LOST.to_string()));
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Listen));
    assert_eq!(tablet.manager.state(), SessionState::Listen);
}

#[tokio::test]
async fn test_accept_after_stop_is_closed() {
    let (transport, script) = scripted();
    let mut tablet = Endpoint::spawn(transport, tablet_peer());

    tablet.manager.start().await.unwrap();
    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::Listen));

    // the connection is accepted while stop() is already queued
    let (local, mut remote) = duplex(1024);
    script.incoming.unbounded_send(inbound(local, "late")).unwrap();
    timeout(WAIT, tablet.manager.stop()).await.unwrap().unwrap();

    assert_eq!(tablet.next_event().await, LinkEvent::StateChange(SessionState::None));
    assert_closed(&mut remote).await;

    assert_eq!(tablet.manager.state(), SessionState::None);
    assert!(tablet.events.try_next().is_err(), "no session may start after stop()");
}
