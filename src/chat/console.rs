use futures::channel::mpsc::unbounded;
use futures::StreamExt;
use log::warn;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::chat::transcript::Transcript;
use crate::config::types::LinkConfig;
use crate::error::{AppRunError, LinkError};
use crate::link::rfcomm::RfcommTransport;
use crate::link::types::{ChannelKind, Peer};
use crate::link::SessionManager;

#[cfg(feature = "probe")]
async fn probe_adapter() -> Result<(), LinkError> {
    if crate::link::probe::bluetooth_available().await? {
        Ok(())
    } else {
        Err(LinkError::Unavailable)
    }
}

#[cfg(not(feature = "probe"))]
async fn probe_adapter() -> Result<(), LinkError> {
    Ok(())
}

/// Chats over RFCOMM on the console: every stdin line is one message, the transcript goes to
/// stdout, and EOF stops the link. With a `target` an outbound connection is started right away.
pub async fn run_chat(link: LinkConfig, target: Option<(Peer, ChannelKind)>) -> Result<(), AppRunError> {
    probe_adapter().await?;
    let transport = RfcommTransport::new(link.clone()).await?;

    let cancel = CancellationToken::new();
    let (event_sender, mut events) = unbounded();
    let (manager, manager_handle) = SessionManager::spawn(transport, link, cancel.clone(), event_sender);

    let printer = spawn(async move {
        let mut transcript = Transcript::new();
        while let Some(event) = events.next().await {
            println!("{}", transcript.apply(&event));
        }
    });

    manager.start().await?;
    if let Some((peer, kind)) = target {
        manager.connect(peer, kind).await?;
    }

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match manager.send(line.into_bytes()).await {
            Ok(()) | Err(LinkError::NotConnected) => {},
            Err(err) => warn!("Sending failed: {}", err),
        }
    }

    manager.stop().await?;
    cancel.cancel();

    if let Err(err) = manager_handle.await {
        warn!("Session manager task failed: {:?}", err);
    }
    drop(manager);
    if let Err(err) = printer.await {
        warn!("Transcript task failed: {:?}", err);
    }
    Ok(())
}
