use async_trait::async_trait;
use bluer::rfcomm::{ConnectRequest, Profile, ProfileHandle, Role};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use log::{info, warn};

use crate::config::types::LinkConfig;
use crate::error::LinkError;
use crate::link::transport::{Acceptor, BoxedStream, Connection, Transport};
use crate::link::types::{ChannelKind, Peer};

/// RFCOMM over BlueZ. Each channel kind is registered as a profile under its service UUID, so
/// peers find it through SDP the same way the Android sample does.
pub struct RfcommTransport {
    session: Session,
    adapter: Adapter,
    link: LinkConfig,
}

impl RfcommTransport {
    pub async fn new(link: LinkConfig) -> Result<Self, LinkError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;

        info!("Using adapter {} ({})", adapter.name(), adapter.address().await?);
        Ok(RfcommTransport { session, adapter, link })
    }

    fn profile(&self, kind: ChannelKind, role: Role) -> Profile {
        Profile {
            uuid: self.link.service_uuid(kind),
            name: Some(self.link.service_name(kind).to_string()),
            role: Some(role),
            require_authentication: Some(kind.is_secure()),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        }
    }
}

async fn resolve_peer(adapter: &Adapter, address: Address) -> Peer {
    let name = match adapter.device(address) {
        Ok(device) => device.name().await.ok().flatten(),
        Err(err) => {
            warn!("Could not look up device {}: {}", address, err);
            None
        },
    };

    Peer::new(address.to_string(), name.unwrap_or_else(|| address.to_string()))
}

pub struct RfcommAcceptor {
    adapter: Adapter,
    handle: ProfileHandle,
}

#[async_trait]
impl Acceptor for RfcommAcceptor {
    async fn accept(&mut self) -> Result<Connection, LinkError> {
        let request: ConnectRequest = self.handle.next().await.ok_or(LinkError::ListenerClosed)?;
        let address = request.device();
        let stream = request.accept()?;
        let peer = resolve_peer(&self.adapter, address).await;

        Ok(Connection { stream: Box::new(stream), peer })
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn is_available(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn listen(&self, kind: ChannelKind) -> Result<Box<dyn Acceptor>, LinkError> {
        let handle = self.session.register_profile(self.profile(kind, Role::Server)).await?;
        info!("Registered {} service {}", kind, self.link.service_uuid(kind));

        Ok(Box::new(RfcommAcceptor {
            adapter: self.adapter.clone(),
            handle,
        }))
    }

    async fn connect(&self, peer: &Peer, kind: ChannelKind) -> Result<BoxedStream, LinkError> {
        let address: Address = peer.address.parse()
            .map_err(|_| LinkError::InvalidAddress { address: peer.address.clone() })?;
        let uuid = self.link.service_uuid(kind);

        let mut handle = self.session.register_profile(self.profile(kind, Role::Client)).await?;
        let device = self.adapter.device(address)?;

        // BlueZ hands the stream over through the registered profile once connect_profile
        // has found the service record on the peer.
        let connect = device.connect_profile(&uuid);
        tokio::pin!(connect);

        let early = tokio::select! {
            result = &mut connect => {
                result?;
                None
            },
            request = handle.next() => request,
        };

        let request = match early {
            Some(request) => request,
            None => handle.next().await.ok_or(LinkError::Unreachable { address: peer.address.clone() })?,
        };

        Ok(Box::new(request.accept()?))
    }
}
