use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::{trace, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::auth::Profile;
use crate::chat::Translation;
use crate::crypto::{CipherPair, StreamCipher, VerifyToken};
use crate::entity::Entity;
use crate::err::ProtError;
use crate::packets::client::{self, ClientPackets};
use crate::protocol_util::{lock, now_millis};
use crate::registry::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ConnectionState {
    Handshake = 0,
    Status = 1,
    Login = 2,
    Play = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Status,
            2 => ConnectionState::Login,
            3 => ConnectionState::Play,
            _ => ConnectionState::Handshake,
        }
    }

    /// States only move forward: handshake to status or login, login to play.
    pub(crate) fn can_advance_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Handshake, ConnectionState::Status)
                | (ConnectionState::Handshake, ConnectionState::Login)
                | (ConnectionState::Login, ConnectionState::Play)
        )
    }
}

/// Messages for a connection's writer task, processed strictly in order.
pub(crate) enum Outbound {
    Packet(ClientPackets),
    /// Every byte written after this message goes through the cipher.
    EnableEncryption(StreamCipher),
    Close,
}

/// The part of a connection other workers may see: identity, liveness and the outbound queue.
pub(crate) struct ClientHandle {
    id: SessionId,
    address: SocketAddr,
    outbound: UnboundedSender<Outbound>,
    closing: AtomicBool,
    wake: Notify,
    state: AtomicU8,
    profile: OnceLock<Profile>,
    last_recv: AtomicI64,
    latency: AtomicI32,
    keep_alive: Mutex<Option<AbortHandle>>,
}

impl ClientHandle {
    pub(crate) fn new(id: SessionId, address: SocketAddr) -> (Self, UnboundedReceiver<Outbound>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            address,
            outbound,
            closing: AtomicBool::new(false),
            wake: Notify::new(),
            state: AtomicU8::new(ConnectionState::Handshake as u8),
            profile: OnceLock::new(),
            last_recv: AtomicI64::new(now_millis()),
            latency: AtomicI32::new(0),
            keep_alive: Mutex::new(None),
        };
        (handle, receiver)
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn address(&self) -> SocketAddr {
        self.address
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn profile(&self) -> Option<&Profile> {
        self.profile.get()
    }

    /// Name for log lines: the verified username once there is one, the address before.
    pub(crate) fn name(&self) -> String {
        match self.profile() {
            Some(profile) => profile.username.clone(),
            None => self.address.to_string(),
        }
    }

    /// Queues a packet for the writer. Never blocks; a closed writer drops the packet.
    pub(crate) fn send(&self, packet: ClientPackets) {
        if self.outbound.send(Outbound::Packet(packet)).is_err() {
            trace!("{}: writer gone, dropping packet", self.address);
        }
    }

    /// Requests a disconnect. Safe to call from any worker and any number of times; the
    /// connection's own task performs the teardown.
    pub(crate) fn disconnect(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close);
        }
        self.wake.notify_one();
    }

    /// Sends `reason` in the disconnect packet of the current state, then disconnects.
    pub(crate) fn disconnect_with(&self, reason: &Translation) {
        match reason.to_json() {
            Ok(json) => match self.state() {
                ConnectionState::Login => {
                    self.send(ClientPackets::LoginDisconnect(client::LoginDisconnect::new(json)))
                }
                ConnectionState::Play => {
                    self.send(ClientPackets::PlayDisconnect(client::PlayDisconnect::new(json)))
                }
                _ => {}
            },
            Err(e) => warn!("{}: {e}", self.address),
        }
        self.disconnect();
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Resolves once a disconnect was requested.
    pub(crate) async fn closed(&self) {
        while !self.is_closing() {
            self.wake.notified().await;
        }
    }

    pub(crate) fn last_recv(&self) -> i64 {
        self.last_recv.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, now: i64) {
        self.last_recv.store(now, Ordering::Release);
    }

    pub(crate) fn latency(&self) -> i32 {
        self.latency.load(Ordering::Acquire)
    }

    pub(crate) fn set_latency(&self, latency: i32) {
        self.latency.store(latency, Ordering::Release);
    }

    /// Installs the next keep-alive timer. A closing client gets none; the flag is read under
    /// the timer lock so a `disconnect` followed by `cancel_keep_alive` never leaves one behind.
    pub(crate) fn set_keep_alive(&self, timer: AbortHandle) {
        let mut slot = lock(&self.keep_alive);
        if self.is_closing() {
            timer.abort();
            return;
        }
        if let Some(previous) = slot.replace(timer) {
            previous.abort();
        }
    }

    pub(crate) fn cancel_keep_alive(&self) {
        if let Some(timer) = lock(&self.keep_alive).take() {
            timer.abort();
        }
    }
}

/// Per-connection state owned by the reader task.
pub(crate) struct Session {
    pub(crate) handle: Arc<ClientHandle>,
    pub(crate) protocol: i32,
    pub(crate) username: Option<String>,
    pub(crate) verify_token: Option<VerifyToken>,
    pub(crate) decrypter: Option<StreamCipher>,
    pub(crate) joined: bool,
    pub(crate) entity: Option<Arc<Entity>>,
    pub(crate) teleport_id: Option<i32>,
    pub(crate) locale: String,
    pub(crate) view_distance: u8,
}

impl Session {
    pub(crate) fn new(handle: Arc<ClientHandle>) -> Self {
        Self {
            handle,
            protocol: 0,
            username: None,
            verify_token: None,
            decrypter: None,
            joined: false,
            entity: None,
            teleport_id: None,
            locale: String::new(),
            view_distance: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub(crate) fn advance(&mut self, next: ConnectionState) -> Result<(), ProtError> {
        let current = self.state();
        if !current.can_advance_to(next) {
            return Err(ProtError::InvalidTransition(current, next));
        }
        self.handle.state.store(next as u8, Ordering::Release);
        Ok(())
    }

    pub(crate) fn send(&self, packet: ClientPackets) {
        self.handle.send(packet);
    }

    /// Installs both cipher directions at once: the encrypter goes to the writer in band, the
    /// decrypter stays with the reader.
    pub(crate) fn enable_encryption(&mut self, ciphers: CipherPair) {
        let CipherPair { encrypt, decrypt } = ciphers;
        if self
            .handle
            .outbound
            .send(Outbound::EnableEncryption(encrypt))
            .is_err()
        {
            trace!("{}: writer gone before encryption", self.handle.address);
        }
        self.decrypter = Some(decrypt);
    }

    /// Publishes the verified profile. Only the first call has an effect.
    pub(crate) fn set_profile(&self, profile: Profile) -> bool {
        self.handle.profile.set(profile).is_ok()
    }
}
