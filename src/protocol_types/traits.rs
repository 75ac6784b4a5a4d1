use crate::connection::Session;
use crate::err::ProtError;
use crate::Server;
use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

#[async_trait]
pub(crate) trait ServerPacket: SizedProt + ReadProt + Debug + Display + Sync + Send {
    fn id() -> u8
    where
        Self: Sized;

    async fn handle(&self, session: &mut Session, server: &Arc<Server>) -> Result<(), ProtError>;
}

pub(crate) trait ClientPacket: SizedProt + WriteProt + Debug + Display + Sync {
    fn id() -> u8
    where
        Self: Sized;
}

#[async_trait]
pub(crate) trait ReadProt {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized;
}

#[async_trait]
pub(crate) trait WriteProt {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String>;
}

/// Implemented by the clientbound packet enum: produces one complete, unencrypted frame.
#[async_trait]
pub(crate) trait WriteProtPacket {
    async fn encode(&self) -> Result<Vec<u8>, String>;
}

/// Implemented by the serverbound packet enum: routes to the variant's handler.
#[async_trait]
pub(crate) trait HandlePacket {
    async fn handle(&self, session: &mut Session, server: &Arc<Server>) -> Result<(), ProtError>;
}

pub(crate) trait SizedProt {
    fn prot_size(&self) -> usize;
}
