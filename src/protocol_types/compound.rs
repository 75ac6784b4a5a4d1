use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use craftcore_derive::{SizedProt, WriteProt};

use crate::protocol_types::primitives::{SizedVec, VarInt};
use crate::protocol_types::traits::{ReadProt, SizedProt, WriteProt};

#[async_trait]
impl ReadProt for Uuid {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        let mut buf: u128 = 0;
        buf |= u64::read(stream).await? as u128;
        buf <<= 8 * 8;
        buf |= u64::read(stream).await? as u128;
        Ok(Uuid::from_u128(buf))
    }
}

#[async_trait]
impl WriteProt for Uuid {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        let buf = self.as_u128();
        let buf1 = (buf >> (8 * 8)) as u64;
        let buf2 = buf as u64;
        buf1.write(stream).await?;
        buf2.write(stream).await?;
        Ok(())
    }
}

impl SizedProt for Uuid {
    fn prot_size(&self) -> usize {
        16
    }
}

/// A signed profile property as it appears in the player list.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Property {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) signature: Option<String>,
}

#[async_trait]
impl WriteProt for Property {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        self.name.write(stream).await?;
        self.value.write(stream).await?;
        self.signature.is_some().write(stream).await?;
        self.signature.write(stream).await
    }
}

impl SizedProt for Property {
    fn prot_size(&self) -> usize {
        self.name.prot_size() + self.value.prot_size() + 1 + self.signature.prot_size()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlayerListEntry {
    pub(crate) uuid: Uuid,
    pub(crate) name: String,
    pub(crate) properties: SizedVec<Property>,
    pub(crate) game_mode: VarInt,
    pub(crate) ping: VarInt,
}

#[async_trait]
impl WriteProt for PlayerListEntry {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        self.uuid.write(stream).await?;
        self.name.write(stream).await?;
        self.properties.write(stream).await?;
        self.game_mode.write(stream).await?;
        self.ping.write(stream).await?;
        // no display name
        false.write(stream).await
    }
}

impl SizedProt for PlayerListEntry {
    fn prot_size(&self) -> usize {
        self.uuid.prot_size()
            + self.name.prot_size()
            + self.properties.prot_size()
            + self.game_mode.prot_size()
            + self.ping.prot_size()
            + 1
    }
}

#[derive(Debug, Clone, PartialEq, SizedProt, WriteProt)]
pub(crate) struct LatencyEntry {
    pub(crate) uuid: Uuid,
    pub(crate) ping: VarInt,
}

/// Body of the player info packet. The leading varint selects the action and is followed by
/// the entry count and the per-action entry layout.
#[derive(Debug, Clone)]
pub(crate) enum PlayerInfoAction {
    AddPlayer(SizedVec<PlayerListEntry>),
    UpdateLatency(SizedVec<LatencyEntry>),
    RemovePlayer(SizedVec<Uuid>),
}

impl PlayerInfoAction {
    fn action_id(&self) -> VarInt {
        match self {
            PlayerInfoAction::AddPlayer(_) => VarInt::from(0),
            PlayerInfoAction::UpdateLatency(_) => VarInt::from(2),
            PlayerInfoAction::RemovePlayer(_) => VarInt::from(4),
        }
    }
}

#[async_trait]
impl WriteProt for PlayerInfoAction {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        self.action_id().write(stream).await?;
        match self {
            PlayerInfoAction::AddPlayer(entries) => entries.write(stream).await,
            PlayerInfoAction::UpdateLatency(entries) => entries.write(stream).await,
            PlayerInfoAction::RemovePlayer(entries) => entries.write(stream).await,
        }
    }
}

impl SizedProt for PlayerInfoAction {
    fn prot_size(&self) -> usize {
        self.action_id().prot_size()
            + match self {
                PlayerInfoAction::AddPlayer(entries) => entries.prot_size(),
                PlayerInfoAction::UpdateLatency(entries) => entries.prot_size(),
                PlayerInfoAction::RemovePlayer(entries) => entries.prot_size(),
            }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn uuid_is_written_big_endian() -> Result<(), String> {
        let uuid = Uuid::from_u128(0x0102030405060708090a0b0c0d0e0f10);
        let mut buf = vec![];
        uuid.write(&mut buf).await?;
        assert_eq!(buf, (1u8..=16).collect::<Vec<u8>>());
        let mut slice = buf.as_slice();
        assert_eq!(Uuid::read(&mut slice).await?, uuid);
        Ok(())
    }

    #[tokio::test]
    async fn remove_player_layout() -> Result<(), String> {
        let action = PlayerInfoAction::RemovePlayer(vec![Uuid::nil()].into());
        let mut buf = vec![];
        action.write(&mut buf).await?;
        assert_eq!(buf.len(), action.prot_size());
        assert_eq!(&buf[..2], &[4, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn unsigned_property_omits_signature() -> Result<(), String> {
        let property = Property {
            name: "textures".into(),
            value: "abc".into(),
            signature: None,
        };
        let mut buf = vec![];
        property.write(&mut buf).await?;
        assert_eq!(buf.len(), property.prot_size());
        assert_eq!(*buf.last().unwrap(), 0);
        Ok(())
    }
}
