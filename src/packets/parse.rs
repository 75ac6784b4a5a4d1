use craftcore_derive::HandlePacket;

use crate::connection::ConnectionState;
use crate::err::ProtError;
use crate::packets::frame::Frame;
use crate::packets::server;
use crate::protocol_types::traits::ReadProt;

/// Every packet a client may send, across all states.
#[derive(Debug, HandlePacket)]
pub(crate) enum ServerPackets {
    Handshake(server::Handshake),
    StatusReq(server::StatusReq),
    PingReq(server::PingReq),
    LoginStart(server::LoginStart),
    EncryptionResponse(server::EncryptionResponse),
    LoginPluginResponse(server::LoginPluginResponse),
    TeleportConfirm(server::TeleportConfirm),
    ChatMessage(server::ChatMessage),
    ClientSettings(server::ClientSettings),
    PluginMessage(server::PluginMessage),
    KeepAliveResponse(server::KeepAliveResponse),
    PlayerPosition(server::PlayerPosition),
    PlayerPositionAndRotation(server::PlayerPositionAndRotation),
    PlayerRotation(server::PlayerRotation),
    PlayerMovement(server::PlayerMovement),
}

/// Decodes a frame's payload according to the connection state. Unknown `(state, id)`
/// pairs are refused.
pub(crate) async fn parse_packet(
    state: ConnectionState,
    frame: &Frame,
) -> Result<ServerPackets, ProtError> {
    let mut payload: &[u8] = &frame.payload;
    let read_from = &mut payload;
    let packet = match (frame.id.value, state) {
        (0x00, ConnectionState::Handshake) => {
            ServerPackets::Handshake(server::Handshake::read(read_from).await?)
        }

        (0x00, ConnectionState::Status) => {
            ServerPackets::StatusReq(server::StatusReq::read(read_from).await?)
        }
        (0x01, ConnectionState::Status) => {
            ServerPackets::PingReq(server::PingReq::read(read_from).await?)
        }

        (0x00, ConnectionState::Login) => {
            ServerPackets::LoginStart(server::LoginStart::read(read_from).await?)
        }
        (0x01, ConnectionState::Login) => {
            ServerPackets::EncryptionResponse(server::EncryptionResponse::read(read_from).await?)
        }
        (0x02, ConnectionState::Login) => {
            ServerPackets::LoginPluginResponse(server::LoginPluginResponse::read(read_from).await?)
        }

        (0x00, ConnectionState::Play) => {
            ServerPackets::TeleportConfirm(server::TeleportConfirm::read(read_from).await?)
        }
        (0x03, ConnectionState::Play) => {
            ServerPackets::ChatMessage(server::ChatMessage::read(read_from).await?)
        }
        (0x05, ConnectionState::Play) => {
            ServerPackets::ClientSettings(server::ClientSettings::read(read_from).await?)
        }
        (0x0A, ConnectionState::Play) => {
            ServerPackets::PluginMessage(server::PluginMessage::read(read_from).await?)
        }
        (0x0F, ConnectionState::Play) => {
            ServerPackets::KeepAliveResponse(server::KeepAliveResponse::read(read_from).await?)
        }
        (0x11, ConnectionState::Play) => {
            ServerPackets::PlayerPosition(server::PlayerPosition::read(read_from).await?)
        }
        (0x12, ConnectionState::Play) => ServerPackets::PlayerPositionAndRotation(
            server::PlayerPositionAndRotation::read(read_from).await?,
        ),
        (0x13, ConnectionState::Play) => {
            ServerPackets::PlayerRotation(server::PlayerRotation::read(read_from).await?)
        }
        (0x14, ConnectionState::Play) => {
            ServerPackets::PlayerMovement(server::PlayerMovement::read(read_from).await?)
        }
        _ => return Err(ProtError::UnknownPacket(state, frame.id)),
    };
    Ok(packet)
}
