use uuid::Uuid;

use craftcore_derive::WriteProtPacket;

use crate::protocol_types::compound::PlayerInfoAction;
use crate::protocol_types::primitives::{SizedVec, VarInt};
use crate::packet;

packet!(
    StatusRes 0x00 {
        json: String,
    }
);

packet!(
    PingRes 0x01 {
        payload: i64,
    }
);

packet!(
    LoginDisconnect 0x00 {
        reason: String,
    }
);

packet!(
    EncryptionReq 0x01 {
        server_id: String,
        public_key: SizedVec<u8>,
        verify_token: SizedVec<u8>,
    }
);

packet!(
    LoginSuccess 0x02 {
        uuid: Uuid,
        username: String,
    }
);

packet!(
    ChatMessage 0x0F {
        json: String,
        position: u8,
        sender: Uuid,
    }
);

packet!(
    PlayDisconnect 0x1A {
        reason: String,
    }
);

packet!(
    PlayKeepAlive 0x21 {
        id: i64,
    }
);

packet!(
    PlayerInfo 0x36 {
        action: PlayerInfoAction,
    }
);

packet!(
    PlayerPositionAndLook 0x38 {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        flags: u8,
        teleport_id: VarInt,
        dismount_vehicle: bool,
    }
);

/// Chat message positions.
pub(crate) const CHAT: u8 = 0;
pub(crate) const SYSTEM: u8 = 1;

#[derive(Debug, WriteProtPacket)]
pub(crate) enum ClientPackets {
    StatusRes(StatusRes),
    PingRes(PingRes),
    LoginDisconnect(LoginDisconnect),
    EncryptionReq(EncryptionReq),
    LoginSuccess(LoginSuccess),
    ChatMessage(ChatMessage),
    PlayDisconnect(PlayDisconnect),
    PlayKeepAlive(PlayKeepAlive),
    PlayerInfo(PlayerInfo),
    PlayerPositionAndLook(PlayerPositionAndLook),
}
