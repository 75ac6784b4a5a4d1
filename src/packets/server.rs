use log::{debug, info, warn};
use serde::Serialize;

use crate::auth::{compute_server_hash, Profile};
use crate::chat::{self, TextComponent, Translation};
use crate::connection::{ConnectionState, Session};
use crate::crypto::{new_verify_token, wire_order_secret, CipherPair};
use crate::entity::{Entity, Position};
use crate::err::ProtError;
use crate::jobs::Job;
use crate::packet;
use crate::packets::client::{self, ClientPackets};
use crate::packets::{PROTOCOL_VERSION, VERSION_NAME};
use crate::registry::JoinRefused;
use crate::protocol_types::primitives::{SizedVec, VarInt};
use crate::protocol_util::{name_uuid, now_millis, uuid_to_string};
use crate::Server;

/// Longest chat message a client may send.
const MAX_CHAT_LEN: usize = 256;
const STATUS_SAMPLE: usize = 12;
const SPAWN: (f64, f64, f64) = (0.5, 64.0, 0.5);

packet!(
    Handshake 0x00 {
        prot_version: VarInt,
        server_address: String,
        server_port: u16,
        next_state: VarInt,
    },
    handler |this, session, _server| {
        debug!(
            "{} connects to {}:{} with protocol {}",
            session.handle.address(),
            this.server_address,
            this.server_port,
            this.prot_version
        );
        session.protocol = this.prot_version.value;
        match this.next_state.value {
            1 => session.advance(ConnectionState::Status),
            2 => session.advance(ConnectionState::Login),
            _ => Err(ProtError::InvalidNextState(this.next_state)),
        }
    }
);

packet!(
    StatusReq 0x00 {},
    handler |_this, session, server| {
        let json = status_json(server)?;
        session.send(ClientPackets::StatusRes(client::StatusRes::new(json)));
        Ok(())
    }
);

packet!(
    PingReq 0x01 {
        payload: i64,
    },
    handler |this, session, _server| {
        session.send(ClientPackets::PingRes(client::PingRes::new(this.payload)));
        Ok(())
    }
);

packet!(
    LoginStart 0x00 {
        name: String,
    },
    handler |this, session, server| {
        info!("Player {} wants to login...", this.name);
        if session.protocol < PROTOCOL_VERSION {
            session
                .handle
                .disconnect_with(&Translation::new(chat::OUTDATED_CLIENT).with(VERSION_NAME));
            return Err(ProtError::OutdatedClient(session.protocol));
        }
        if session.protocol > PROTOCOL_VERSION {
            session
                .handle
                .disconnect_with(&Translation::new(chat::OUTDATED_SERVER).with(VERSION_NAME));
            return Err(ProtError::OutdatedServer(session.protocol));
        }
        if server.registry.online_count() >= server.config.max_players {
            session.handle.disconnect_with(&Translation::new(chat::SERVER_FULL));
            return Err(ProtError::Any(format!("server full, refused {}", this.name)));
        }
        session.username = Some(this.name.clone());
        let token = new_verify_token();
        session.verify_token = Some(token);
        let server_id = if server.config.online_mode { "" } else { "-" };
        session.send(ClientPackets::EncryptionReq(client::EncryptionReq::new(
            server_id.into(),
            server.keys.public_der().to_vec().into(),
            token.to_vec().into(),
        )));
        Ok(())
    }
);

packet!(
    EncryptionResponse 0x01 {
        shared_secret: SizedVec<u8>,
        verify_token: SizedVec<u8>,
    },
    handler |this, session, server| {
        // a token is good for one attempt, matched or not
        let issued = session.verify_token.take();
        let token = server.keys.decrypt(&this.verify_token.vec)?;
        if issued.map_or(true, |issued| issued[..] != token[..]) {
            return Err(ProtError::VerifyTokenMismatch);
        }
        let secret = wire_order_secret(&server.keys.decrypt(&this.shared_secret.vec)?)?;
        session.enable_encryption(CipherPair::new(&secret)?);
        debug!("Encryption enabled for {}", session.handle.address());

        let username = session
            .username
            .clone()
            .ok_or_else(|| ProtError::Any("encryption response before login start".into()))?;
        let profile = if server.config.online_mode {
            let hash = compute_server_hash(server.keys.public_der(), &secret);
            let profile = server.auth.has_joined(&username, &hash).await?;
            if profile.username != username {
                info!("{} is known to the session server as {}", username, profile.username);
            }
            profile
        } else {
            Profile {
                uuid: name_uuid(&format!("OfflinePlayer:{username}")),
                username,
                textures: None,
            }
        };
        complete_login(session, server, profile)
    }
);

packet!(
    LoginPluginResponse 0x02 {
        message_id: VarInt,
        successful: bool,
    },
    handler |this, _session, _server| {
        // no login plugin request is ever sent
        Err(ProtError::UnsolicitedPluginResponse(this.message_id))
    }
);

packet!(
    TeleportConfirm 0x00 {
        teleport_id: VarInt,
    },
    handler |this, session, _server| {
        let expected = session.teleport_id.take();
        if expected != Some(this.teleport_id.value) {
            return Err(ProtError::TeleportIdMismatch(
                VarInt::from(expected.unwrap_or(-1)),
                this.teleport_id,
            ));
        }
        Ok(())
    }
);

packet!(
    ChatMessage 0x03 {
        message: String,
    },
    handler |this, session, server| {
        if this.message.chars().count() > MAX_CHAT_LEN {
            return Err(ProtError::Malformed(format!(
                "chat message longer than {MAX_CHAT_LEN} characters"
            )));
        }
        let Some(profile) = session.handle.profile() else {
            return Err(ProtError::Any("chat before login".into()));
        };
        if this.message.starts_with('/') {
            info!("{} issued server command: {}", profile.username, this.message);
            return Ok(());
        }
        server.jobs.push(Job::BroadcastChatMessage {
            sender: profile.clone(),
            text: this.message.clone(),
        });
        Ok(())
    }
);

packet!(
    ClientSettings 0x05 {
        locale: String,
        view_distance: u8,
        chat_mode: VarInt,
        chat_colors: bool,
        displayed_skin_parts: u8,
        main_hand: VarInt,
        enable_text_filtering: bool,
        allow_server_listings: bool,
    },
    handler |this, session, _server| {
        session.locale = this.locale.clone();
        session.view_distance = this.view_distance;
        debug!(
            "{}: locale {}, view distance {}",
            session.handle.name(),
            session.locale,
            session.view_distance
        );
        Ok(())
    }
);

packet!(
    PluginMessage 0x0A {
        channel: String,
    },
    handler |this, session, _server| {
        debug!("{}: ignoring plugin message on {}", session.handle.name(), this.channel);
        Ok(())
    }
);

packet!(
    KeepAliveResponse 0x0F {
        id: i64,
    },
    handler |this, session, _server| {
        let now = now_millis();
        session.handle.touch(now);
        // the id is the send time of the ping
        let latency = (now - this.id).clamp(0, i32::MAX as i64) as i32;
        session.handle.set_latency(latency);
        Ok(())
    }
);

packet!(
    PlayerPosition 0x11 {
        x: f64,
        y: f64,
        z: f64,
        on_ground: bool,
    },
    handler |this, session, server| {
        if let Some(entity) = &session.entity {
            entity.update(&server.world, |p| {
                p.x = this.x;
                p.y = this.y;
                p.z = this.z;
                p.on_ground = this.on_ground;
            });
        }
        Ok(())
    }
);

packet!(
    PlayerPositionAndRotation 0x12 {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    handler |this, session, server| {
        if let Some(entity) = &session.entity {
            entity.move_to(
                &server.world,
                Position {
                    x: this.x,
                    y: this.y,
                    z: this.z,
                    yaw: this.yaw,
                    pitch: this.pitch,
                    on_ground: this.on_ground,
                },
            );
        }
        Ok(())
    }
);

packet!(
    PlayerRotation 0x13 {
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    handler |this, session, server| {
        if let Some(entity) = &session.entity {
            entity.update(&server.world, |p| {
                p.yaw = this.yaw;
                p.pitch = this.pitch;
                p.on_ground = this.on_ground;
            });
        }
        Ok(())
    }
);

packet!(
    PlayerMovement 0x14 {
        on_ground: bool,
    },
    handler |this, session, server| {
        if let Some(entity) = &session.entity {
            entity.update(&server.world, |p| p.on_ground = this.on_ground);
        }
        Ok(())
    }
);

/// Sends login success, enters play and runs the join sequence.
fn complete_login(session: &mut Session, server: &Server, profile: Profile) -> Result<(), ProtError> {
    session.send(ClientPackets::LoginSuccess(client::LoginSuccess::new(
        profile.uuid,
        profile.username.clone(),
    )));
    session.advance(ConnectionState::Play)?;

    let (x, y, z) = SPAWN;
    let entity = Entity::spawn(&server.world, Position::new(x, y, z));
    let spawn = entity.position();
    debug!("{} spawns as entity {}", profile.username, entity.id());
    session.entity = Some(entity);
    let username = profile.username.clone();
    if !session.set_profile(profile) {
        warn!("{}: profile was already set", session.handle.address());
    }
    match server
        .registry
        .join(session.handle.clone(), server.config.max_players)
    {
        Ok(()) => session.joined = true,
        Err(JoinRefused::Full) => {
            session.handle.disconnect_with(&Translation::new(chat::SERVER_FULL));
            return Err(ProtError::Any(format!("server full, refused {username}")));
        }
        Err(JoinRefused::AlreadyMember) => {
            warn!("{}: already a member", session.handle.address());
        }
    }

    let teleport_id = 1;
    session.teleport_id = Some(teleport_id);
    session.send(ClientPackets::PlayerPositionAndLook(
        client::PlayerPositionAndLook::new(
            spawn.x,
            spawn.y,
            spawn.z,
            spawn.yaw,
            spawn.pitch,
            0,
            VarInt::from(teleport_id),
            false,
        ),
    ));

    let id = session.handle.id();
    server.jobs.push(Job::PlayerJoined(id));
    session.handle.set_keep_alive(
        server
            .jobs
            .schedule(Job::KeepAlive(id), server.config.keep_alive_interval),
    );
    Ok(())
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    version: StatusVersion,
    players: StatusPlayers,
    description: TextComponent,
    #[serde(skip_serializing_if = "Option::is_none")]
    favicon: Option<&'a str>,
}

#[derive(Serialize)]
struct StatusVersion {
    name: &'static str,
    protocol: i32,
}

#[derive(Serialize)]
struct StatusPlayers {
    max: usize,
    online: usize,
    sample: Vec<SamplePlayer>,
}

#[derive(Serialize)]
struct SamplePlayer {
    name: String,
    id: String,
}

fn status_json(server: &Server) -> Result<String, ProtError> {
    let (online, sample) = server.registry.with_online(|online| {
        let sample = online
            .values()
            .filter_map(|member| member.profile())
            .take(STATUS_SAMPLE)
            .map(|profile| SamplePlayer {
                name: profile.username.clone(),
                id: uuid_to_string(&profile.uuid),
            })
            .collect();
        (online.len(), sample)
    });
    let response = StatusResponse {
        version: StatusVersion {
            name: VERSION_NAME,
            protocol: PROTOCOL_VERSION,
        },
        players: StatusPlayers {
            max: server.config.max_players,
            online,
            sample,
        },
        description: TextComponent {
            text: server.config.motd.clone(),
        },
        favicon: server.favicon.as_deref(),
    };
    serde_json::to_string(&response).map_err(|e| ProtError::Any(format!("{e}")))
}
