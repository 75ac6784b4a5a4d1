use std::sync::Arc;

use log::{info, warn};
use uuid::Uuid;

use crate::auth::Profile;
use crate::chat::{self, Translation};
use crate::chunk::world::UnloadOutcome;
use crate::chunk::RegionPos;
use crate::connection::ClientHandle;
use crate::jobs::JobOutcome;
use crate::packets::client::{self, ClientPackets};
use crate::protocol_types::compound::{LatencyEntry, PlayerInfoAction, PlayerListEntry};
use crate::protocol_types::primitives::VarInt;
use crate::registry::SessionId;
use crate::Server;

/// Silence after which a player is dropped.
const KEEP_ALIVE_TIMEOUT_MS: i64 = 30_000;

const SURVIVAL: i32 = 0;

pub(super) fn keep_alive(server: &Server, id: SessionId, now: i64) -> JobOutcome {
    let Some(client) = server.registry.get(id) else {
        return JobOutcome::Stale;
    };
    if client.is_closing() {
        return JobOutcome::Stale;
    }
    if now - client.last_recv() >= KEEP_ALIVE_TIMEOUT_MS {
        info!("{} timed out", client.name());
        client.disconnect_with(&Translation::new(chat::TIMEOUT));
        return JobOutcome::TimedOut;
    }
    client.send(ClientPackets::PlayKeepAlive(client::PlayKeepAlive::new(now)));
    JobOutcome::Pinged
}

pub(super) fn broadcast_chat(server: &Server, sender: &Profile, text: &str) -> JobOutcome {
    info!("<{}> {}", sender.username, text);
    let json = match Translation::new(chat::CHAT_TEXT)
        .with(sender.username.clone())
        .with(text)
        .to_json()
    {
        Ok(json) => json,
        Err(e) => {
            warn!("{e}");
            return JobOutcome::Done;
        }
    };
    server.registry.with_online(|online| {
        for member in online.values() {
            member.send(ClientPackets::ChatMessage(client::ChatMessage::new(
                json.clone(),
                client::CHAT,
                sender.uuid,
            )));
        }
    });
    JobOutcome::Done
}

pub(super) fn player_joined(server: &Server, id: SessionId) -> JobOutcome {
    let Some(joiner) = server.registry.get(id).filter(|_| server.registry.is_online(id)) else {
        return JobOutcome::Stale;
    };
    let Some(entry) = list_entry(&joiner) else {
        return JobOutcome::Stale;
    };
    info!("{} joined the game", entry.name);
    let Some(announcement) = announcement(chat::PLAYER_JOINED, &entry.name) else {
        return JobOutcome::Done;
    };
    server.registry.with_online(|online| {
        for member in online.values() {
            member.send(player_info(PlayerInfoAction::AddPlayer(vec![entry.clone()].into())));
            member.send(system_message(&announcement));
        }
        let others: Vec<PlayerListEntry> = online
            .values()
            .filter(|member| member.id() != id)
            .filter_map(list_entry)
            .collect();
        if !others.is_empty() {
            joiner.send(player_info(PlayerInfoAction::AddPlayer(others.into())));
        }
    });
    JobOutcome::Done
}

pub(super) fn player_left(server: &Server, uuid: Uuid, username: &str) -> JobOutcome {
    info!("{username} left the game");
    let Some(announcement) = announcement(chat::PLAYER_LEFT, username) else {
        return JobOutcome::Done;
    };
    server.registry.with_online(|online| {
        for member in online.values() {
            member.send(player_info(PlayerInfoAction::RemovePlayer(vec![uuid].into())));
            member.send(system_message(&announcement));
        }
    });
    JobOutcome::Done
}

pub(super) fn update_latencies(server: &Server) -> JobOutcome {
    server.registry.with_online(|online| {
        let entries: Vec<LatencyEntry> = online
            .values()
            .filter_map(|member| {
                member.profile().map(|profile| LatencyEntry {
                    uuid: profile.uuid,
                    ping: VarInt::from(member.latency()),
                })
            })
            .collect();
        if entries.is_empty() {
            return;
        }
        for member in online.values() {
            member.send(player_info(PlayerInfoAction::UpdateLatency(
                entries.clone().into(),
            )));
        }
    });
    JobOutcome::Done
}

pub(super) fn tick_region(server: &Server, region: RegionPos) -> JobOutcome {
    match server.world.region(region) {
        Some(region) => JobOutcome::Ticked(region.tick()),
        None => JobOutcome::Stale,
    }
}

pub(super) fn unload_region(server: &Server, region: RegionPos) -> JobOutcome {
    match server.world.unload_region(region) {
        UnloadOutcome::Unloaded => JobOutcome::Unloaded,
        UnloadOutcome::Busy => JobOutcome::Busy,
        UnloadOutcome::Missing => JobOutcome::Stale,
    }
}

fn list_entry(client: &Arc<ClientHandle>) -> Option<PlayerListEntry> {
    let profile = client.profile()?;
    Some(PlayerListEntry {
        uuid: profile.uuid,
        name: profile.username.clone(),
        properties: profile.properties().into(),
        game_mode: VarInt::from(SURVIVAL),
        ping: VarInt::from(client.latency()),
    })
}

fn announcement(key: &'static str, username: &str) -> Option<String> {
    Translation::new(key)
        .with(username)
        .color("yellow")
        .to_json()
        .map_err(|e| warn!("{e}"))
        .ok()
}

fn player_info(action: PlayerInfoAction) -> ClientPackets {
    ClientPackets::PlayerInfo(client::PlayerInfo::new(action))
}

fn system_message(json: &str) -> ClientPackets {
    ClientPackets::ChatMessage(client::ChatMessage::new(
        json.to_owned(),
        client::SYSTEM,
        Uuid::nil(),
    ))
}
