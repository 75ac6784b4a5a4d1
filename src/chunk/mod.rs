use std::sync::Mutex;

use indexmap::IndexSet;

use crate::entity::EntityId;
use crate::protocol_util::lock;

pub(crate) mod world;

/// Chunks along one edge of a region.
pub(crate) const REGION_EDGE: i32 = 32;
pub(crate) const REGION_SLOTS: usize = (REGION_EDGE * REGION_EDGE) as usize;

/// How much simulation a chunk is owed. Lower means more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum Ticket {
    EntityTicking = 31,
    Ticking = 32,
    Border = 33,
    Inaccessible = 34,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ChunkPos {
    pub(crate) x: i32,
    pub(crate) z: i32,
}

impl ChunkPos {
    pub(crate) fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the block column at `x`, `z`.
    pub(crate) fn containing(x: f64, z: f64) -> Self {
        Self::new((x.floor() as i32) >> 4, (z.floor() as i32) >> 4)
    }

    pub(crate) fn region(&self) -> RegionPos {
        RegionPos::new(
            self.x.div_euclid(REGION_EDGE),
            self.z.div_euclid(REGION_EDGE),
        )
    }

    /// Index of this chunk in its region's slot table.
    pub(crate) fn slot(&self) -> usize {
        (self.z.rem_euclid(REGION_EDGE) * REGION_EDGE + self.x.rem_euclid(REGION_EDGE)) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RegionPos {
    pub(crate) x: i32,
    pub(crate) z: i32,
}

impl RegionPos {
    pub(crate) fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

#[derive(Debug)]
struct ChunkState {
    ticket: Ticket,
    entities: IndexSet<EntityId>,
    unloaded: bool,
}

/// A loaded chunk. Membership holds entity ids, so a chunk lock never reaches for an entity.
#[derive(Debug)]
pub(crate) struct Chunk {
    pos: ChunkPos,
    state: Mutex<ChunkState>,
}

impl Chunk {
    pub(crate) fn new(pos: ChunkPos, ticket: Ticket) -> Self {
        Self {
            pos,
            state: Mutex::new(ChunkState {
                ticket,
                entities: IndexSet::new(),
                unloaded: false,
            }),
        }
    }

    pub(crate) fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub(crate) fn ticket(&self) -> Ticket {
        lock(&self.state).ticket
    }

    /// Lowers the ticket to `ticket` if that owes more work than the current one.
    pub(crate) fn raise_to(&self, ticket: Ticket) {
        let mut state = lock(&self.state);
        state.ticket = state.ticket.min(ticket);
    }

    /// Adds an entity. Fails if the chunk was unloaded in the meantime; the caller then
    /// retries against a freshly loaded chunk. An occupied chunk always ticks its entities.
    pub(crate) fn attach(&self, entity: EntityId) -> bool {
        let mut state = lock(&self.state);
        if state.unloaded {
            return false;
        }
        state.entities.insert(entity);
        state.ticket = Ticket::EntityTicking;
        true
    }

    /// Removes an entity. The last one out leaves the chunk inaccessible until it is unloaded
    /// or entered again.
    pub(crate) fn detach(&self, entity: EntityId) -> bool {
        let mut state = lock(&self.state);
        let removed = state.entities.shift_remove(&entity);
        if removed && state.entities.is_empty() {
            state.ticket = Ticket::Inaccessible;
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn entities(&self) -> Vec<EntityId> {
        lock(&self.state).entities.iter().copied().collect()
    }

    /// Marks the chunk unloaded if no entity is in it.
    fn try_unload(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.entities.is_empty() {
            return false;
        }
        state.unloaded = true;
        true
    }
}
