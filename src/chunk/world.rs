use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use crate::chunk::{Chunk, ChunkPos, RegionPos, Ticket, REGION_SLOTS};
use crate::entity::EntityId;
use crate::protocol_util::lock;

/// A fixed 32 by 32 grid of chunk slots.
pub(crate) struct Region {
    pos: RegionPos,
    slots: Mutex<Vec<Option<Arc<Chunk>>>>,
}

impl Region {
    fn new(pos: RegionPos) -> Self {
        Self {
            pos,
            slots: Mutex::new(vec![None; REGION_SLOTS]),
        }
    }

    pub(crate) fn pos(&self) -> RegionPos {
        self.pos
    }

    pub(crate) fn loaded_chunks(&self) -> usize {
        lock(&self.slots).iter().filter(|slot| slot.is_some()).count()
    }

    /// Classifies every loaded chunk by its ticket.
    pub(crate) fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        for chunk in lock(&self.slots).iter().flatten() {
            let ticket = chunk.ticket();
            if ticket <= Ticket::EntityTicking {
                summary.entity_ticking += 1;
            }
            if ticket <= Ticket::Ticking {
                summary.block_ticking += 1;
            }
            if ticket <= Ticket::Border {
                summary.border += 1;
            }
        }
        summary
    }
}

/// Chunks owed each kind of work in one region tick. A chunk owed entity ticking is also
/// owed block ticking and border bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TickSummary {
    pub(crate) entity_ticking: usize,
    pub(crate) block_ticking: usize,
    pub(crate) border: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnloadOutcome {
    Unloaded,
    Busy,
    Missing,
}

/// Lock order: region table, then a region's slots, then a chunk.
pub(crate) struct World {
    regions: Mutex<HashMap<RegionPos, Arc<Region>>>,
    next_entity: AtomicI32,
}

impl World {
    pub(crate) fn new() -> Self {
        Self {
            regions: Mutex::new(HashMap::new()),
            next_entity: AtomicI32::new(1),
        }
    }

    pub(crate) fn next_entity_id(&self) -> EntityId {
        self.next_entity.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn region(&self, pos: RegionPos) -> Option<Arc<Region>> {
        lock(&self.regions).get(&pos).cloned()
    }

    pub(crate) fn regions(&self) -> Vec<RegionPos> {
        lock(&self.regions).keys().copied().collect()
    }

    pub(crate) fn chunk(&self, pos: ChunkPos) -> Option<Arc<Chunk>> {
        let region = self.region(pos.region())?;
        let slots = lock(&region.slots);
        slots[pos.slot()].clone()
    }

    /// Returns the chunk at `pos`, loading it (and its region) if necessary.
    pub(crate) fn load_chunk(&self, pos: ChunkPos, ticket: Ticket) -> Arc<Chunk> {
        let mut regions = lock(&self.regions);
        let region = regions
            .entry(pos.region())
            .or_insert_with(|| {
                debug!("Loading region {:?}", pos.region());
                Arc::new(Region::new(pos.region()))
            })
            .clone();
        let mut slots = lock(&region.slots);
        drop(regions);
        let chunk = slots[pos.slot()].get_or_insert_with(|| Arc::new(Chunk::new(pos, ticket)));
        chunk.raise_to(ticket);
        chunk.clone()
    }

    /// Unloads the chunk at `pos` unless an entity is in it.
    #[cfg(test)]
    pub(crate) fn unload_chunk(&self, pos: ChunkPos) -> bool {
        let Some(region) = self.region(pos.region()) else {
            return false;
        };
        let mut slots = lock(&region.slots);
        unload_slot(&mut slots[pos.slot()])
    }

    /// Drops the region if, checked now, none of its chunks is loaded.
    pub(crate) fn unload_region(&self, pos: RegionPos) -> UnloadOutcome {
        let mut regions = lock(&self.regions);
        let Some(region) = regions.get(&pos) else {
            return UnloadOutcome::Missing;
        };
        if region.loaded_chunks() > 0 {
            return UnloadOutcome::Busy;
        }
        regions.remove(&pos);
        debug!("Unloaded region {pos:?}");
        UnloadOutcome::Unloaded
    }

    /// Unloads every chunk without entities and returns the regions left empty.
    pub(crate) fn sweep(&self) -> Vec<RegionPos> {
        let regions: Vec<Arc<Region>> = lock(&self.regions).values().cloned().collect();
        let mut empty = vec![];
        for region in regions {
            let mut slots = lock(&region.slots);
            for slot in slots.iter_mut() {
                unload_slot(slot);
            }
            if slots.iter().all(Option::is_none) {
                empty.push(region.pos());
            }
        }
        empty
    }
}

fn unload_slot(slot: &mut Option<Arc<Chunk>>) -> bool {
    if !slot.as_ref().is_some_and(|chunk| chunk.try_unload()) {
        return false;
    }
    if let Some(chunk) = slot.take() {
        trace!("Unloaded chunk {:?}", chunk.pos());
    }
    true
}
