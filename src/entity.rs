use std::sync::{Arc, Mutex};

use crate::chunk::world::World;
use crate::chunk::{ChunkPos, Ticket};
use crate::protocol_util::lock;

pub(crate) type EntityId = i32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Position {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) z: f64,
    pub(crate) yaw: f32,
    pub(crate) pitch: f32,
    pub(crate) on_ground: bool,
}

impl Position {
    pub(crate) fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: false,
        }
    }

    pub(crate) fn chunk(&self) -> ChunkPos {
        ChunkPos::containing(self.x, self.z)
    }
}

#[derive(Debug)]
struct EntityState {
    position: Position,
    chunk: Option<ChunkPos>,
}

/// A player entity. Its chunk key and the chunk's membership change together under the
/// entity lock; the entity lock is always taken before any world or chunk lock.
#[derive(Debug)]
pub(crate) struct Entity {
    id: EntityId,
    state: Mutex<EntityState>,
}

impl Entity {
    /// Creates an entity at `position` and enters it into its chunk.
    pub(crate) fn spawn(world: &World, position: Position) -> Arc<Entity> {
        let entity = Arc::new(Entity {
            id: world.next_entity_id(),
            state: Mutex::new(EntityState {
                position,
                chunk: None,
            }),
        });
        {
            let mut state = lock(&entity.state);
            let target = position.chunk();
            entity.enter(world, target);
            state.chunk = Some(target);
        }
        entity
    }

    pub(crate) fn id(&self) -> EntityId {
        self.id
    }

    pub(crate) fn position(&self) -> Position {
        lock(&self.state).position
    }

    #[cfg(test)]
    pub(crate) fn chunk(&self) -> Option<ChunkPos> {
        lock(&self.state).chunk
    }

    /// Moves the entity, changing chunks when it crosses a chunk border. The old chunk is
    /// released before the new one is locked.
    pub(crate) fn move_to(&self, world: &World, position: Position) {
        let mut state = lock(&self.state);
        state.position = position;
        let target = position.chunk();
        if state.chunk == Some(target) {
            return;
        }
        if let Some(old) = state.chunk.take() {
            if let Some(chunk) = world.chunk(old) {
                chunk.detach(self.id);
            }
        }
        self.enter(world, target);
        state.chunk = Some(target);
    }

    /// Edits the position in place, for packets that only carry part of it.
    pub(crate) fn update(&self, world: &World, f: impl FnOnce(&mut Position)) {
        let mut position = self.position();
        f(&mut position);
        self.move_to(world, position);
    }

    /// Leaves the current chunk for good.
    pub(crate) fn release(&self, world: &World) {
        let mut state = lock(&self.state);
        if let Some(old) = state.chunk.take() {
            if let Some(chunk) = world.chunk(old) {
                chunk.detach(self.id);
            }
        }
    }

    fn enter(&self, world: &World, target: ChunkPos) {
        // a chunk unloaded between lookup and attach is replaced by a fresh one
        while !world.load_chunk(target, Ticket::EntityTicking).attach(self.id) {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spawn_enters_chunk() {
        let world = World::new();
        let entity = Entity::spawn(&world, Position::new(8.0, 64.0, 8.0));
        assert_eq!(entity.chunk(), Some(ChunkPos::new(0, 0)));
        let chunk = world.chunk(ChunkPos::new(0, 0)).unwrap();
        assert_eq!(chunk.entities(), vec![entity.id()]);
        assert_eq!(chunk.ticket(), Ticket::EntityTicking);
    }

    #[test]
    fn crossing_a_border_moves_membership() {
        let world = World::new();
        let entity = Entity::spawn(&world, Position::new(15.0, 64.0, 0.0));
        entity.move_to(&world, Position::new(15.5, 64.0, 3.0));
        assert_eq!(entity.chunk(), Some(ChunkPos::new(0, 0)));

        entity.move_to(&world, Position::new(16.2, 64.0, -0.5));
        let target = ChunkPos::new(1, -1);
        assert_eq!(entity.chunk(), Some(target));
        let left = world.chunk(ChunkPos::new(0, 0)).unwrap();
        assert!(left.entities().is_empty());
        assert_eq!(left.ticket(), Ticket::Inaccessible);
        assert_eq!(world.chunk(target).unwrap().entities(), vec![entity.id()]);
        assert_eq!(entity.position().x, 16.2);
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let world = World::new();
        let entity = Entity::spawn(&world, Position::new(1.0, 2.0, 3.0));
        entity.update(&world, |p| {
            p.yaw = 90.0;
            p.on_ground = true;
        });
        let position = entity.position();
        assert_eq!((position.x, position.y, position.z), (1.0, 2.0, 3.0));
        assert_eq!(position.yaw, 90.0);
        assert!(position.on_ground);
    }

    #[test]
    fn release_leaves_chunk_unloadable() {
        let world = World::new();
        let entity = Entity::spawn(&world, Position::new(0.0, 0.0, 0.0));
        assert!(!world.unload_chunk(ChunkPos::new(0, 0)));
        entity.release(&world);
        assert_eq!(entity.chunk(), None);
        assert!(world.unload_chunk(ChunkPos::new(0, 0)));
    }

    #[test]
    fn entity_ids_are_unique() {
        let world = World::new();
        let a = Entity::spawn(&world, Position::new(0.0, 0.0, 0.0));
        let b = Entity::spawn(&world, Position::new(0.0, 0.0, 0.0));
        assert_ne!(a.id(), b.id());
        assert_eq!(world.chunk(ChunkPos::new(0, 0)).unwrap().entities().len(), 2);
    }
}
