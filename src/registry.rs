use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::connection::{ClientHandle, Outbound};
use crate::protocol_util::lock;

/// Generational slot key. A reused slot gets a new generation, so ids of finished
/// connections never resolve to a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SessionId {
    index: u32,
    generation: u32,
}

impl SessionId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

pub(crate) struct ClientEntry {
    pub(crate) handle: Arc<ClientHandle>,
    tearing_down: bool,
    task: Option<JoinHandle<()>>,
}

struct Slot {
    generation: u32,
    entry: Option<ClientEntry>,
}

#[derive(Default)]
struct ClientSlots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ClientSlots {
    fn entry(&self, id: SessionId) -> Option<&ClientEntry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: SessionId) -> Option<&mut ClientEntry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinRefused {
    AlreadyMember,
    Full,
}

/// Every connection the server knows about, plus the list of players that completed login.
///
/// Lock order: `clients` before `online`. Neither is held while awaiting.
#[derive(Default)]
pub(crate) struct Registry {
    clients: Mutex<ClientSlots>,
    online: Mutex<IndexMap<SessionId, Arc<ClientHandle>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Creates the handle of a freshly accepted connection in a free slot.
    pub(crate) fn register(
        &self,
        address: SocketAddr,
    ) -> (Arc<ClientHandle>, UnboundedReceiver<Outbound>) {
        let mut clients = lock(&self.clients);
        let index = match clients.free.pop() {
            Some(index) => index,
            None => {
                clients.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (clients.slots.len() - 1) as u32
            }
        };
        let slot = &mut clients.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let id = SessionId::new(index, slot.generation);
        let (handle, receiver) = ClientHandle::new(id, address);
        let handle = Arc::new(handle);
        slot.entry = Some(ClientEntry {
            handle: handle.clone(),
            tearing_down: false,
            task: None,
        });
        clients.len += 1;
        (handle, receiver)
    }

    /// Records the connection's worker so shutdown can wait for it. A connection that is
    /// already gone simply lets the task run detached.
    pub(crate) fn attach_task(&self, id: SessionId, task: JoinHandle<()>) {
        if let Some(entry) = lock(&self.clients).entry_mut(id) {
            entry.task = Some(task);
        }
    }

    pub(crate) fn get(&self, id: SessionId) -> Option<Arc<ClientHandle>> {
        lock(&self.clients).entry(id).map(|e| e.handle.clone())
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.clients).len
    }

    /// Marks the connection as tearing down. Returns `false` if it already was, or is gone, in
    /// which case the caller must not tear it down again.
    pub(crate) fn begin_teardown(&self, id: SessionId) -> bool {
        match lock(&self.clients).entry_mut(id) {
            Some(entry) if !entry.tearing_down => {
                entry.tearing_down = true;
                true
            }
            _ => false,
        }
    }

    /// Frees the connection's slot.
    pub(crate) fn remove(&self, id: SessionId) -> Option<Arc<ClientHandle>> {
        let mut clients = lock(&self.clients);
        let slot = clients
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let entry = slot.entry.take()?;
        clients.free.push(id.index);
        clients.len -= 1;
        Some(entry.handle)
    }

    /// Takes every connection's handle and worker out for shutdown. Slots stay occupied so
    /// the workers can still tear themselves down.
    pub(crate) fn drain_tasks(&self) -> Vec<(Arc<ClientHandle>, Option<JoinHandle<()>>)> {
        lock(&self.clients)
            .slots
            .iter_mut()
            .filter_map(|slot| slot.entry.as_mut())
            .map(|entry| (entry.handle.clone(), entry.task.take()))
            .collect()
    }

    /// Adds a player to the membership list unless it already is a member or `capacity`
    /// players are online. Both checks happen under the membership lock, so concurrent logins
    /// cannot overfill the server.
    pub(crate) fn join(
        &self,
        handle: Arc<ClientHandle>,
        capacity: usize,
    ) -> Result<(), JoinRefused> {
        let mut online = lock(&self.online);
        if online.contains_key(&handle.id()) {
            return Err(JoinRefused::AlreadyMember);
        }
        if online.len() >= capacity {
            return Err(JoinRefused::Full);
        }
        online.insert(handle.id(), handle);
        Ok(())
    }

    pub(crate) fn leave(&self, id: SessionId) -> Option<Arc<ClientHandle>> {
        lock(&self.online).shift_remove(&id)
    }

    pub(crate) fn is_online(&self, id: SessionId) -> bool {
        lock(&self.online).contains_key(&id)
    }

    pub(crate) fn online_count(&self) -> usize {
        lock(&self.online).len()
    }

    /// Runs `f` with the membership list locked for the whole call.
    pub(crate) fn with_online<R>(
        &self,
        f: impl FnOnce(&IndexMap<SessionId, Arc<ClientHandle>>) -> R,
    ) -> R {
        f(&lock(&self.online))
    }
}
