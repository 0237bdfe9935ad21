//! Live-connection registry of a server
//!
//! Entries keep insertion order. Dead connections are never removed by the
//! I/O side; they are found when a send or broadcast touches them, marked by
//! index during the pass and compacted out in one step afterwards.

use crate::core::connection::Connection;
use crate::core::message::MessageKind;
use std::sync::Arc;

pub(crate) struct Registry<T: MessageKind> {
    entries: Vec<Arc<Connection<T>>>,
}

impl<T: MessageKind> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, connection: Arc<Connection<T>>) {
        self.entries.push(connection);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, id: u32) -> Option<Arc<Connection<T>>> {
        self.entries.iter().find(|c| c.id() == id).cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Connection<T>>> {
        self.entries.clone()
    }

    /// Remove the entry with `id`, returning it if it was registered
    pub(crate) fn remove(&mut self, id: u32) -> Option<Arc<Connection<T>>> {
        let index = self.entries.iter().position(|c| c.id() == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<Connection<T>>> {
        std::mem::take(&mut self.entries)
    }

    /// Call `visit` on every live entry, then drop the dead ones.
    ///
    /// Returns the removed connections in registry order. Each dead entry is
    /// removed exactly once.
    pub(crate) fn for_each_live(
        &mut self,
        mut visit: impl FnMut(&Arc<Connection<T>>),
    ) -> Vec<Arc<Connection<T>>> {
        let mut dead = Vec::new();
        for (index, connection) in self.entries.iter().enumerate() {
            if connection.is_connected() {
                visit(connection);
            } else {
                dead.push(index);
            }
        }
        self.compact(&dead)
    }

    /// Remove the entries at the given ascending indices
    fn compact(&mut self, dead: &[usize]) -> Vec<Arc<Connection<T>>> {
        if dead.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(dead.len());
        let mut next_dead = dead.iter().copied().peekable();
        let entries = std::mem::take(&mut self.entries);
        self.entries.reserve(entries.len() - dead.len());

        for (index, connection) in entries.into_iter().enumerate() {
            if next_dead.peek() == Some(&index) {
                next_dead.next();
                removed.push(connection);
            } else {
                self.entries.push(connection);
            }
        }
        removed
    }
}
