//! Component C4: the connection table.
//!
//! A fixed-capacity array of slots, grounded in `ldap/servers/slapd/conntable.c`:
//! slot 0 is a dummy head for a doubly-linked "active" list threaded through
//! the other slots; a new fd is placed at `fd mod N`, linear-probed forward
//! on collision; each slot has its own lock plus the table carries one
//! table-wide lock for list-splice operations.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::conn::Connection;
use crate::error::{FrontendError, Result};

struct Slot {
    lock: Mutex<SlotState>,
}

#[derive(Default)]
pub struct SlotState {
    conn: Option<Connection>,
    /// Index into the table's slot array; `None` means "not linked".
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fixed-size connection table. Index 0 is the dummy active-list head and
/// is never handed out to a real connection.
pub struct ConnectionTable {
    slots: Vec<Slot>,
    list_lock: Mutex<()>,
    active_count: AtomicU64,
    max_active_seen: AtomicI64,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> ConnectionTable {
        let capacity = capacity.max(2);
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot { lock: Mutex::new(SlotState::default()) });
        }
        ConnectionTable {
            slots,
            list_lock: Mutex::new(()),
            active_count: AtomicU64::new(0),
            max_active_seen: AtomicI64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Find a free slot for `fd`: try `fd mod (N-1) + 1` (slot 0 is
    /// reserved), then linearly probe forward, wrapping but always
    /// skipping slot 0.
    fn find_free_slot(&self, fd: i32) -> Option<usize> {
        let n = self.slots.len();
        let usable = n - 1;
        let start = 1 + (fd.unsigned_abs() as usize % usable);
        for offset in 0..usable {
            let idx = 1 + (start - 1 + offset) % usable;
            let state = self.slots[idx].lock.lock().unwrap();
            if state.conn.is_none() {
                return Some(idx);
            }
        }
        None
    }

    /// Acquire a slot for a freshly-accepted connection, splice it onto the
    /// head of the active list, and return its slot index.
    pub fn acquire_slot(&self, fd: i32, conn: Connection) -> Result<usize> {
        let idx = self.find_free_slot(fd).ok_or(FrontendError::TableFull(self.slots.len()))?;
        {
            let mut state = self.slots[idx].lock.lock().unwrap();
            state.conn = Some(conn);
        }
        self.splice_in(idx);
        let active = self.active_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_active_seen.fetch_max(active as i64, Ordering::Relaxed);
        Ok(idx)
    }

    /// Remove the connection at `idx` from the active list and free its
    /// slot, returning the evicted `Connection` for final cleanup.
    pub fn release_slot(&self, idx: usize) -> Option<Connection> {
        if idx == 0 {
            return None;
        }
        self.splice_out(idx);
        let mut state = self.slots[idx].lock.lock().unwrap();
        let conn = state.conn.take();
        if let Some(conn) = conn.as_ref() {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            log::info!(
                "connid={} fd={} closed slot={} reason=B1",
                conn.connid,
                conn.fd,
                idx
            );
        }
        conn
    }

    fn splice_in(&self, idx: usize) {
        let _g = self.list_lock.lock().unwrap();
        let head_next = {
            let head = self.slots[0].lock.lock().unwrap();
            head.next
        };
        {
            let mut node = self.slots[idx].lock.lock().unwrap();
            node.prev = Some(0);
            node.next = head_next;
        }
        if let Some(next_idx) = head_next {
            let mut next = self.slots[next_idx].lock.lock().unwrap();
            next.prev = Some(idx);
        }
        let mut head = self.slots[0].lock.lock().unwrap();
        head.next = Some(idx);
    }

    fn splice_out(&self, idx: usize) {
        let _g = self.list_lock.lock().unwrap();
        let (prev, next) = {
            let node = self.slots[idx].lock.lock().unwrap();
            (node.prev, node.next)
        };
        if let Some(prev_idx) = prev {
            let mut p = self.slots[prev_idx].lock.lock().unwrap();
            p.next = next;
        }
        if let Some(next_idx) = next {
            let mut n = self.slots[next_idx].lock.lock().unwrap();
            n.prev = prev;
        }
        let mut node = self.slots[idx].lock.lock().unwrap();
        node.prev = None;
        node.next = None;
    }

    /// Lock and return a single slot, for operation dispatch.
    pub fn slot(&self, idx: usize) -> MutexGuard<'_, SlotState> {
        self.slots[idx].lock.lock().unwrap()
    }

    /// Walk the active list front-to-back, calling `f` with each slot's
    /// index while holding only that slot's lock. Used for shutdown sweeps
    /// and for `cn=monitor` connection listings.
    pub fn for_each_active(&self, mut f: impl FnMut(usize, &Connection)) {
        let mut next = {
            let head = self.slots[0].lock.lock().unwrap();
            head.next
        };
        while let Some(idx) = next {
            let state = self.slots[idx].lock.lock().unwrap();
            if let Some(conn) = state.conn.as_ref() {
                f(idx, conn);
            }
            next = state.next;
        }
    }
}

impl SlotState {
    pub fn conn(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    pub fn conn_mut(&mut self) -> Option<&mut Connection> {
        self.conn.as_mut()
    }
}
