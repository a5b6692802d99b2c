//! Component C10: persistent search (spec §4.10), grounded in
//! `ldap/servers/slapd/psearch.c`. A `PersistentSearch` request control
//! keeps a search operation open; matching database changes are pushed to
//! it as `SearchResultEntry` PDUs carrying an `EntryChangeNotification`
//! response control, until the client abandons the operation or the
//! connection closes.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{FrontendError, Result};

/// `changeType` bitmask values (RFC: draft persistent search), decoded
/// from the request control's INTEGER. A plain OR-able set of consts
/// rather than a typed `bitflags!` struct, since this crate doesn't
/// otherwise depend on the `bitflags` crate.
pub mod change_type {
    pub const ADD: i32 = 1;
    pub const DELETE: i32 = 2;
    pub const MODIFY: i32 = 4;
    pub const MODDN: i32 = 8;
    pub const ALL: i32 = ADD | DELETE | MODIFY | MODDN;
}

/// One pending notification queued for a subscriber.
#[derive(Clone, Debug)]
pub struct ChangeNotification {
    pub change_type: i32,
    pub target_dn: String,
    pub change_number: Option<u64>,
    pub previous_dn: Option<String>,
}

struct Subscription {
    queue: Mutex<VecDeque<ChangeNotification>>,
    cv: Condvar,
    shutdown: Mutex<bool>,
    base_dn: String,
    scope: crate::protocol::message::Scope,
    change_mask: i32,
}

/// A live subscription's handle: push changes into it, or shut it down.
pub struct Subscriber {
    inner: Arc<Subscription>,
    thread: Option<JoinHandle<()>>,
}

impl Subscriber {
    pub fn stop(&mut self) {
        *self.inner.shutdown.lock().unwrap() = true;
        self.inner.cv.notify_all();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Registry of all active persistent searches, so a write operation can
/// fan a change out to every interested subscriber without the backend
/// needing to know about connections at all.
#[derive(Default)]
pub struct PersistentSearchRegistry {
    subs: Mutex<Vec<Arc<Subscription>>>,
}

impl PersistentSearchRegistry {
    pub fn new() -> PersistentSearchRegistry {
        PersistentSearchRegistry { subs: Mutex::new(Vec::new()) }
    }

    /// Register a new subscription and spawn its dedicated thread, which
    /// calls `deliver` for every notification until `stop()`'d. Per spec
    /// Open Question resolution (SPEC_FULL §3.3): if the thread cannot be
    /// spawned, no partial subscription is left registered and the caller
    /// gets an error to turn into `LDAP_OPERATIONS_ERROR`.
    pub fn subscribe<F>(
        &self,
        base_dn: String,
        scope: crate::protocol::message::Scope,
        change_mask: i32,
        deliver: F,
    ) -> Result<Subscriber>
    where
        F: Fn(ChangeNotification) + Send + 'static,
    {
        let inner = Arc::new(Subscription {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            shutdown: Mutex::new(false),
            base_dn,
            scope,
            change_mask,
        });
        let worker_inner = inner.clone();
        let thread = thread::Builder::new()
            .name("ldap-psearch".to_string())
            .spawn(move || subscriber_loop(worker_inner, deliver))
            .map_err(|e| FrontendError::Sasl(format!("failed to spawn persistent search thread: {e}")))?;

        self.subs.lock().unwrap().push(inner.clone());
        Ok(Subscriber { inner, thread: Some(thread) })
    }

    /// Fan a change out to every subscription whose base/scope/mask
    /// matches. Called by whatever write path (add/modify/delete/modrdn)
    /// observed the change; this registry never talks to a backend.
    pub fn notify(&self, change: ChangeNotification) {
        let subs = self.subs.lock().unwrap();
        for sub in subs.iter() {
            if sub.change_mask & change.change_type == 0 {
                continue;
            }
            if !dn_in_scope(&change.target_dn, &sub.base_dn, sub.scope) {
                continue;
            }
            let mut q = sub.queue.lock().unwrap();
            q.push_back(change.clone());
            sub.cv.notify_one();
        }
    }

    /// Drop subscriptions whose thread has already stopped (e.g. because
    /// the connection they belonged to was abandoned or closed).
    pub fn reap(&self) {
        self.subs.lock().unwrap().retain(|s| !*s.shutdown.lock().unwrap());
    }
}

fn subscriber_loop<F: Fn(ChangeNotification) + Send + 'static>(sub: Arc<Subscription>, deliver: F) {
    loop {
        let item = {
            let mut q = sub.queue.lock().unwrap();
            loop {
                if let Some(item) = q.pop_front() {
                    break Some(item);
                }
                if *sub.shutdown.lock().unwrap() {
                    return;
                }
                q = sub.cv.wait(q).unwrap();
            }
        };
        if let Some(item) = item {
            deliver(item);
        }
    }
}

fn dn_in_scope(dn: &str, base: &str, scope: crate::protocol::message::Scope) -> bool {
    use crate::protocol::message::Scope;
    let dn_norm = dn.to_ascii_lowercase();
    let base_norm = base.to_ascii_lowercase();
    match scope {
        Scope::Base => dn_norm == base_norm,
        Scope::OneLevel => dn_norm.strip_suffix(&format!(",{base_norm}")).map(|rdn| !rdn.contains(',')).unwrap_or(false),
        Scope::Subtree => dn_norm == base_norm || dn_norm.ends_with(&format!(",{base_norm}")),
    }
}
