//! Shared membership state: per-address connection counts and per-form
//! member sets.
//!
//! Every operation takes the single table lock for the duration of the
//! mutation only; nothing here awaits, so the lock is never held across I/O.
//!
//! A peer is *registered* by admission (address count +1) and may then be a
//! member of at most one form. Joining a different form moves it. `leave`
//! is keyed by the registration, so the first call for a peer releases the
//! address count and later calls are no-ops.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::peer::{PeerHandle, PeerId};

/// Outcome of [`MembershipTable::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Added to the form.
    Joined,
    /// Already a member of this form; nothing changed.
    AlreadyMember,
    /// Moved from the named form into the requested one.
    Moved {
        /// Form the peer was removed from.
        from: String,
    },
    /// The peer is not registered (never admitted, or already evicted).
    NotRegistered,
}

/// Admission was refused because the address is at its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapReached;

#[derive(Debug)]
struct Registration {
    address: IpAddr,
    form: Option<String>,
}

#[derive(Default)]
struct Tables {
    by_address: HashMap<IpAddr, usize>,
    forms: HashMap<String, HashMap<PeerId, Arc<PeerHandle>>>,
    peers: HashMap<PeerId, Registration>,
}

impl Tables {
    fn remove_member(&mut self, form: &str, peer: PeerId) -> bool {
        let Some(members) = self.forms.get_mut(form) else {
            return false;
        };
        let removed = members.remove(&peer).is_some();
        if members.is_empty() {
            let _ = self.forms.remove(form);
        }
        removed
    }

    fn release_address(&mut self, address: IpAddr) {
        if let Some(count) = self.by_address.get_mut(&address) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                let _ = self.by_address.remove(&address);
            }
        }
    }
}

/// Membership table shared by all connection handlers.
#[derive(Default)]
pub struct MembershipTable {
    inner: Mutex<Tables>,
}

impl MembershipTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an admitted peer, incrementing its address count.
    ///
    /// With `cap` set, the check and the increment happen under one lock so
    /// concurrent admissions from one address cannot overshoot. Registering
    /// an already registered peer is a no-op.
    pub fn register(&self, peer: &PeerHandle, cap: Option<usize>) -> Result<(), CapReached> {
        let mut t = self.inner.lock();
        if t.peers.contains_key(&peer.id) {
            return Ok(());
        }
        let count = t.by_address.get(&peer.address).copied().unwrap_or(0);
        if cap.is_some_and(|cap| count >= cap) {
            return Err(CapReached);
        }
        let _ = t.by_address.insert(peer.address, count + 1);
        let _ = t.peers.insert(
            peer.id,
            Registration {
                address: peer.address,
                form: None,
            },
        );
        Ok(())
    }

    /// Add `peer` to `form`, creating the form if absent.
    pub fn join(&self, form: &str, peer: &Arc<PeerHandle>) -> JoinOutcome {
        let mut guard = self.inner.lock();
        let t = &mut *guard;
        let Some(registration) = t.peers.get_mut(&peer.id) else {
            return JoinOutcome::NotRegistered;
        };
        let previous = registration.form.replace(form.to_string());

        let members = t.forms.entry(form.to_string()).or_default();
        let inserted = members.insert(peer.id, Arc::clone(peer)).is_none();

        match previous {
            Some(prev) if prev == form => {
                if inserted {
                    JoinOutcome::Joined
                } else {
                    JoinOutcome::AlreadyMember
                }
            }
            Some(prev) => {
                let _ = t.remove_member(&prev, peer.id);
                JoinOutcome::Moved { from: prev }
            }
            None => JoinOutcome::Joined,
        }
    }

    /// Remove `peer` from its form and release its registration.
    ///
    /// `form` names a form the caller believes the peer is in; it is removed
    /// from that one too if it differs from the recorded form. Returns `true`
    /// if anything changed. Calling this for a peer that is not recorded is a
    /// no-op.
    pub fn leave(&self, peer: &PeerHandle, form: Option<&str>) -> bool {
        let mut t = self.inner.lock();
        let mut changed = false;
        if let Some(registration) = t.peers.remove(&peer.id) {
            t.release_address(registration.address);
            if let Some(recorded) = registration.form.as_deref() {
                let _ = t.remove_member(recorded, peer.id);
            }
            changed = true;
        }
        if let Some(form) = form {
            changed |= t.remove_member(form, peer.id);
        }
        changed
    }

    /// Snapshot of a form's members.
    pub fn members(&self, form: &str) -> Vec<Arc<PeerHandle>> {
        self.inner
            .lock()
            .forms
            .get(form)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `peer` is currently a member of `form`.
    pub fn is_member(&self, form: &str, peer: PeerId) -> bool {
        self.inner
            .lock()
            .forms
            .get(form)
            .is_some_and(|m| m.contains_key(&peer))
    }

    /// Member count per form.
    pub fn count_by_form(&self) -> BTreeMap<String, usize> {
        self.inner
            .lock()
            .forms
            .iter()
            .map(|(name, members)| (name.clone(), members.len()))
            .collect()
    }

    /// Total members across all forms.
    pub fn total_members(&self) -> usize {
        self.inner.lock().forms.values().map(HashMap::len).sum()
    }

    /// Registered connections from `address`.
    pub fn connections_from(&self, address: IpAddr) -> usize {
        self.inner.lock().by_address.get(&address).copied().unwrap_or(0)
    }

    /// Number of distinct addresses with at least one registered connection.
    pub fn address_count(&self) -> usize {
        self.inner.lock().by_address.len()
    }

    /// Number of registered peers.
    pub fn registered_peers(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Form `peer` is recorded in, if any.
    pub fn form_of(&self, peer: PeerId) -> Option<String> {
        self.inner.lock().peers.get(&peer).and_then(|r| r.form.clone())
    }
}
