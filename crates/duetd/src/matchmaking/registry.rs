//! Participant registry - identity and call status of every registered client.
//!
//! The registry owns every `Participant` for its lifetime. It enforces the
//! per-participant invariants (unique handle, unique display name, symmetric
//! pairing) but knows nothing about the waiting pool or notifications; those
//! are composed on top by `MatchState`.

use std::collections::HashMap;

use tracing::debug;

use duet_core::{ConnectionId, DisplayName, Participant, ParticipantView};

use super::commands::MatchError;

/// Registry entry; `seq` preserves registration order for roster snapshots.
#[derive(Debug)]
struct Entry {
    seq: u64,
    participant: Participant,
}

/// Storage for registered participants, keyed by connection handle.
#[derive(Debug)]
pub struct ParticipantRegistry {
    entries: HashMap<ConnectionId, Entry>,

    /// Index for display name -> handle, used for uniqueness checks.
    names: HashMap<DisplayName, ConnectionId>,

    max_participants: usize,
    next_seq: u64,
}

impl ParticipantRegistry {
    pub fn new(max_participants: usize) -> Self {
        Self {
            entries: HashMap::new(),
            names: HashMap::new(),
            max_participants,
            next_seq: 0,
        }
    }

    /// Admits a new participant as Available with no peer.
    ///
    /// # Errors
    /// - `MatchError::AlreadyRegistered` if this connection already registered
    /// - `MatchError::DuplicateName` if a live participant holds `name`
    /// - `MatchError::RegistryFull` if at capacity
    pub fn register(
        &mut self,
        id: ConnectionId,
        name: DisplayName,
    ) -> Result<&Participant, MatchError> {
        if self.entries.contains_key(&id) {
            return Err(MatchError::AlreadyRegistered(id));
        }
        if self.names.contains_key(&name) {
            return Err(MatchError::DuplicateName(name));
        }
        if self.entries.len() >= self.max_participants {
            return Err(MatchError::RegistryFull {
                max: self.max_participants,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.names.insert(name.clone(), id);
        let entry = self.entries.entry(id).or_insert(Entry {
            seq,
            participant: Participant::new(id, name),
        });
        Ok(&entry.participant)
    }

    /// Looks up a participant.
    ///
    /// # Errors
    /// - `MatchError::NotRegistered` if no participant is bound to `id`
    pub fn lookup(&self, id: &ConnectionId) -> Result<&Participant, MatchError> {
        self.get(id).ok_or(MatchError::NotRegistered(*id))
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Participant> {
        self.entries.get(id).map(|e| &e.participant)
    }

    /// Deletes a participant, returning it. Idempotent.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Participant> {
        let entry = self.entries.remove(id)?;
        self.names.remove(&entry.participant.name);
        debug!(connection = %id, name = %entry.participant.name, "Participant removed");
        Some(entry.participant)
    }

    /// Returns true if `id` is registered and Available.
    pub fn is_available(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some_and(Participant::is_available)
    }

    /// Pairs two Available participants, symmetrically.
    ///
    /// Both are validated before either is mutated, so a failure leaves
    /// the registry unchanged.
    ///
    /// # Errors
    /// - `MatchError::NotRegistered` if either handle is unknown
    /// - `MatchError::NotAvailable` if either is already in a call
    pub fn pair(&mut self, a: ConnectionId, b: ConnectionId) -> Result<(), MatchError> {
        for id in [a, b] {
            if !self.lookup(&id)?.is_available() {
                return Err(MatchError::NotAvailable(id));
            }
        }
        if a == b {
            return Err(MatchError::NotAvailable(a));
        }

        self.participant_mut(&a)?
            .begin_call(b)
            .map_err(|_| MatchError::NotAvailable(a))?;
        self.participant_mut(&b)?
            .begin_call(a)
            .map_err(|_| MatchError::NotAvailable(b))?;
        Ok(())
    }

    /// Sets a participant back to Available, returning its former peer.
    ///
    /// Returns `None` for unknown handles and for participants that were
    /// not in a call.
    pub fn release(&mut self, id: &ConnectionId) -> Option<ConnectionId> {
        self.entries
            .get_mut(id)
            .and_then(|e| e.participant.end_call())
    }

    /// Roster snapshot in registration order.
    pub fn roster(&self) -> Vec<ParticipantView> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);

        entries
            .into_iter()
            .map(|e| {
                let peer_name = e
                    .participant
                    .peer()
                    .and_then(|peer| self.get(&peer))
                    .map(|p| &p.name);
                ParticipantView::new(&e.participant, peer_name)
            })
            .collect()
    }

    /// Iterates over every participant, unordered.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.entries.values().map(|e| &e.participant)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn participant_mut(&mut self, id: &ConnectionId) -> Result<&mut Participant, MatchError> {
        self.entries
            .get_mut(id)
            .map(|e| &mut e.participant)
            .ok_or(MatchError::NotRegistered(*id))
    }
}
