//! World store.
//!
//! Single owner of everything the client knows about the field: four
//! independently replaced collections plus the local user's position and
//! field size. Collections sit behind `Arc`s and are never mutated in
//! place; a change builds a new collection and swaps the pointer, so
//! readers holding a [`WorldSnapshot`] can tell exactly which collections
//! changed with `Arc::ptr_eq`.

use std::{collections::HashMap, sync::Arc};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use presence_shared::{
    math::{FieldSize, Position},
    model::{Actor, ActorId, Message, MessageId, Reaction, SpeakerPhone},
    net::OutboundFrame,
};

use crate::cull;

pub type Messages = HashMap<MessageId, Message>;
pub type Actors = HashMap<ActorId, Actor>;

bitflags! {
    /// Which parts of the store a mutation replaced.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Changed: u8 {
        const MESSAGES = 1 << 0;
        const REACTIONS = 1 << 1;
        const SPEAKER_PHONES = 1 << 2;
        const ACTORS = 1 << 3;
        const LOCAL = 1 << 4;
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorldStore {
    messages: Arc<Messages>,
    reactions: Arc<Vec<Reaction>>,
    speaker_phones: Arc<Vec<SpeakerPhone>>,
    actors: Arc<Actors>,
    local_position: Option<Position>,
    field_size: Option<FieldSize>,
}

impl WorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &Arc<Messages> {
        &self.messages
    }

    pub fn reactions(&self) -> &Arc<Vec<Reaction>> {
        &self.reactions
    }

    pub fn speaker_phones(&self) -> &Arc<Vec<SpeakerPhone>> {
        &self.speaker_phones
    }

    pub fn actors(&self) -> &Arc<Actors> {
        &self.actors
    }

    pub fn local_position(&self) -> Option<Position> {
        self.local_position
    }

    pub fn field_size(&self) -> Option<FieldSize> {
        self.field_size
    }

    pub fn replace_messages(&mut self, messages: Messages) {
        self.messages = Arc::new(messages);
    }

    pub fn replace_reactions(&mut self, reactions: Vec<Reaction>) {
        self.reactions = Arc::new(reactions);
    }

    pub fn replace_speaker_phones(&mut self, speaker_phones: Vec<SpeakerPhone>) {
        self.speaker_phones = Arc::new(speaker_phones);
    }

    pub fn replace_actors(&mut self, actors: Actors) {
        self.actors = Arc::new(actors);
    }

    pub fn set_local_position(&mut self, position: Position) {
        self.local_position = Some(position);
    }

    pub fn set_field_size(&mut self, size: FieldSize) {
        self.field_size = Some(size);
    }

    /// The frame that tells the server where we are, once both halves are known.
    pub fn last_known_frame(&self) -> Option<OutboundFrame> {
        match (self.local_position, self.field_size) {
            (Some(position), Some(size)) => Some(OutboundFrame::new(position, size)),
            _ => None,
        }
    }

    /// Drops messages and reactions with `expires_at <= now`. Collections
    /// with nothing expired are left untouched.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Changed {
        let mut changed = Changed::empty();
        if let Some(messages) = alive_messages(&self.messages, now) {
            self.replace_messages(messages);
            changed |= Changed::MESSAGES;
        }
        if let Some(reactions) = alive_reactions(&self.reactions, now) {
            self.replace_reactions(reactions);
            changed |= Changed::REACTIONS;
        }
        changed
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            messages: Arc::clone(&self.messages),
            reactions: Arc::clone(&self.reactions),
            speaker_phones: Arc::clone(&self.speaker_phones),
            actors: Arc::clone(&self.actors),
            displayed_actors: Arc::default(),
            local_position: self.local_position,
            field_size: self.field_size,
        }
    }
}

/// Messages still alive at `now`, or `None` when none expired.
pub(crate) fn alive_messages(messages: &Messages, now: DateTime<Utc>) -> Option<Messages> {
    if messages.values().all(|m| m.is_alive(now)) {
        return None;
    }
    Some(
        messages
            .iter()
            .filter(|(_, m)| m.is_alive(now))
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect(),
    )
}

/// Reactions still alive at `now`, or `None` when none expired.
pub(crate) fn alive_reactions(reactions: &[Reaction], now: DateTime<Utc>) -> Option<Vec<Reaction>> {
    if reactions.iter().all(|r| r.is_alive(now)) {
        return None;
    }
    Some(reactions.iter().filter(|r| r.is_alive(now)).cloned().collect())
}

/// Read-only view handed to renderers.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub messages: Arc<Messages>,
    pub reactions: Arc<Vec<Reaction>>,
    pub speaker_phones: Arc<Vec<SpeakerPhone>>,
    pub actors: Arc<Actors>,
    /// Eased on-screen positions of remote actors.
    pub displayed_actors: Arc<HashMap<ActorId, Position>>,
    pub local_position: Option<Position>,
    pub field_size: Option<FieldSize>,
}

impl WorldSnapshot {
    pub fn with_displayed_actors(mut self, displayed: Arc<HashMap<ActorId, Position>>) -> Self {
        self.displayed_actors = displayed;
        self
    }

    /// Collections that were replaced between `earlier` and `self`.
    pub fn changed_since(&self, earlier: &WorldSnapshot) -> Changed {
        let mut changed = Changed::empty();
        changed.set(
            Changed::MESSAGES,
            !Arc::ptr_eq(&self.messages, &earlier.messages),
        );
        changed.set(
            Changed::REACTIONS,
            !Arc::ptr_eq(&self.reactions, &earlier.reactions),
        );
        changed.set(
            Changed::SPEAKER_PHONES,
            !Arc::ptr_eq(&self.speaker_phones, &earlier.speaker_phones),
        );
        changed.set(Changed::ACTORS, !Arc::ptr_eq(&self.actors, &earlier.actors));
        changed.set(
            Changed::LOCAL,
            self.local_position != earlier.local_position || self.field_size != earlier.field_size,
        );
        changed
    }

    /// Where an actor is drawn: its eased position if tracked, else its target.
    pub fn actor_position(&self, actor: &Actor) -> Position {
        self.displayed_actors
            .get(&actor.id)
            .copied()
            .unwrap_or(actor.position)
    }

    fn viewport(&self) -> Option<(FieldSize, Position)> {
        Some((self.field_size?, self.local_position?))
    }

    pub fn visible_messages(&self) -> Vec<&Message> {
        match self.viewport() {
            Some((field, user)) => cull::visible(self.messages.values(), field, user).collect(),
            None => Vec::new(),
        }
    }

    pub fn visible_reactions(&self) -> Vec<&Reaction> {
        match self.viewport() {
            Some((field, user)) => cull::visible(self.reactions.iter(), field, user).collect(),
            None => Vec::new(),
        }
    }

    pub fn visible_speaker_phones(&self) -> Vec<&SpeakerPhone> {
        match self.viewport() {
            Some((field, user)) => {
                cull::visible(self.speaker_phones.iter(), field, user).collect()
            }
            None => Vec::new(),
        }
    }

    /// Actors whose drawn position falls inside the viewport.
    pub fn visible_actors(&self) -> Vec<&Actor> {
        match self.viewport() {
            Some((field, user)) => self
                .actors
                .values()
                .filter(|a| cull::is_visible(self.actor_position(a), field, user))
                .collect(),
            None => Vec::new(),
        }
    }
}
