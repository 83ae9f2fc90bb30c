//! Inbound event processing.
//!
//! Turns each pushed frame into store mutations. Every collection is
//! merged on its own; a frame is fully applied before the next one is
//! looked at. `now` is captured once per frame by the caller.
//!
//! Merge rules:
//! - messages: alive stored messages, then incoming upserted by id;
//! - reactions: alive stored reactions, then incoming appended;
//! - speaker phones: incoming appended, never expired;
//! - explorer actions: applied in order, later entries win.

use chrono::{DateTime, Utc};
use presence_shared::{
    config::SweepPolicy,
    model::{Reaction, SpeakerPhone},
    net::{decode_events, ExplorerAction, FieldEvents},
};
use tracing::{debug, warn};

use crate::store::{alive_messages, alive_reactions, Actors, Changed, Messages, WorldStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct InboundProcessor {
    sweep: SweepPolicy,
}

impl InboundProcessor {
    pub fn new(sweep: SweepPolicy) -> Self {
        Self { sweep }
    }

    /// Decodes and applies one text frame. A frame that fails to decode is
    /// dropped whole and the store is left as it was; `None` reports that.
    pub fn handle_text(
        &self,
        store: &mut WorldStore,
        text: &str,
        now: DateTime<Utc>,
    ) -> Option<Changed> {
        match decode_events(text) {
            Ok(events) => Some(self.apply(store, events, now)),
            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping undecodable frame");
                None
            }
        }
    }

    pub fn apply(&self, store: &mut WorldStore, events: FieldEvents, now: DateTime<Utc>) -> Changed {
        let sweep = self.sweep != SweepPolicy::Disabled;
        let mut changed = Changed::empty();

        let counts = (
            events.messages.len(),
            events.reactions.len(),
            events.speaker_phones.len(),
            events.explorer_actions.len(),
        );

        if let Some(messages) = merge_messages(store.messages(), events.messages, now, sweep) {
            store.replace_messages(messages);
            changed |= Changed::MESSAGES;
        }
        if let Some(reactions) = merge_reactions(store.reactions(), events.reactions, now, sweep) {
            store.replace_reactions(reactions);
            changed |= Changed::REACTIONS;
        }
        if let Some(phones) = append_speaker_phones(store.speaker_phones(), events.speaker_phones) {
            store.replace_speaker_phones(phones);
            changed |= Changed::SPEAKER_PHONES;
        }
        if let Some(actors) = apply_actions(store.actors(), events.explorer_actions) {
            store.replace_actors(actors);
            changed |= Changed::ACTORS;
        }

        debug!(
            messages = counts.0,
            reactions = counts.1,
            speaker_phones = counts.2,
            actions = counts.3,
            changed = ?changed,
            "Applied field frame"
        );
        changed
    }
}

fn merge_messages(
    current: &Messages,
    incoming: Vec<presence_shared::model::Message>,
    now: DateTime<Utc>,
    sweep: bool,
) -> Option<Messages> {
    let swept = if sweep { alive_messages(current, now) } else { None };
    if swept.is_none() && incoming.is_empty() {
        return None;
    }
    let mut next = swept.unwrap_or_else(|| current.clone());
    for message in incoming {
        next.insert(message.id.clone(), message);
    }
    Some(next)
}

fn merge_reactions(
    current: &[Reaction],
    incoming: Vec<Reaction>,
    now: DateTime<Utc>,
    sweep: bool,
) -> Option<Vec<Reaction>> {
    let swept = if sweep { alive_reactions(current, now) } else { None };
    if swept.is_none() && incoming.is_empty() {
        return None;
    }
    let mut next = swept.unwrap_or_else(|| current.to_vec());
    next.extend(incoming);
    Some(next)
}

fn append_speaker_phones(current: &[SpeakerPhone], incoming: Vec<SpeakerPhone>) -> Option<Vec<SpeakerPhone>> {
    if incoming.is_empty() {
        return None;
    }
    let mut next = Vec::with_capacity(current.len() + incoming.len());
    next.extend_from_slice(current);
    next.extend(incoming);
    Some(next)
}

/// Applies actor actions in order. `None` when no action had an effect.
fn apply_actions(current: &Actors, actions: Vec<ExplorerAction>) -> Option<Actors> {
    if actions.is_empty() {
        return None;
    }
    let mut next = current.clone();
    let mut changed = false;
    for action in actions {
        match action {
            ExplorerAction::Arrive { actor } => {
                next.insert(actor.id.clone(), actor);
                changed = true;
            }
            ExplorerAction::Move { actor } => match next.get_mut(&actor.id) {
                Some(existing) => {
                    existing.previous_position = Some(existing.position);
                    existing.position = actor.position;
                    existing.user_id = actor.user_id;
                    changed = true;
                }
                None => debug!(actor = %actor.id, "Move for unknown actor ignored"),
            },
            ExplorerAction::Leave { id } => {
                if next.remove(&id).is_some() {
                    changed = true;
                } else {
                    debug!(actor = %id, "Leave for unknown actor ignored");
                }
            }
        }
    }
    changed.then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use presence_shared::{
        math::Position,
        model::{Actor, ActorId, Message, MessageId, ReactionId, SpeakerPhoneId, UserId},
    };
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn actor(id: &str, x: f64, y: f64) -> Actor {
        Actor::new(ActorId::new(id), UserId::new(format!("user-{id}")), Position::new(x, y))
    }

    fn arrive(id: &str, x: f64, y: f64) -> ExplorerAction {
        ExplorerAction::Arrive { actor: actor(id, x, y) }
    }

    fn mv(id: &str, x: f64, y: f64) -> ExplorerAction {
        ExplorerAction::Move { actor: actor(id, x, y) }
    }

    fn leave(id: &str) -> ExplorerAction {
        ExplorerAction::Leave { id: ActorId::new(id) }
    }

    fn actions(list: Vec<ExplorerAction>) -> FieldEvents {
        FieldEvents {
            explorer_actions: list,
            ..FieldEvents::default()
        }
    }

    fn message(id: &str, content: &str, expires_in_ms: i64) -> Message {
        Message {
            id: MessageId::new(id),
            user_id: UserId::new("u1"),
            position: Position::new(1.0, 2.0),
            content: content.into(),
            created_at: t0(),
            updated_at: t0(),
            expires_at: t0() + Duration::milliseconds(expires_in_ms),
        }
    }

    fn reaction(id: &str, expires_in_ms: i64) -> Reaction {
        Reaction {
            id: ReactionId::new(id),
            user_id: UserId::new("u1"),
            position: Position::new(0.0, 0.0),
            kind: "pro".into(),
            created_at: t0(),
            expires_at: t0() + Duration::milliseconds(expires_in_ms),
        }
    }

    fn speaker_phone(id: &str) -> SpeakerPhone {
        SpeakerPhone {
            id: SpeakerPhoneId::new(id),
            position: Position::new(200.0, 200.0),
            receive_range: 100.0,
            name: "#gps/times".into(),
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[test]
    fn duplicate_arrive_in_one_frame_keeps_later() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(&mut store, actions(vec![arrive("a", 1.0, 1.0), arrive("a", 9.0, 9.0)]), t0());
        assert_eq!(store.actors().len(), 1);
        let a = &store.actors()[&ActorId::new("a")];
        assert_eq!(a.position, Position::new(9.0, 9.0));
        assert_eq!(a.previous_position, None);
    }

    #[test]
    fn move_records_previous_position() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(&mut store, actions(vec![arrive("a", 10.0, 10.0)]), t0());
        p.apply(&mut store, actions(vec![mv("a", 50.0, 50.0)]), t0());
        let a = &store.actors()[&ActorId::new("a")];
        assert_eq!(a.position, Position::new(50.0, 50.0));
        assert_eq!(a.previous_position, Some(Position::new(10.0, 10.0)));
    }

    #[test]
    fn move_for_unknown_actor_changes_nothing() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(&mut store, actions(vec![arrive("a", 10.0, 10.0)]), t0());
        let before = Arc::clone(store.actors());

        let changed = p.apply(&mut store, actions(vec![mv("ghost", 5.0, 5.0)]), t0());
        assert!(changed.is_empty());
        assert!(Arc::ptr_eq(&before, store.actors()));
        assert_eq!(*before, **store.actors());
    }

    #[test]
    fn leave_removes_exactly_one() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(
            &mut store,
            actions(vec![arrive("a", 1.0, 1.0), arrive("b", 2.0, 2.0), arrive("c", 3.0, 3.0)]),
            t0(),
        );
        let changed = p.apply(&mut store, actions(vec![leave("b"), leave("nobody")]), t0());
        assert_eq!(changed, Changed::ACTORS);
        let mut ids: Vec<_> = store.actors().keys().map(|id| id.as_str().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn actions_apply_in_order_within_a_frame() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(
            &mut store,
            actions(vec![arrive("a", 1.0, 1.0), mv("a", 4.0, 4.0), leave("a"), arrive("a", 7.0, 7.0)]),
            t0(),
        );
        let a = &store.actors()[&ActorId::new("a")];
        assert_eq!(a.position, Position::new(7.0, 7.0));
        assert_eq!(a.previous_position, None);
    }

    #[test]
    fn messages_union_alive_old_with_new_overriding() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(
            &mut store,
            FieldEvents {
                messages: vec![message("keep", "old", 10_000), message("gone", "old", 100), message("same", "v1", 10_000)],
                ..FieldEvents::default()
            },
            t0(),
        );
        p.apply(
            &mut store,
            FieldEvents {
                messages: vec![message("same", "v2", 10_000), message("new", "fresh", 10_000)],
                ..FieldEvents::default()
            },
            t0() + Duration::milliseconds(500),
        );
        let m = store.messages();
        assert_eq!(m.len(), 3);
        assert!(!m.contains_key(&MessageId::new("gone")));
        assert_eq!(m[&MessageId::new("same")].content, "v2");
        assert_eq!(m[&MessageId::new("keep")].content, "old");
    }

    #[test]
    fn message_expiry_checked_against_frame_time() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(
            &mut store,
            FieldEvents {
                messages: vec![message("m", "hi", 1000)],
                ..FieldEvents::default()
            },
            t0(),
        );
        p.apply(&mut store, FieldEvents::default(), t0() + Duration::milliseconds(500));
        assert!(store.messages().contains_key(&MessageId::new("m")));
        let changed = p.apply(&mut store, FieldEvents::default(), t0() + Duration::milliseconds(1500));
        assert_eq!(changed, Changed::MESSAGES);
        assert!(store.messages().is_empty());
    }

    #[test]
    fn disabled_sweep_keeps_expired_entries() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::new(SweepPolicy::Disabled);
        p.apply(
            &mut store,
            FieldEvents {
                messages: vec![message("m", "hi", 1000)],
                reactions: vec![reaction("r", 1000)],
                ..FieldEvents::default()
            },
            t0(),
        );
        let changed = p.apply(&mut store, FieldEvents::default(), t0() + Duration::seconds(5));
        assert!(changed.is_empty());
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.reactions().len(), 1);
    }

    #[test]
    fn reactions_drop_expired_and_append_without_dedup() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(
            &mut store,
            FieldEvents {
                reactions: vec![reaction("r1", 100), reaction("r2", 10_000)],
                ..FieldEvents::default()
            },
            t0(),
        );
        p.apply(
            &mut store,
            FieldEvents {
                reactions: vec![reaction("r2", 10_000), reaction("r3", 10_000)],
                ..FieldEvents::default()
            },
            t0() + Duration::seconds(1),
        );
        let ids: Vec<_> = store.reactions().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r2", "r3"]);
    }

    #[test]
    fn speaker_phones_append_and_never_expire() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(
            &mut store,
            FieldEvents {
                speaker_phones: vec![speaker_phone("s1")],
                ..FieldEvents::default()
            },
            t0(),
        );
        let before = Arc::clone(store.speaker_phones());
        p.apply(&mut store, FieldEvents::default(), t0() + Duration::days(30));
        assert!(Arc::ptr_eq(&before, store.speaker_phones()));
        p.apply(
            &mut store,
            FieldEvents {
                speaker_phones: vec![speaker_phone("s1")],
                ..FieldEvents::default()
            },
            t0(),
        );
        assert_eq!(store.speaker_phones().len(), 2);
    }

    #[test]
    fn malformed_frame_leaves_store_untouched() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        p.apply(&mut store, actions(vec![arrive("a", 1.0, 1.0)]), t0());
        let before = store.snapshot();

        assert!(p.handle_text(&mut store, "{\"messages\": [", t0()).is_none());
        // Valid JSON but one action is unknown: the whole frame goes.
        let half_valid = r#"{"messages":[],"speakerPhones":[],"reactions":[],
            "explorerActions":[{"type":"leave","id":"a"},{"type":"dance","id":"a"}]}"#;
        assert!(p.handle_text(&mut store, half_valid, t0()).is_none());
        assert!(store.snapshot().changed_since(&before).is_empty());
        assert_eq!(store.actors().len(), 1);
    }

    #[test]
    fn handle_text_applies_decoded_frame() {
        let mut store = WorldStore::new();
        let p = InboundProcessor::default();
        let text = r#"{"messages":[],"speakerPhones":[],"reactions":[],
            "explorerActions":[{"type":"arrive","actor":{"id":"a","userId":"u","position":{"x":10,"y":10}}}]}"#;
        assert_eq!(p.handle_text(&mut store, text, t0()), Some(Changed::ACTORS));
        assert_eq!(store.actors()[&ActorId::new("a")].position, Position::new(10.0, 10.0));
    }
}
