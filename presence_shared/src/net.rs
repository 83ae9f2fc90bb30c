//! Wire protocol for the field session.
//!
//! One persistent WebSocket carries JSON text frames both ways:
//! - client -> server: [`OutboundFrame`], the local position and field size;
//! - server -> client: a batch of field events, decoded into [`FieldEvents`].
//!
//! Inbound decoding accepts the shapes the server has been seen to emit
//! (several timestamp encodings, wrapped or flattened actor payloads) and
//! is strict about everything else: a frame that does not decode
//! completely is rejected as a whole.

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    math::{FieldSize, GridPosition, GridSize, Position},
    model::{
        Actor, ActorId, Message, MessageId, Reaction, ReactionId, SpeakerPhone, SpeakerPhoneId,
        UserId,
    },
};

/// Default WebSocket endpoint path on the field server.
pub const WS_PATH: &str = "/ws";

/// Client -> server: where the local user is and how much of the world it sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub position: GridPosition,
    pub size: GridSize,
}

impl OutboundFrame {
    /// Rounds a live position and field size into a transmittable frame.
    pub fn new(position: Position, size: FieldSize) -> Self {
        Self {
            position: position.rounded(),
            size: size.rounded(),
        }
    }
}

/// A discrete change to the remote actor set.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplorerAction {
    Arrive { actor: Actor },
    Move { actor: Actor },
    Leave { id: ActorId },
}

/// One decoded server push.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldEvents {
    pub messages: Vec<Message>,
    pub speaker_phones: Vec<SpeakerPhone>,
    pub reactions: Vec<Reaction>,
    pub explorer_actions: Vec<ExplorerAction>,
}

impl FieldEvents {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.speaker_phones.is_empty()
            && self.reactions.is_empty()
            && self.explorer_actions.is_empty()
    }
}

/// Why an inbound frame was rejected.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timestamp out of range in {entity} {id}")]
    Timestamp { entity: &'static str, id: String },

    #[error("actor {0} carries no user id")]
    MissingUserId(ActorId),
}

/// Decodes one inbound text frame.
pub fn decode_events(text: &str) -> Result<FieldEvents, FrameError> {
    let wire: WireFrame = serde_json::from_str(text)?;
    wire.resolve()
}

/// Encodes one outbound frame as JSON text.
pub fn encode_outbound(frame: &OutboundFrame) -> anyhow::Result<String> {
    serde_json::to_string(frame).context("serialize outbound frame")
}

/// Parses an outbound frame; the server side of [`encode_outbound`].
pub fn decode_outbound(text: &str) -> anyhow::Result<OutboundFrame> {
    serde_json::from_str(text).context("deserialize outbound frame")
}

// ─── Wire shapes ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    messages: Vec<WireMessage>,
    speaker_phones: Vec<WireSpeakerPhone>,
    reactions: Vec<WireReaction>,
    explorer_actions: Vec<WireAction>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Rfc3339(DateTime<Utc>),
    EpochMillis(i64),
    Structured {
        seconds: i64,
        #[serde(default)]
        nanos: u32,
    },
}

impl WireTimestamp {
    fn resolve(self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Rfc3339(t) => Some(t),
            WireTimestamp::EpochMillis(ms) => Utc.timestamp_millis_opt(ms).single(),
            WireTimestamp::Structured { seconds, nanos } => {
                Utc.timestamp_opt(seconds, nanos).single()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: MessageId,
    user_id: UserId,
    position: Position,
    content: String,
    created_at: WireTimestamp,
    updated_at: WireTimestamp,
    expires_at: WireTimestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReaction {
    id: ReactionId,
    user_id: UserId,
    position: Position,
    kind: String,
    created_at: WireTimestamp,
    expires_at: WireTimestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSpeakerPhone {
    id: SpeakerPhoneId,
    name: String,
    position: Position,
    receive_range: f64,
    created_at: WireTimestamp,
    updated_at: WireTimestamp,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireAction {
    Arrive(WireActorBody),
    Move(WireActorBody),
    Leave(WireLeave),
}

/// `{actor: {...}}` or the actor fields inline next to `type`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireActorBody {
    Wrapped { actor: WireActor },
    Flat(WireActor),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireActor {
    id: ActorId,
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    inner: Option<WireUser>,
    position: Position,
}

#[derive(Deserialize)]
struct WireUser {
    id: UserId,
}

#[derive(Deserialize)]
struct WireLeave {
    id: ActorId,
}

fn instant(
    ts: WireTimestamp,
    entity: &'static str,
    id: &str,
) -> Result<DateTime<Utc>, FrameError> {
    ts.resolve().ok_or_else(|| FrameError::Timestamp {
        entity,
        id: id.to_string(),
    })
}

impl WireFrame {
    fn resolve(self) -> Result<FieldEvents, FrameError> {
        let messages = self
            .messages
            .into_iter()
            .map(WireMessage::resolve)
            .collect::<Result<_, _>>()?;
        let speaker_phones = self
            .speaker_phones
            .into_iter()
            .map(WireSpeakerPhone::resolve)
            .collect::<Result<_, _>>()?;
        let reactions = self
            .reactions
            .into_iter()
            .map(WireReaction::resolve)
            .collect::<Result<_, _>>()?;
        let explorer_actions = self
            .explorer_actions
            .into_iter()
            .map(WireAction::resolve)
            .collect::<Result<_, _>>()?;
        Ok(FieldEvents {
            messages,
            speaker_phones,
            reactions,
            explorer_actions,
        })
    }
}

impl WireMessage {
    fn resolve(self) -> Result<Message, FrameError> {
        let id = self.id.as_str();
        Ok(Message {
            created_at: instant(self.created_at, "message", id)?,
            updated_at: instant(self.updated_at, "message", id)?,
            expires_at: instant(self.expires_at, "message", id)?,
            id: self.id,
            user_id: self.user_id,
            position: self.position,
            content: self.content,
        })
    }
}

impl WireReaction {
    fn resolve(self) -> Result<Reaction, FrameError> {
        let id = self.id.as_str();
        Ok(Reaction {
            created_at: instant(self.created_at, "reaction", id)?,
            expires_at: instant(self.expires_at, "reaction", id)?,
            id: self.id,
            user_id: self.user_id,
            position: self.position,
            kind: self.kind,
        })
    }
}

impl WireSpeakerPhone {
    fn resolve(self) -> Result<SpeakerPhone, FrameError> {
        let id = self.id.as_str();
        Ok(SpeakerPhone {
            created_at: instant(self.created_at, "speaker phone", id)?,
            updated_at: instant(self.updated_at, "speaker phone", id)?,
            id: self.id,
            name: self.name,
            position: self.position,
            receive_range: self.receive_range,
        })
    }
}

impl WireActorBody {
    fn into_actor(self) -> Result<Actor, FrameError> {
        let wire = match self {
            WireActorBody::Wrapped { actor } => actor,
            WireActorBody::Flat(actor) => actor,
        };
        let user_id = match (wire.user_id, wire.inner) {
            (Some(user_id), _) => user_id,
            (None, Some(inner)) => inner.id,
            (None, None) => return Err(FrameError::MissingUserId(wire.id)),
        };
        Ok(Actor::new(wire.id, user_id, wire.position))
    }
}

impl WireAction {
    fn resolve(self) -> Result<ExplorerAction, FrameError> {
        Ok(match self {
            WireAction::Arrive(body) => ExplorerAction::Arrive {
                actor: body.into_actor()?,
            },
            WireAction::Move(body) => ExplorerAction::Move {
                actor: body.into_actor()?,
            },
            WireAction::Leave(leave) => ExplorerAction::Leave { id: leave.id },
        })
    }
}
