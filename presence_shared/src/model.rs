//! Field entities.
//!
//! Everything the server pushes about the shared world: remote actors and
//! the ephemeral content placed at world positions. Ids are opaque strings
//! assigned by the server.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::math::Position;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifies an actor (one explorer session of a user).
    ActorId
);
string_id!(UserId);
string_id!(MessageId);
string_id!(ReactionId);
string_id!(SpeakerPhoneId);

/// Anything that occupies a point in the world.
pub trait Positioned {
    fn position(&self) -> Position;
}

/// A remote user's avatar.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: ActorId,
    pub user_id: UserId,
    /// Last target received from the server.
    pub position: Position,
    /// Target before the most recent `move`; `None` for fresh arrivals.
    pub previous_position: Option<Position>,
}

impl Actor {
    pub fn new(id: ActorId, user_id: UserId, position: Position) -> Self {
        Self {
            id,
            user_id,
            position,
            previous_position: None,
        }
    }
}

/// A text message pinned to a world position until it expires.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub user_id: UserId,
    pub position: Position,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Message {
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A short-lived stamp reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub id: ReactionId,
    pub user_id: UserId,
    pub position: Position,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reaction {
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A named audio zone.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerPhone {
    pub id: SpeakerPhoneId,
    pub position: Position,
    pub receive_range: f64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Positioned for Actor {
    fn position(&self) -> Position {
        self.position
    }
}

impl Positioned for Message {
    fn position(&self) -> Position {
        self.position
    }
}

impl Positioned for Reaction {
    fn position(&self) -> Position {
        self.position
    }
}

impl Positioned for SpeakerPhone {
    fn position(&self) -> Position {
        self.position
    }
}

impl Positioned for Position {
    fn position(&self) -> Position {
        *self
    }
}
