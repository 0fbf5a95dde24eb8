use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{Card, DrawSource, GameOptions, PlayerId};

/// Closed set of event type tags, mirrored by [`EventPayload`]. The
/// string form is what the event log's `event_type` column stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Lifecycle
    GameCreated,
    PlayerJoined,
    PlayerLeft,
    GameStarted,
    RoundStarted,
    RoundEnded,
    GameEnded,
    // Gameplay
    InitialFlip,
    CardDrawn,
    CardSwapped,
    CardDiscarded,
    CardFlipped,
    FlipSkipped,
    FlipAsAction,
    KnockEarly,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::GameCreated => "game_created",
            EventType::PlayerJoined => "player_joined",
            EventType::PlayerLeft => "player_left",
            EventType::GameStarted => "game_started",
            EventType::RoundStarted => "round_started",
            EventType::RoundEnded => "round_ended",
            EventType::GameEnded => "game_ended",
            EventType::InitialFlip => "initial_flip",
            EventType::CardDrawn => "card_drawn",
            EventType::CardSwapped => "card_swapped",
            EventType::CardDiscarded => "card_discarded",
            EventType::CardFlipped => "card_flipped",
            EventType::FlipSkipped => "flip_skipped",
            EventType::FlipAsAction => "flip_as_action",
            EventType::KnockEarly => "knock_early",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific event data. `round_started` carries the deck seed and
/// the full deal so replay reconstructs hands without re-simulating the
/// shuffle; `round_ended` carries final hands and scores so replay does
/// not have to re-score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    GameCreated {
        room_code: String,
        host_id: PlayerId,
        options: GameOptions,
    },
    PlayerJoined {
        player_name: String,
        #[serde(default)]
        is_cpu: bool,
        #[serde(default)]
        cpu_profile: Option<String>,
    },
    PlayerLeft {
        player_name: String,
    },
    GameStarted {
        player_order: Vec<PlayerId>,
        num_decks: u8,
        num_rounds: u32,
        options: GameOptions,
    },
    RoundStarted {
        round_num: u32,
        deck_seed: u64,
        dealt_cards: BTreeMap<PlayerId, Vec<Card>>,
        first_discard: Option<Card>,
    },
    RoundEnded {
        scores: BTreeMap<PlayerId, i32>,
        final_hands: BTreeMap<PlayerId, Vec<Card>>,
    },
    GameEnded {
        #[serde(default)]
        winner_id: Option<PlayerId>,
    },
    InitialFlip {
        positions: Vec<usize>,
        cards: Vec<Card>,
    },
    CardDrawn {
        source: DrawSource,
        card: Card,
    },
    CardSwapped {
        position: usize,
        new_card: Card,
        old_card: Card,
    },
    CardDiscarded {
        card: Card,
        /// True when a discard-pile draw was returned unused; the turn
        /// does not advance.
        #[serde(default)]
        cancelled: bool,
    },
    CardFlipped {
        position: usize,
        card: Card,
    },
    FlipSkipped,
    FlipAsAction {
        position: usize,
        card: Card,
    },
    KnockEarly {
        positions: Vec<usize>,
        cards: Vec<Card>,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::GameCreated { .. } => EventType::GameCreated,
            EventPayload::PlayerJoined { .. } => EventType::PlayerJoined,
            EventPayload::PlayerLeft { .. } => EventType::PlayerLeft,
            EventPayload::GameStarted { .. } => EventType::GameStarted,
            EventPayload::RoundStarted { .. } => EventType::RoundStarted,
            EventPayload::RoundEnded { .. } => EventType::RoundEnded,
            EventPayload::GameEnded { .. } => EventType::GameEnded,
            EventPayload::InitialFlip { .. } => EventType::InitialFlip,
            EventPayload::CardDrawn { .. } => EventType::CardDrawn,
            EventPayload::CardSwapped { .. } => EventType::CardSwapped,
            EventPayload::CardDiscarded { .. } => EventType::CardDiscarded,
            EventPayload::CardFlipped { .. } => EventType::CardFlipped,
            EventPayload::FlipSkipped => EventType::FlipSkipped,
            EventPayload::FlipAsAction { .. } => EventType::FlipAsAction,
            EventPayload::KnockEarly { .. } => EventType::KnockEarly,
        }
    }
}

/// An immutable record of one action in one game. Sequence numbers are
/// gap-free per game and start at 1; they define the total order the
/// reducer replays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub game_id: Uuid,
    pub sequence_num: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl GameEvent {
    pub fn new(
        game_id: Uuid,
        sequence_num: i64,
        player_id: Option<PlayerId>,
        payload: EventPayload,
    ) -> Self {
        Self {
            game_id,
            sequence_num,
            timestamp: Utc::now(),
            player_id,
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
