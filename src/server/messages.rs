use serde::{Deserialize, Serialize};

use crate::engine::{CardView, DrawSource, GameOptions, GameStateView, PlayerId};
use crate::room::{CpuProfileInfo, MemberInfo};

fn default_decks() -> u8 {
    1
}

fn default_rounds() -> u32 {
    1
}

/// Game settings as sent by the host; rule-variant flags arrive flat
/// next to `decks`/`rounds` and unknown flags are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct StartGameParams {
    #[serde(default = "default_decks")]
    pub decks: u8,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(flatten)]
    pub options: GameOptions,
}

/// Inbound message types, one handler each. The tagged enum is the
/// dispatch map: an unknown tag fails to parse and is answered with an
/// `error` message, never a disconnect.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom {
        player_name: Option<String>,
    },
    JoinRoom {
        room_code: String,
        player_name: Option<String>,
    },
    LeaveRoom,
    LeaveGame,
    EndGame,
    GetCpuProfiles,
    AddCpu {
        profile_name: Option<String>,
    },
    RemoveCpu,
    StartGame(StartGameParams),
    FlipInitial {
        positions: Vec<usize>,
    },
    Draw {
        #[serde(default = "default_draw_source")]
        source: DrawSource,
    },
    Swap {
        position: usize,
    },
    Discard,
    CancelDraw,
    FlipCard {
        position: usize,
    },
    SkipFlip,
    FlipAsAction {
        position: usize,
    },
    KnockEarly,
    NextRound,
    JoinQueue {
        player_name: Option<String>,
        desired_players: Option<usize>,
    },
    LeaveQueue,
}

fn default_draw_source() -> DrawSource {
    DrawSource::Deck
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoreLine {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    pub total: i32,
    pub rounds_won: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct Rankings {
    pub by_points: Vec<ScoreLine>,
    pub by_rounds_won: Vec<ScoreLine>,
}

/// Outbound message types.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated {
        room_code: String,
        player_id: PlayerId,
    },
    RoomJoined {
        room_code: String,
        player_id: PlayerId,
    },
    PlayerJoined {
        players: Vec<MemberInfo>,
    },
    PlayerLeft {
        player_id: PlayerId,
        player_name: String,
        players: Vec<MemberInfo>,
    },
    CpuProfiles {
        profiles: Vec<CpuProfileInfo>,
    },
    GameStarted {
        game_state: GameStateView,
    },
    RoundStarted {
        game_state: GameStateView,
    },
    GameState {
        game_state: GameStateView,
    },
    CardDrawn {
        card: CardView,
        source: DrawSource,
    },
    CanFlip {
        optional: bool,
    },
    YourTurn,
    RoundOver {
        scores: Vec<ScoreLine>,
        round: u32,
        total_rounds: u32,
        rankings: Rankings,
    },
    GameOver {
        final_scores: Vec<ScoreLine>,
        rankings: Rankings,
    },
    GameEnded {
        reason: String,
    },
    QueueJoined {
        position: usize,
    },
    QueueLeft,
    MatchFound {
        room_code: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
