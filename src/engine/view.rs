use serde::Serialize;

use super::cards::{Card, Rank, Suit};
use super::game::GolfGame;
use super::state::{GamePhase, PlayerId};

/// A card as one particular viewer sees it. Face-down cards belonging
/// to somebody else serialize as `{"face_up": false}` only.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(untagged)]
pub enum CardView {
    Shown {
        suit: Suit,
        rank: Rank,
        face_up: bool,
    },
    Hidden {
        face_up: bool,
    },
}

impl CardView {
    pub fn of(card: &Card, reveal: bool) -> Self {
        if card.face_up || reveal {
            CardView::Shown {
                suit: card.suit,
                rank: card.rank,
                face_up: card.face_up,
            }
        } else {
            CardView::Hidden { face_up: false }
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub cards: Vec<CardView>,
    pub score: Option<i32>,
    pub total_score: i32,
    pub rounds_won: u32,
    pub all_face_up: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct GameStateView {
    pub phase: GamePhase,
    pub players: Vec<PlayerView>,
    pub current_player_id: Option<PlayerId>,
    pub discard_top: Option<CardView>,
    pub deck_remaining: usize,
    pub current_round: u32,
    pub total_rounds: u32,
    pub has_drawn_card: bool,
    pub can_discard: bool,
    pub waiting_for_initial_flip: bool,
    pub initial_flips: u8,
    pub flip_on_discard: bool,
}

impl GolfGame {
    /// Project the game for one viewer: their own face-down cards are
    /// revealed to them, opponents' stay hidden, and everything is
    /// revealed once the round is over.
    pub fn state_for(&self, viewer_id: &str) -> GameStateView {
        let reveal_all = matches!(self.phase, GamePhase::RoundOver | GamePhase::GameOver);

        let players = self
            .players
            .iter()
            .map(|player| {
                let reveal = reveal_all || player.id == viewer_id;
                PlayerView {
                    id: player.id.clone(),
                    name: player.name.clone(),
                    cards: player
                        .cards
                        .iter()
                        .map(|card| CardView::of(card, reveal))
                        .collect(),
                    score: reveal_all.then_some(player.score),
                    total_score: player.total_score,
                    rounds_won: player.rounds_won,
                    all_face_up: player.all_face_up(),
                }
            })
            .collect();

        GameStateView {
            phase: self.phase,
            players,
            current_player_id: self.current_player().map(|p| p.id.clone()),
            discard_top: self
                .discard_pile
                .last()
                .map(|card| CardView::of(card, true)),
            deck_remaining: self.deck.remaining(),
            current_round: self.current_round,
            total_rounds: self.num_rounds,
            has_drawn_card: self.drawn_card.is_some(),
            can_discard: self
                .drawn_card
                .map(|_| !self.drawn_from_discard)
                .unwrap_or(true),
            waiting_for_initial_flip: self.phase == GamePhase::InitialFlip
                && !self.initial_flips_done.contains(viewer_id),
            initial_flips: self.options.initial_flips,
            flip_on_discard: self.options.flip_on_discard,
        }
    }
}
