use serde::{Deserialize, Serialize};

use super::cards::Card;

pub type PlayerId = String;

/// Cards per hand, two rows of three.
pub const HAND_SIZE: usize = 6;

/// Seats per room.
pub const MAX_PLAYERS: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Waiting,
    InitialFlip,
    Playing,
    FinalTurn,
    RoundOver,
    GameOver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawSource {
    Deck,
    Discard,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GamePlayer {
    pub id: PlayerId,
    pub name: String,
    pub cards: Vec<Card>,
    pub score: i32,
    pub total_score: i32,
    pub rounds_won: u32,
    pub is_cpu: bool,
    pub cpu_profile: Option<String>,
}

impl GamePlayer {
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cards: Vec::new(),
            score: 0,
            total_score: 0,
            rounds_won: 0,
            is_cpu: false,
            cpu_profile: None,
        }
    }

    pub fn all_face_up(&self) -> bool {
        !self.cards.is_empty() && self.cards.iter().all(|card| card.face_up)
    }

    pub fn has_face_down(&self) -> bool {
        self.cards.iter().any(|card| !card.face_up)
    }

    pub fn face_down_positions(&self) -> Vec<usize> {
        self.cards
            .iter()
            .enumerate()
            .filter(|(_, card)| !card.face_up)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn flip_card(&mut self, position: usize) {
        if let Some(card) = self.cards.get_mut(position) {
            card.face_up = true;
        }
    }

    /// Place `new_card` face up at `position`, returning the replaced card.
    pub fn swap_card(&mut self, position: usize, mut new_card: Card) -> Card {
        new_card.face_up = true;
        std::mem::replace(&mut self.cards[position], new_card)
    }
}
