use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::{
    Card, Deck, DrawSource, GameOptions, GamePhase, GamePlayer, GolfGame, PlayerId,
};

use super::event::{EventPayload, GameEvent};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("expected sequence {expected}, got {got}")]
    SequenceGap { expected: i64, got: i64 },
    #[error("cannot rebuild state from an empty event list")]
    EmptyEventLog,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebuiltPlayer {
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub total_score: i32,
    #[serde(default)]
    pub rounds_won: u32,
    #[serde(default)]
    pub is_cpu: bool,
    #[serde(default)]
    pub cpu_profile: Option<String>,
}

impl RebuiltPlayer {
    fn all_face_up(&self) -> bool {
        !self.cards.is_empty() && self.cards.iter().all(|card| card.face_up)
    }

    fn has_face_down(&self) -> bool {
        self.cards.iter().any(|card| !card.face_up)
    }
}

/// Game state reconstructed purely from events. This doubles as the
/// cacheable snapshot of a live game: [`RebuiltGameState::from_engine`]
/// produces it, `apply` advances it, and [`RebuiltGameState::into_engine`]
/// turns it back into a live engine after recovery.
///
/// The exact deck order is not observable from events; only the
/// remaining count is tracked, and the unseen remainder is
/// reconstructed from the recorded seed when a live engine is needed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebuiltGameState {
    pub game_id: Uuid,
    #[serde(default)]
    pub room_code: String,
    pub phase: GamePhase,
    #[serde(default)]
    pub players: BTreeMap<PlayerId, RebuiltPlayer>,
    #[serde(default)]
    pub player_order: Vec<PlayerId>,
    #[serde(default)]
    pub current_player_idx: usize,
    #[serde(default)]
    pub deck_remaining: usize,
    #[serde(default)]
    pub discard_pile: Vec<Card>,
    #[serde(default)]
    pub drawn_card: Option<Card>,
    #[serde(default)]
    pub drawn_from_discard: bool,
    #[serde(default)]
    pub pending_flip: Option<PlayerId>,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default = "one")]
    pub total_rounds: u32,
    #[serde(default = "one_u8")]
    pub num_decks: u8,
    #[serde(default)]
    pub deck_seed: Option<u64>,
    #[serde(default)]
    pub options: GameOptions,
    #[serde(default)]
    pub sequence_num: i64,
    #[serde(default)]
    pub finisher_id: Option<PlayerId>,
    #[serde(default)]
    pub players_with_final_turn: BTreeSet<PlayerId>,
    #[serde(default)]
    pub initial_flips_done: BTreeSet<PlayerId>,
    #[serde(default)]
    pub host_id: Option<PlayerId>,
}

fn one() -> u32 {
    1
}

fn one_u8() -> u8 {
    1
}

impl RebuiltGameState {
    pub fn new(game_id: Uuid) -> Self {
        Self {
            game_id,
            room_code: String::new(),
            phase: GamePhase::Waiting,
            players: BTreeMap::new(),
            player_order: Vec::new(),
            current_player_idx: 0,
            deck_remaining: 0,
            discard_pile: Vec::new(),
            drawn_card: None,
            drawn_from_discard: false,
            pending_flip: None,
            current_round: 0,
            total_rounds: 1,
            num_decks: 1,
            deck_seed: None,
            options: GameOptions::default(),
            sequence_num: 0,
            finisher_id: None,
            players_with_final_turn: BTreeSet::new(),
            initial_flips_done: BTreeSet::new(),
            host_id: None,
        }
    }

    pub fn current_player_id(&self) -> Option<&PlayerId> {
        self.player_order.get(self.current_player_idx)
    }

    pub fn discard_top(&self) -> Option<&Card> {
        self.discard_pile.last()
    }

    /// Apply one event. The only precondition is that the sequence is
    /// exactly one past the last applied event (or 1 on empty state);
    /// out-of-order application fails fast.
    pub fn apply(&mut self, event: &GameEvent) -> Result<(), ReplayError> {
        let expected = if self.sequence_num > 0 {
            self.sequence_num + 1
        } else {
            1
        };
        if event.sequence_num != expected {
            return Err(ReplayError::SequenceGap {
                expected,
                got: event.sequence_num,
            });
        }

        match &event.payload {
            EventPayload::GameCreated {
                room_code,
                host_id,
                options,
            } => {
                self.room_code = room_code.clone();
                self.host_id = Some(host_id.clone());
                self.options = options.clone();
            }
            EventPayload::PlayerJoined {
                player_name,
                is_cpu,
                cpu_profile,
            } => {
                if let Some(player_id) = &event.player_id {
                    self.players.insert(
                        player_id.clone(),
                        RebuiltPlayer {
                            id: player_id.clone(),
                            name: player_name.clone(),
                            cards: Vec::new(),
                            score: 0,
                            total_score: 0,
                            rounds_won: 0,
                            is_cpu: *is_cpu,
                            cpu_profile: cpu_profile.clone(),
                        },
                    );
                    self.player_order.push(player_id.clone());
                }
            }
            EventPayload::PlayerLeft { .. } => {
                if let Some(player_id) = &event.player_id {
                    self.players.remove(player_id);
                    self.player_order.retain(|id| id != player_id);
                    if self.current_player_idx >= self.player_order.len() {
                        self.current_player_idx = 0;
                    }
                }
            }
            EventPayload::GameStarted {
                player_order,
                num_decks,
                num_rounds,
                options,
            } => {
                self.player_order = player_order.clone();
                self.num_decks = *num_decks;
                self.total_rounds = *num_rounds;
                self.options = options.clone();
            }
            EventPayload::RoundStarted {
                round_num,
                deck_seed,
                dealt_cards,
                first_discard,
            } => {
                self.current_round = *round_num;
                self.deck_seed = Some(*deck_seed);
                self.finisher_id = None;
                self.players_with_final_turn = BTreeSet::new();
                self.initial_flips_done = BTreeSet::new();
                self.drawn_card = None;
                self.drawn_from_discard = false;
                self.pending_flip = None;
                self.current_player_idx = 0;
                self.discard_pile = Vec::new();

                let mut dealt_count = 0usize;
                for (player_id, cards) in dealt_cards {
                    dealt_count += cards.len();
                    if let Some(player) = self.players.get_mut(player_id) {
                        player.cards = cards.clone();
                        player.score = 0;
                    }
                }

                if let Some(card) = first_discard {
                    dealt_count += 1;
                    self.discard_pile.push(card.face_up());
                }

                self.phase = if self.options.initial_flips == 0 {
                    GamePhase::Playing
                } else {
                    GamePhase::InitialFlip
                };

                let total = Deck::full_set(
                    self.num_decks,
                    self.options.use_jokers,
                    self.options.lucky_swing,
                )
                .len();
                self.deck_remaining = total.saturating_sub(dealt_count);
            }
            EventPayload::RoundEnded {
                scores,
                final_hands,
            } => {
                self.phase = GamePhase::RoundOver;
                self.pending_flip = None;

                for (player_id, score) in scores {
                    if let Some(player) = self.players.get_mut(player_id) {
                        player.score = *score;
                        player.total_score += *score;
                    }
                }
                if let Some(min) = scores.values().min().copied() {
                    for (player_id, score) in scores {
                        if *score == min {
                            if let Some(player) = self.players.get_mut(player_id) {
                                player.rounds_won += 1;
                            }
                        }
                    }
                }
                for (player_id, cards) in final_hands {
                    if let Some(player) = self.players.get_mut(player_id) {
                        player.cards = cards.iter().map(|card| card.face_up()).collect();
                    }
                }
            }
            EventPayload::GameEnded { .. } => {
                self.phase = GamePhase::GameOver;
            }
            EventPayload::InitialFlip { positions, cards } => {
                if let Some(player_id) = &event.player_id {
                    if let Some(player) = self.players.get_mut(player_id) {
                        for (pos, card) in positions.iter().zip(cards) {
                            if *pos < player.cards.len() {
                                player.cards[*pos] = card.face_up();
                            }
                        }
                    }
                    self.initial_flips_done.insert(player_id.clone());
                    if self.initial_flips_done.len() == self.players.len() {
                        self.phase = GamePhase::Playing;
                    }
                }
            }
            EventPayload::CardDrawn { source, card } => {
                self.drawn_card = Some(card.face_up());
                self.drawn_from_discard = *source == DrawSource::Discard;
                match source {
                    DrawSource::Discard => {
                        self.discard_pile.pop();
                    }
                    DrawSource::Deck => {
                        if self.deck_remaining == 0 && self.discard_pile.len() >= 2 {
                            // The engine reshuffled all but the top of the
                            // discard pile back into the deck and drew one.
                            let moved = self.discard_pile.len() - 1;
                            let top = self.discard_pile.pop().expect("pile has cards");
                            self.discard_pile = vec![top];
                            self.deck_remaining = moved - 1;
                        } else {
                            self.deck_remaining = self.deck_remaining.saturating_sub(1);
                        }
                    }
                }
            }
            EventPayload::CardSwapped {
                position,
                new_card,
                old_card,
            } => {
                if let Some(player_id) = event.player_id.clone() {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        if *position < player.cards.len() {
                            player.cards[*position] = new_card.face_up();
                        }
                    }
                    self.discard_pile.push(old_card.face_up());
                    self.drawn_card = None;
                    self.drawn_from_discard = false;
                    self.end_turn(&player_id);
                }
            }
            EventPayload::CardDiscarded { card, cancelled } => {
                self.discard_pile.push(card.face_up());
                self.drawn_card = None;
                self.drawn_from_discard = false;
                if *cancelled {
                    // A returned discard draw; the turn is still open.
                } else if let Some(player_id) = event.player_id.clone() {
                    let defer = self.options.flip_on_discard
                        && self
                            .players
                            .get(&player_id)
                            .map(|p| p.has_face_down())
                            .unwrap_or(false);
                    if defer {
                        self.pending_flip = Some(player_id);
                    } else {
                        self.end_turn(&player_id);
                    }
                }
            }
            EventPayload::CardFlipped { position, card } => {
                if let Some(player_id) = event.player_id.clone() {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        if *position < player.cards.len() {
                            player.cards[*position] = card.face_up();
                        }
                    }
                    self.pending_flip = None;
                    self.end_turn(&player_id);
                }
            }
            EventPayload::FlipSkipped => {
                if let Some(player_id) = event.player_id.clone() {
                    self.pending_flip = None;
                    self.end_turn(&player_id);
                }
            }
            EventPayload::FlipAsAction { position, card } => {
                if let Some(player_id) = event.player_id.clone() {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        if *position < player.cards.len() {
                            player.cards[*position] = card.face_up();
                        }
                    }
                    self.end_turn(&player_id);
                }
            }
            EventPayload::KnockEarly { positions, cards } => {
                if let Some(player_id) = event.player_id.clone() {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        for (pos, card) in positions.iter().zip(cards) {
                            if *pos < player.cards.len() {
                                player.cards[*pos] = card.face_up();
                            }
                        }
                    }
                    self.end_turn(&player_id);
                }
            }
        }

        self.sequence_num = event.sequence_num;
        Ok(())
    }

    /// Mirror of the engine's end-of-turn check: the first player to
    /// reveal all six cards becomes the finisher, and advancing into a
    /// seat marks that seat's final turn.
    fn end_turn(&mut self, player_id: &str) {
        let finished = self
            .players
            .get(player_id)
            .map(|p| p.all_face_up())
            .unwrap_or(false);
        if finished && self.finisher_id.is_none() {
            self.finisher_id = Some(player_id.to_string());
            self.phase = GamePhase::FinalTurn;
            self.players_with_final_turn.insert(player_id.to_string());
        }
        self.next_turn();
    }

    fn next_turn(&mut self) {
        if self.player_order.is_empty() {
            return;
        }
        if self.phase == GamePhase::FinalTurn {
            let next_idx = (self.current_player_idx + 1) % self.player_order.len();
            let next_id = self.player_order[next_idx].clone();
            if self.players_with_final_turn.contains(&next_id) {
                // Round is ending; the round_ended event sets the phase.
                return;
            }
            self.current_player_idx = next_idx;
            self.players_with_final_turn.insert(next_id);
        } else {
            self.current_player_idx = (self.current_player_idx + 1) % self.player_order.len();
        }
    }

    // ------------------------------------------------------------------
    // Engine conversions
    // ------------------------------------------------------------------

    /// Snapshot a live engine into the cacheable form.
    pub fn from_engine(game: &GolfGame) -> Self {
        let mut players = BTreeMap::new();
        let mut player_order = Vec::with_capacity(game.players.len());
        for player in &game.players {
            player_order.push(player.id.clone());
            players.insert(
                player.id.clone(),
                RebuiltPlayer {
                    id: player.id.clone(),
                    name: player.name.clone(),
                    cards: player.cards.clone(),
                    score: player.score,
                    total_score: player.total_score,
                    rounds_won: player.rounds_won,
                    is_cpu: player.is_cpu,
                    cpu_profile: player.cpu_profile.clone(),
                },
            );
        }

        Self {
            game_id: game.game_id,
            room_code: game.room_code.clone(),
            phase: game.phase,
            players,
            player_order,
            current_player_idx: game.current_player_index,
            deck_remaining: game.deck.remaining(),
            discard_pile: game.discard_pile.clone(),
            drawn_card: game.drawn_card,
            drawn_from_discard: game.drawn_from_discard,
            pending_flip: game.pending_flip.clone(),
            current_round: game.current_round,
            total_rounds: game.num_rounds,
            num_decks: game.num_decks,
            deck_seed: (game.phase != GamePhase::Waiting).then(|| game.deck.seed()),
            options: game.options.clone(),
            sequence_num: game.last_sequence(),
            finisher_id: game.finisher_id.clone(),
            players_with_final_turn: game.players_with_final_turn.clone(),
            initial_flips_done: game.initial_flips_done.clone(),
            host_id: game.host_id.clone(),
        }
    }

    /// Reconstitute a live engine. Hands, discard pile, and the drawn
    /// card are known exactly; the unseen deck is the full multiset
    /// minus every known card, reshuffled under the recorded seed.
    pub fn into_engine(&self) -> GolfGame {
        let players: Vec<GamePlayer> = self
            .player_order
            .iter()
            .filter_map(|id| self.players.get(id))
            .map(|p| GamePlayer {
                id: p.id.clone(),
                name: p.name.clone(),
                cards: p.cards.clone(),
                score: p.score,
                total_score: p.total_score,
                rounds_won: p.rounds_won,
                is_cpu: p.is_cpu,
                cpu_profile: p.cpu_profile.clone(),
            })
            .collect();

        let deck = match self.deck_seed {
            Some(seed) => {
                let mut pool = Deck::full_set(
                    self.num_decks,
                    self.options.use_jokers,
                    self.options.lucky_swing,
                );
                let known = players
                    .iter()
                    .flat_map(|p| p.cards.iter())
                    .chain(self.discard_pile.iter())
                    .chain(self.drawn_card.iter());
                for card in known {
                    if let Some(idx) = pool.iter().position(|c| c.same_card(card)) {
                        pool.swap_remove(idx);
                    }
                }
                Deck::from_parts(pool, seed)
            }
            None => Deck::empty(),
        };

        let mut game = GolfGame::new(self.game_id, self.room_code.clone());
        game.host_id = self.host_id.clone();
        game.players = players;
        game.deck = deck;
        game.discard_pile = self.discard_pile.clone();
        game.current_player_index = self.current_player_idx;
        game.phase = self.phase;
        game.num_decks = self.num_decks;
        game.num_rounds = self.total_rounds;
        game.current_round = self.current_round.max(1);
        game.drawn_card = self.drawn_card;
        game.drawn_from_discard = self.drawn_from_discard;
        game.finisher_id = self.finisher_id.clone();
        game.players_with_final_turn = self.players_with_final_turn.clone();
        game.initial_flips_done = self.initial_flips_done.clone();
        game.pending_flip = self.pending_flip.clone();
        game.options = self.options.clone();
        game.sequence = self.sequence_num;
        game
    }
}

/// Rebuild game state from a complete event sequence.
pub fn rebuild_state(events: &[GameEvent]) -> Result<RebuiltGameState, ReplayError> {
    let first = events.first().ok_or(ReplayError::EmptyEventLog)?;
    let mut state = RebuiltGameState::new(first.game_id);
    for event in events {
        state.apply(event)?;
    }
    Ok(state)
}
