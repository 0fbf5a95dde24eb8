use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use super::cards::{Card, Deck};
use super::errors::ActionError;
use super::options::GameOptions;
use super::scoring;
use super::state::{DrawSource, GamePhase, GamePlayer, PlayerId, HAND_SIZE, MAX_PLAYERS};
use crate::events::event::{EventPayload, GameEvent};

/// The authoritative rules engine for one game of 6-card Golf.
///
/// Every successful operation returns the events it emitted, stamped
/// with consecutive sequence numbers; rejected operations return an
/// [`ActionError`] and leave the state untouched. Given the same deck
/// seeds and operation sequence the engine emits identical events,
/// which is what the replay facility relies on.
#[derive(Clone, Debug)]
pub struct GolfGame {
    pub game_id: Uuid,
    pub room_code: String,
    pub host_id: Option<PlayerId>,
    pub players: Vec<GamePlayer>,
    pub deck: Deck,
    pub discard_pile: Vec<Card>,
    pub current_player_index: usize,
    pub phase: GamePhase,
    pub num_decks: u8,
    pub num_rounds: u32,
    pub current_round: u32,
    pub drawn_card: Option<Card>,
    pub drawn_from_discard: bool,
    pub finisher_id: Option<PlayerId>,
    pub players_with_final_turn: BTreeSet<PlayerId>,
    pub initial_flips_done: BTreeSet<PlayerId>,
    /// Set while a `flip_on_discard` turn is waiting for its flip.
    pub pending_flip: Option<PlayerId>,
    pub options: GameOptions,
    pub(crate) sequence: i64,
}

impl GolfGame {
    pub fn new(game_id: Uuid, room_code: impl Into<String>) -> Self {
        Self {
            game_id,
            room_code: room_code.into(),
            host_id: None,
            players: Vec::new(),
            deck: Deck::empty(),
            discard_pile: Vec::new(),
            current_player_index: 0,
            phase: GamePhase::Waiting,
            num_decks: 1,
            num_rounds: 1,
            current_round: 1,
            drawn_card: None,
            drawn_from_discard: false,
            finisher_id: None,
            players_with_final_turn: BTreeSet::new(),
            initial_flips_done: BTreeSet::new(),
            pending_flip: None,
            options: GameOptions::default(),
            sequence: 0,
        }
    }

    pub fn last_sequence(&self) -> i64 {
        self.sequence
    }

    fn next_event(&mut self, player_id: Option<&str>, payload: EventPayload) -> GameEvent {
        self.sequence += 1;
        GameEvent::new(
            self.game_id,
            self.sequence,
            player_id.map(Into::into),
            payload,
        )
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn get_player(&self, player_id: &str) -> Option<&GamePlayer> {
        self.players.iter().find(|p| p.id == player_id)
    }

    fn get_player_mut(&mut self, player_id: &str) -> Option<&mut GamePlayer> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    pub fn current_player(&self) -> Option<&GamePlayer> {
        self.players.get(self.current_player_index)
    }

    fn require_current(&self, player_id: &str) -> Result<usize, ActionError> {
        let current = self.current_player().ok_or(ActionError::UnknownPlayer)?;
        if current.id != player_id {
            return Err(ActionError::NotCurrentPlayer);
        }
        Ok(self.current_player_index)
    }

    /// Record the game's creation; the first event of every log.
    pub fn emit_game_created(&mut self, host_id: &str) -> GameEvent {
        self.host_id = Some(host_id.to_string());
        let payload = EventPayload::GameCreated {
            room_code: self.room_code.clone(),
            host_id: host_id.to_string(),
            options: self.options.clone(),
        };
        self.next_event(None, payload)
    }

    pub fn add_player(
        &mut self,
        id: impl Into<PlayerId>,
        name: impl Into<String>,
        is_cpu: bool,
        cpu_profile: Option<String>,
    ) -> Result<GameEvent, ActionError> {
        if self.players.len() >= MAX_PLAYERS {
            return Err(ActionError::RoomFull);
        }
        let mut player = GamePlayer::new(id, name);
        player.is_cpu = is_cpu;
        player.cpu_profile = cpu_profile.clone();
        let payload = EventPayload::PlayerJoined {
            player_name: player.name.clone(),
            is_cpu,
            cpu_profile,
        };
        let id = player.id.clone();
        self.players.push(player);
        Ok(self.next_event(Some(&id), payload))
    }

    pub fn remove_player(&mut self, player_id: &str) -> Option<(GamePlayer, GameEvent)> {
        let idx = self.players.iter().position(|p| p.id == player_id)?;
        let player = self.players.remove(idx);
        if self.current_player_index >= self.players.len() {
            self.current_player_index = 0;
        }
        let payload = EventPayload::PlayerLeft {
            player_name: player.name.clone(),
        };
        let event = self.next_event(Some(player_id), payload);
        Some((player, event))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn start_game(
        &mut self,
        num_decks: u8,
        num_rounds: u32,
        options: GameOptions,
        deck_seed: Option<u64>,
    ) -> Result<Vec<GameEvent>, ActionError> {
        if self.phase != GamePhase::Waiting {
            return Err(ActionError::AlreadyStarted);
        }
        if self.players.len() < 2 {
            return Err(ActionError::NotEnoughPlayers);
        }

        self.num_decks = num_decks.clamp(1, 3);
        self.num_rounds = num_rounds.clamp(1, 18);
        self.options = options;
        self.current_round = 1;

        let payload = EventPayload::GameStarted {
            player_order: self.players.iter().map(|p| p.id.clone()).collect(),
            num_decks: self.num_decks,
            num_rounds: self.num_rounds,
            options: self.options.clone(),
        };
        let mut events = vec![self.next_event(None, payload)];
        events.push(self.start_round(deck_seed));
        Ok(events)
    }

    /// Deal a fresh round: new deck, six face-down cards per seat, one
    /// face-up discard. Returns the `round_started` event.
    fn start_round(&mut self, deck_seed: Option<u64>) -> GameEvent {
        self.deck = Deck::new(
            self.num_decks,
            self.options.use_jokers,
            self.options.lucky_swing,
            deck_seed,
        );
        self.discard_pile = Vec::new();
        self.drawn_card = None;
        self.drawn_from_discard = false;
        self.finisher_id = None;
        self.players_with_final_turn = BTreeSet::new();
        self.initial_flips_done = BTreeSet::new();
        self.pending_flip = None;

        let mut dealt: BTreeMap<PlayerId, Vec<Card>> = BTreeMap::new();
        for player in &mut self.players {
            player.cards = Vec::with_capacity(HAND_SIZE);
            player.score = 0;
            for _ in 0..HAND_SIZE {
                if let Some(card) = self.deck.draw() {
                    player.cards.push(card);
                }
            }
            dealt.insert(player.id.clone(), player.cards.clone());
        }

        let first_discard = self.deck.draw().map(|card| {
            let card = card.face_up();
            self.discard_pile.push(card);
            card
        });

        self.current_player_index = 0;
        self.phase = if self.options.initial_flips == 0 {
            GamePhase::Playing
        } else {
            GamePhase::InitialFlip
        };

        let payload = EventPayload::RoundStarted {
            round_num: self.current_round,
            deck_seed: self.deck.seed(),
            dealt_cards: dealt,
            first_discard,
        };
        self.next_event(None, payload)
    }

    pub fn start_next_round(&mut self, deck_seed: Option<u64>) -> Result<Vec<GameEvent>, ActionError> {
        if self.phase != GamePhase::RoundOver {
            return Err(ActionError::WrongPhase);
        }
        if self.current_round >= self.num_rounds {
            self.phase = GamePhase::GameOver;
            let payload = EventPayload::GameEnded {
                winner_id: self.leader_id(),
            };
            return Ok(vec![self.next_event(None, payload)]);
        }
        self.current_round += 1;
        Ok(vec![self.start_round(deck_seed)])
    }

    /// Host-initiated abort; a no-op when the game is already over.
    pub fn end_game(&mut self) -> Option<GameEvent> {
        if self.phase == GamePhase::GameOver {
            return None;
        }
        self.phase = GamePhase::GameOver;
        let payload = EventPayload::GameEnded {
            winner_id: self.leader_id(),
        };
        Some(self.next_event(None, payload))
    }

    /// Player with the lowest cumulative score, ties broken by seat order.
    fn leader_id(&self) -> Option<PlayerId> {
        self.players
            .iter()
            .min_by_key(|p| p.total_score)
            .map(|p| p.id.clone())
    }

    // ------------------------------------------------------------------
    // Turn actions
    // ------------------------------------------------------------------

    pub fn flip_initial_cards(
        &mut self,
        player_id: &str,
        positions: &[usize],
    ) -> Result<Vec<GameEvent>, ActionError> {
        if self.phase != GamePhase::InitialFlip {
            return Err(ActionError::WrongPhase);
        }
        if self.initial_flips_done.contains(player_id) {
            return Err(ActionError::AlreadyFlipped);
        }
        let required = usize::from(self.options.initial_flips);
        if positions.len() != required {
            return Err(ActionError::WrongFlipCount {
                expected: required,
                got: positions.len(),
            });
        }
        for (i, &pos) in positions.iter().enumerate() {
            if pos >= HAND_SIZE {
                return Err(ActionError::PositionOutOfRange);
            }
            if positions[..i].contains(&pos) {
                return Err(ActionError::DuplicatePosition);
            }
        }

        let player = self
            .get_player(player_id)
            .ok_or(ActionError::UnknownPlayer)?;
        for &pos in positions {
            if player.cards[pos].face_up {
                return Err(ActionError::CardAlreadyFaceUp);
            }
        }

        let player = self.get_player_mut(player_id).expect("player exists");
        let mut cards = Vec::with_capacity(positions.len());
        for &pos in positions {
            player.flip_card(pos);
            cards.push(player.cards[pos]);
        }

        self.initial_flips_done.insert(player_id.to_string());
        if self.initial_flips_done.len() == self.players.len() {
            self.phase = GamePhase::Playing;
        }

        let payload = EventPayload::InitialFlip {
            positions: positions.to_vec(),
            cards,
        };
        Ok(vec![self.next_event(Some(player_id), payload)])
    }

    pub fn draw_card(
        &mut self,
        player_id: &str,
        source: DrawSource,
    ) -> Result<Vec<GameEvent>, ActionError> {
        self.require_current(player_id)?;
        if !matches!(self.phase, GamePhase::Playing | GamePhase::FinalTurn) {
            return Err(ActionError::WrongPhase);
        }
        if self.drawn_card.is_some() {
            return Err(ActionError::AlreadyDrawn);
        }
        if self.pending_flip.is_some() {
            return Err(ActionError::FlipRequired);
        }

        match source {
            DrawSource::Deck => {
                let card = match self.deck.draw() {
                    Some(card) => Some(card),
                    None => self.reshuffle_discard_into_deck(),
                };
                match card {
                    Some(mut card) => {
                        card.face_up = true;
                        self.drawn_card = Some(card);
                        self.drawn_from_discard = false;
                        let payload = EventPayload::CardDrawn {
                            source: DrawSource::Deck,
                            card,
                        };
                        Ok(vec![self.next_event(Some(player_id), payload)])
                    }
                    None => {
                        // Nothing left anywhere: the round ends gracefully.
                        let mut events = Vec::new();
                        self.end_round(&mut events);
                        Ok(events)
                    }
                }
            }
            DrawSource::Discard => {
                let mut card = self
                    .discard_pile
                    .pop()
                    .ok_or(ActionError::DiscardPileEmpty)?;
                card.face_up = true;
                self.drawn_card = Some(card);
                self.drawn_from_discard = true;
                let payload = EventPayload::CardDrawn {
                    source: DrawSource::Discard,
                    card,
                };
                Ok(vec![self.next_event(Some(player_id), payload)])
            }
        }
    }

    /// Return a discard-pile draw to the pile without spending the turn.
    pub fn cancel_draw(&mut self, player_id: &str) -> Result<Vec<GameEvent>, ActionError> {
        self.require_current(player_id)?;
        let Some(card) = self.drawn_card else {
            return Err(ActionError::NothingDrawn);
        };
        if !self.drawn_from_discard {
            return Err(ActionError::NothingToCancel);
        }
        self.discard_pile.push(card);
        self.drawn_card = None;
        self.drawn_from_discard = false;
        let payload = EventPayload::CardDiscarded {
            card,
            cancelled: true,
        };
        Ok(vec![self.next_event(Some(player_id), payload)])
    }

    pub fn swap_card(
        &mut self,
        player_id: &str,
        position: usize,
    ) -> Result<Vec<GameEvent>, ActionError> {
        let idx = self.require_current(player_id)?;
        let new_card = self.drawn_card.ok_or(ActionError::NothingDrawn)?;
        if position >= HAND_SIZE {
            return Err(ActionError::PositionOutOfRange);
        }

        let mut old_card = self.players[idx].swap_card(position, new_card);
        old_card.face_up = true;
        self.discard_pile.push(old_card);
        self.drawn_card = None;
        self.drawn_from_discard = false;

        let payload = EventPayload::CardSwapped {
            position,
            new_card: new_card.face_up(),
            old_card,
        };
        let mut events = vec![self.next_event(Some(player_id), payload)];
        self.end_of_turn(player_id, &mut events);
        Ok(events)
    }

    pub fn discard_drawn(&mut self, player_id: &str) -> Result<Vec<GameEvent>, ActionError> {
        let idx = self.require_current(player_id)?;
        let mut card = self.drawn_card.ok_or(ActionError::NothingDrawn)?;
        if self.drawn_from_discard {
            return Err(ActionError::MustSwapDiscardDraw);
        }

        card.face_up = true;
        self.discard_pile.push(card);
        self.drawn_card = None;

        let payload = EventPayload::CardDiscarded {
            card,
            cancelled: false,
        };
        let mut events = vec![self.next_event(Some(player_id), payload)];

        if self.options.flip_on_discard && self.players[idx].has_face_down() {
            // End of turn is deferred until flip_and_end_turn/skip_flip.
            self.pending_flip = Some(player_id.to_string());
        } else {
            self.end_of_turn(player_id, &mut events);
        }
        Ok(events)
    }

    pub fn flip_and_end_turn(
        &mut self,
        player_id: &str,
        position: usize,
    ) -> Result<Vec<GameEvent>, ActionError> {
        let idx = self.require_current(player_id)?;
        if self.pending_flip.as_deref() != Some(player_id) {
            return Err(ActionError::NoFlipPending);
        }
        if position >= HAND_SIZE {
            return Err(ActionError::PositionOutOfRange);
        }
        if self.players[idx].cards[position].face_up {
            return Err(ActionError::CardAlreadyFaceUp);
        }

        self.players[idx].flip_card(position);
        self.pending_flip = None;
        let card = self.players[idx].cards[position];
        let payload = EventPayload::CardFlipped { position, card };
        let mut events = vec![self.next_event(Some(player_id), payload)];
        self.end_of_turn(player_id, &mut events);
        Ok(events)
    }

    /// Decline the post-discard flip. Only allowed once every other
    /// player already has all cards face up.
    pub fn skip_flip(&mut self, player_id: &str) -> Result<Vec<GameEvent>, ActionError> {
        self.require_current(player_id)?;
        if self.pending_flip.as_deref() != Some(player_id) {
            return Err(ActionError::NoFlipPending);
        }
        if !self.flip_is_optional() {
            return Err(ActionError::FlipNotOptional);
        }

        self.pending_flip = None;
        let mut events = vec![self.next_event(Some(player_id), EventPayload::FlipSkipped)];
        self.end_of_turn(player_id, &mut events);
        Ok(events)
    }

    /// Spend the whole turn flipping one face-down card instead of drawing.
    pub fn flip_card_as_action(
        &mut self,
        player_id: &str,
        position: usize,
    ) -> Result<Vec<GameEvent>, ActionError> {
        let idx = self.require_current(player_id)?;
        if !matches!(self.phase, GamePhase::Playing | GamePhase::FinalTurn) {
            return Err(ActionError::WrongPhase);
        }
        if self.drawn_card.is_some() {
            return Err(ActionError::AlreadyDrawn);
        }
        if self.pending_flip.is_some() {
            return Err(ActionError::FlipRequired);
        }
        if position >= HAND_SIZE {
            return Err(ActionError::PositionOutOfRange);
        }
        if self.players[idx].cards[position].face_up {
            return Err(ActionError::CardAlreadyFaceUp);
        }

        self.players[idx].flip_card(position);
        let card = self.players[idx].cards[position];
        let payload = EventPayload::FlipAsAction { position, card };
        let mut events = vec![self.next_event(Some(player_id), payload)];
        self.end_of_turn(player_id, &mut events);
        Ok(events)
    }

    /// Reveal every face-down card at once, forcing the end-of-turn
    /// check (the knocker becomes the finisher).
    pub fn knock_early(&mut self, player_id: &str) -> Result<Vec<GameEvent>, ActionError> {
        let idx = self.require_current(player_id)?;
        if self.phase != GamePhase::Playing {
            return Err(ActionError::WrongPhase);
        }
        if self.drawn_card.is_some() {
            return Err(ActionError::AlreadyDrawn);
        }
        if self.pending_flip.is_some() {
            return Err(ActionError::FlipRequired);
        }
        if self.finisher_id.is_some() {
            return Err(ActionError::FinisherAlreadySet);
        }

        let positions = self.players[idx].face_down_positions();
        let mut cards = Vec::with_capacity(positions.len());
        for &pos in &positions {
            self.players[idx].flip_card(pos);
            cards.push(self.players[idx].cards[pos]);
        }

        let payload = EventPayload::KnockEarly { positions, cards };
        let mut events = vec![self.next_event(Some(player_id), payload)];
        self.end_of_turn(player_id, &mut events);
        Ok(events)
    }

    /// The post-discard flip becomes optional once every other player
    /// has revealed their whole hand.
    pub fn flip_is_optional(&self) -> bool {
        let current = match self.current_player() {
            Some(player) => player.id.clone(),
            None => return false,
        };
        self.players
            .iter()
            .filter(|p| p.id != current)
            .all(|p| p.all_face_up())
    }

    // ------------------------------------------------------------------
    // Turn bookkeeping
    // ------------------------------------------------------------------

    fn reshuffle_discard_into_deck(&mut self) -> Option<Card> {
        if self.discard_pile.len() <= 1 {
            return None;
        }
        let top = self.discard_pile.pop().expect("pile has cards");
        let mut rest = std::mem::take(&mut self.discard_pile);
        for card in &mut rest {
            card.face_up = false;
        }
        self.deck.add_cards(rest);
        self.discard_pile.push(top);
        self.deck.draw()
    }

    fn end_of_turn(&mut self, player_id: &str, events: &mut Vec<GameEvent>) {
        let finished = self
            .get_player(player_id)
            .map(|p| p.all_face_up())
            .unwrap_or(false);
        if finished && self.finisher_id.is_none() {
            self.finisher_id = Some(player_id.to_string());
            self.phase = GamePhase::FinalTurn;
            self.players_with_final_turn.insert(player_id.to_string());
        }
        self.next_turn(events);
    }

    fn next_turn(&mut self, events: &mut Vec<GameEvent>) {
        if self.players.is_empty() {
            return;
        }
        if self.phase == GamePhase::FinalTurn {
            let next_index = (self.current_player_index + 1) % self.players.len();
            let next_id = self.players[next_index].id.clone();
            if self.players_with_final_turn.contains(&next_id) {
                // Everyone has had their final turn.
                self.end_round(events);
                return;
            }
            self.current_player_index = next_index;
            self.players_with_final_turn.insert(next_id);
        } else {
            self.current_player_index = (self.current_player_index + 1) % self.players.len();
        }
    }

    fn end_round(&mut self, events: &mut Vec<GameEvent>) {
        self.phase = GamePhase::RoundOver;
        self.pending_flip = None;

        for player in &mut self.players {
            for card in &mut player.cards {
                card.face_up = true;
            }
        }

        let mut scores: Vec<i32> = self
            .players
            .iter()
            .map(|p| scoring::score_hand(&p.cards, &self.options))
            .collect();
        let finisher_idx = self
            .finisher_id
            .as_deref()
            .and_then(|id| self.players.iter().position(|p| p.id == id));
        scoring::apply_round_modifiers(&mut scores, finisher_idx, &self.options);

        let mut score_map = BTreeMap::new();
        let mut hand_map = BTreeMap::new();
        for (player, score) in self.players.iter_mut().zip(&scores) {
            player.score = *score;
            player.total_score += *score;
            score_map.insert(player.id.clone(), *score);
            hand_map.insert(player.id.clone(), player.cards.clone());
        }

        if let Some(min) = scores.iter().min().copied() {
            for (player, score) in self.players.iter_mut().zip(&scores) {
                if *score == min {
                    player.rounds_won += 1;
                }
            }
        }

        let payload = EventPayload::RoundEnded {
            scores: score_map,
            final_hands: hand_map,
        };
        events.push(self.next_event(None, payload));
    }
}
