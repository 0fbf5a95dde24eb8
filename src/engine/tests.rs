#![cfg(test)]

use uuid::Uuid;

use super::cards::{Card, Deck, Rank, Suit};
use super::errors::ActionError;
use super::game::GolfGame;
use super::options::GameOptions;
use super::scoring::{apply_round_modifiers, card_value, score_hand};
use super::state::{DrawSource, GamePhase};
use crate::events::{EventType, GameEvent};

fn card(suit: Suit, rank: Rank) -> Card {
    Card::new(suit, rank)
}

fn hand(ranks: [Rank; 6]) -> Vec<Card> {
    let suits = [
        Suit::Hearts,
        Suit::Diamonds,
        Suit::Clubs,
        Suit::Spades,
        Suit::Hearts,
        Suit::Diamonds,
    ];
    ranks
        .iter()
        .zip(suits)
        .map(|(rank, suit)| card(suit, *rank))
        .collect()
}

/// A game plus the full event stream it has emitted.
struct Table {
    game: GolfGame,
    events: Vec<GameEvent>,
}

impl Table {
    fn new(players: usize) -> Self {
        let mut game = GolfGame::new(Uuid::new_v4(), "TEST");
        let mut events = vec![game.emit_game_created("p1")];
        for idx in 1..=players {
            events.push(
                game.add_player(format!("p{idx}"), format!("Player {idx}"), false, None)
                    .expect("seat available"),
            );
        }
        Self { game, events }
    }

    fn start(&mut self, options: GameOptions, seed: u64) {
        let new_events = self
            .game
            .start_game(1, 1, options, Some(seed))
            .expect("start game");
        self.events.extend(new_events);
    }

    fn act(&mut self, op: impl FnOnce(&mut GolfGame) -> Result<Vec<GameEvent>, ActionError>) {
        let events = op(&mut self.game).expect("action accepted");
        self.events.extend(events);
    }
}

// ---------------------------------------------------------------------
// Deck
// ---------------------------------------------------------------------

#[test]
fn same_seed_same_order() {
    let mut a = Deck::new(1, false, false, Some(12345));
    let mut b = Deck::new(1, false, false, Some(12345));
    for _ in 0..10 {
        let ca = a.draw().unwrap();
        let cb = b.draw().unwrap();
        assert_eq!(ca.rank, cb.rank);
        assert_eq!(ca.suit, cb.suit);
    }
}

#[test]
fn different_seed_different_order() {
    let mut a = Deck::new(1, false, false, Some(12345));
    let mut b = Deck::new(1, false, false, Some(54321));
    let differences = (0..52)
        .filter(|_| {
            let ca = a.draw().unwrap();
            let cb = b.draw().unwrap();
            ca.rank != cb.rank || ca.suit != cb.suit
        })
        .count();
    assert!(differences > 10);
}

#[test]
fn deck_composition_follows_variants() {
    assert_eq!(Deck::new(1, false, false, Some(1)).remaining(), 52);
    assert_eq!(Deck::new(2, false, false, Some(1)).remaining(), 104);
    // Two jokers per physical deck.
    assert_eq!(Deck::new(2, true, false, Some(1)).remaining(), 108);
    // Lucky Swing: one joker for the whole game.
    assert_eq!(Deck::new(2, true, true, Some(1)).remaining(), 105);
}

#[test]
fn reshuffles_are_reproducible_for_a_seed() {
    let run = |seed| {
        let mut deck = Deck::new(1, false, false, Some(seed));
        let drawn: Vec<Card> = (0..5).map(|_| deck.draw().unwrap()).collect();
        deck.add_cards(drawn);
        (0..52).map(|_| deck.draw().unwrap().rank).collect::<Vec<_>>()
    };
    assert_eq!(run(7), run(7));
}

// ---------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------

#[test]
fn column_pair_scores_zero() {
    // K♥ over K♣ cancels; the remaining columns count in full.
    let cards = vec![
        card(Suit::Hearts, Rank::King),
        card(Suit::Diamonds, Rank::Five),
        card(Suit::Spades, Rank::Seven),
        card(Suit::Clubs, Rank::King),
        card(Suit::Hearts, Rank::Nine),
        card(Suit::Diamonds, Rank::Three),
    ];
    assert_eq!(score_hand(&cards, &GameOptions::default()), 24);
}

#[test]
fn score_is_independent_of_order_within_column() {
    let options = GameOptions::default();
    let a = hand([
        Rank::King,
        Rank::Five,
        Rank::Seven,
        Rank::King,
        Rank::Nine,
        Rank::Three,
    ]);
    let b = hand([
        Rank::King,
        Rank::Nine,
        Rank::Three,
        Rank::King,
        Rank::Five,
        Rank::Seven,
    ]);
    assert_eq!(score_hand(&a, &options), score_hand(&b, &options));
}

#[test]
fn four_of_a_kind_zeroes_all_four() {
    let options = GameOptions {
        four_of_a_kind: true,
        ..GameOptions::default()
    };
    let cards = hand([
        Rank::Nine,
        Rank::Nine,
        Rank::Five,
        Rank::Nine,
        Rank::Nine,
        Rank::Three,
    ]);
    // Only the unmatched (5, 3) column counts.
    assert_eq!(score_hand(&cards, &options), 8);
}

#[test]
fn queens_wild_pairs_with_anything() {
    let options = GameOptions {
        queens_wild: true,
        ..GameOptions::default()
    };
    let cards = hand([
        Rank::Queen,
        Rank::Five,
        Rank::Seven,
        Rank::Nine,
        Rank::Five,
        Rank::Three,
    ]);
    // Queen pairs the 9; middle column pairs naturally; last column counts.
    assert_eq!(score_hand(&cards, &options), 10);
}

#[test]
fn eagle_eye_jokers_compound() {
    let options = GameOptions {
        use_jokers: true,
        eagle_eye: true,
        ..GameOptions::default()
    };
    let cards = hand([
        Rank::Joker,
        Rank::Five,
        Rank::Seven,
        Rank::Joker,
        Rank::Five,
        Rank::Seven,
    ]);
    assert_eq!(score_hand(&cards, &options), -8);
}

#[test]
fn value_modifiers_apply_per_variant() {
    let base = GameOptions::default();
    let king = card(Suit::Hearts, Rank::King);
    let seven = card(Suit::Hearts, Rank::Seven);
    let ten = card(Suit::Hearts, Rank::Ten);
    let joker = card(Suit::Hearts, Rank::Joker);

    assert_eq!(card_value(&king, &base), 0);
    assert_eq!(card_value(&seven, &base), 7);
    assert_eq!(card_value(&ten, &base), 10);
    assert_eq!(card_value(&joker, &base), -2);

    let options = GameOptions {
        super_kings: true,
        lucky_sevens: true,
        ten_penny: true,
        lucky_swing: true,
        ..base
    };
    assert_eq!(card_value(&king, &options), -2);
    assert_eq!(card_value(&seven, &options), 0);
    assert_eq!(card_value(&ten, &options), 1);
    assert_eq!(card_value(&joker, &options), -5);
}

#[test]
fn blackjack_then_underdog_bonus() {
    let options = GameOptions {
        blackjack: true,
        underdog_bonus: true,
        ..GameOptions::default()
    };
    let mut scores = [21, 10, 10];
    apply_round_modifiers(&mut scores, None, &options);
    assert_eq!(scores, [-3, 10, 10]);
}

#[test]
fn knock_penalty_only_without_lowest() {
    let options = GameOptions {
        knock_penalty: true,
        ..GameOptions::default()
    };
    let mut scores = [12, 5];
    apply_round_modifiers(&mut scores, Some(0), &options);
    assert_eq!(scores, [22, 5]);

    let mut scores = [4, 5];
    apply_round_modifiers(&mut scores, Some(0), &options);
    assert_eq!(scores, [4, 5]);
}

#[test]
fn knock_bonus_applies_to_finisher() {
    let options = GameOptions {
        knock_bonus: true,
        ..GameOptions::default()
    };
    let mut scores = [12, 5];
    apply_round_modifiers(&mut scores, Some(1), &options);
    assert_eq!(scores, [12, 0]);
}

#[test]
fn tied_shame_counts_before_applying() {
    let options = GameOptions {
        tied_shame: true,
        ..GameOptions::default()
    };
    let mut scores = [10, 10, 15];
    apply_round_modifiers(&mut scores, None, &options);
    // Both tied players move to 15 without re-triggering on the third.
    assert_eq!(scores, [15, 15, 15]);
}

// ---------------------------------------------------------------------
// Phase machine
// ---------------------------------------------------------------------

fn no_flip_options() -> GameOptions {
    GameOptions {
        initial_flips: 0,
        ..GameOptions::default()
    }
}

#[test]
fn deal_gives_everyone_six_cards() {
    let mut table = Table::new(3);
    table.start(GameOptions::default(), 9);
    for player in &table.game.players {
        assert_eq!(player.cards.len(), 6);
        assert!(player.cards.iter().all(|card| !card.face_up));
    }
    assert_eq!(table.game.phase, GamePhase::InitialFlip);
}

#[test]
fn zero_initial_flips_skips_the_phase() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    assert_eq!(table.game.phase, GamePhase::Playing);
    // The first draw is immediately valid.
    table.act(|game| game.draw_card("p1", DrawSource::Deck));
}

#[test]
fn initial_flips_gate_the_playing_phase() {
    let mut table = Table::new(2);
    table.start(GameOptions::default(), 9);

    table.act(|game| game.flip_initial_cards("p1", &[0, 4]));
    assert_eq!(table.game.phase, GamePhase::InitialFlip);
    assert_eq!(
        table.game.flip_initial_cards("p1", &[1, 2]).unwrap_err(),
        ActionError::AlreadyFlipped
    );

    table.act(|game| game.flip_initial_cards("p2", &[2, 3]));
    assert_eq!(table.game.phase, GamePhase::Playing);
}

#[test]
fn swap_during_initial_flip_is_rejected() {
    let mut table = Table::new(2);
    table.start(GameOptions::default(), 9);
    assert_eq!(
        table.game.swap_card("p1", 0).unwrap_err(),
        ActionError::NothingDrawn
    );
    assert_eq!(
        table.game.draw_card("p1", DrawSource::Deck).unwrap_err(),
        ActionError::WrongPhase
    );
}

#[test]
fn wrong_flip_count_is_rejected() {
    let mut table = Table::new(2);
    table.start(GameOptions::default(), 9);
    assert_eq!(
        table.game.flip_initial_cards("p1", &[0]).unwrap_err(),
        ActionError::WrongFlipCount {
            expected: 2,
            got: 1
        }
    );
    assert_eq!(
        table.game.flip_initial_cards("p1", &[1, 1]).unwrap_err(),
        ActionError::DuplicatePosition
    );
}

#[test]
fn discard_sourced_card_cannot_be_rediscarded() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    table.act(|game| game.draw_card("p1", DrawSource::Discard));
    assert_eq!(
        table.game.discard_drawn("p1").unwrap_err(),
        ActionError::MustSwapDiscardDraw
    );
    // Swapping is the only way out.
    table.act(|game| game.swap_card("p1", 2));
    assert_eq!(table.game.current_player().unwrap().id, "p2");
}

#[test]
fn cancel_draw_restores_the_pile() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    let top_before = *table.game.discard_pile.last().unwrap();

    table.act(|game| game.draw_card("p1", DrawSource::Discard));
    table.act(|game| game.cancel_draw("p1"));

    let top_after = *table.game.discard_pile.last().unwrap();
    assert!(top_before.same_card(&top_after));
    assert!(table.game.drawn_card.is_none());
    // The turn was not spent.
    assert_eq!(table.game.current_player().unwrap().id, "p1");
}

#[test]
fn cancel_requires_a_discard_draw() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    table.act(|game| game.draw_card("p1", DrawSource::Deck));
    assert_eq!(
        table.game.cancel_draw("p1").unwrap_err(),
        ActionError::NothingToCancel
    );
}

#[test]
fn non_current_player_is_rejected() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    assert_eq!(
        table.game.draw_card("p2", DrawSource::Deck).unwrap_err(),
        ActionError::NotCurrentPlayer
    );
}

#[test]
fn second_draw_is_rejected() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    table.act(|game| game.draw_card("p1", DrawSource::Deck));
    assert_eq!(
        table.game.draw_card("p1", DrawSource::Deck).unwrap_err(),
        ActionError::AlreadyDrawn
    );
}

#[test]
fn flip_on_discard_defers_the_turn() {
    // Scenario: flip_on_discard on, player discards a deck draw, the
    // turn waits for the flip.
    let options = GameOptions {
        flip_on_discard: true,
        ..no_flip_options()
    };
    let mut table = Table::new(2);
    table.start(options, 9);

    table.act(|game| game.draw_card("p1", DrawSource::Deck));
    table.act(|game| game.discard_drawn("p1"));
    assert_eq!(table.game.pending_flip.as_deref(), Some("p1"));
    assert_eq!(table.game.current_player().unwrap().id, "p1");

    // Drawing again while the flip is owed is rejected.
    assert_eq!(
        table.game.draw_card("p1", DrawSource::Deck).unwrap_err(),
        ActionError::FlipRequired
    );

    let face_down = table.game.get_player("p1").unwrap().face_down_positions()[1];
    table.act(|game| game.flip_and_end_turn("p1", face_down));
    assert!(table.game.pending_flip.is_none());
    assert_eq!(table.game.current_player().unwrap().id, "p2");
}

#[test]
fn flip_without_pending_is_rejected() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    assert_eq!(
        table.game.flip_and_end_turn("p1", 0).unwrap_err(),
        ActionError::NoFlipPending
    );
}

#[test]
fn knock_early_reveals_and_triggers_final_turn() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    table.act(|game| game.knock_early("p1"));

    assert!(table.game.get_player("p1").unwrap().all_face_up());
    assert_eq!(table.game.finisher_id.as_deref(), Some("p1"));
    assert_eq!(table.game.phase, GamePhase::FinalTurn);
    assert_eq!(table.game.current_player().unwrap().id, "p2");

    // p2 gets exactly one more turn, then the round ends.
    table.act(|game| game.draw_card("p2", DrawSource::Deck));
    table.act(|game| game.discard_drawn("p2"));
    assert_eq!(table.game.phase, GamePhase::RoundOver);
}

#[test]
fn flip_as_action_spends_the_turn() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    table.act(|game| game.flip_card_as_action("p1", 3));
    assert!(table.game.get_player("p1").unwrap().cards[3].face_up);
    assert_eq!(table.game.current_player().unwrap().id, "p2");
}

#[test]
fn skip_flip_only_in_the_endgame() {
    let options = GameOptions {
        flip_on_discard: true,
        ..no_flip_options()
    };
    let mut table = Table::new(2);
    table.start(options, 9);

    table.act(|game| game.draw_card("p1", DrawSource::Deck));
    table.act(|game| game.discard_drawn("p1"));
    assert_eq!(
        table.game.skip_flip("p1").unwrap_err(),
        ActionError::FlipNotOptional
    );
}

#[test]
fn exhausted_deck_and_single_discard_end_the_round() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    // Force the boundary directly: empty deck, one-card discard pile.
    table.game.deck = Deck::empty();
    table.game.discard_pile.truncate(1);

    let events = table
        .game
        .draw_card("p1", DrawSource::Deck)
        .expect("ends round");
    assert_eq!(table.game.phase, GamePhase::RoundOver);
    assert!(events
        .iter()
        .any(|event| event.event_type() == EventType::RoundEnded));
}

#[test]
fn empty_deck_reshuffles_all_but_the_top_discard() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 9);
    table.game.deck = Deck::empty();
    // Seed a four-card pile; three go back into the deck.
    table.game.discard_pile = vec![
        card(Suit::Hearts, Rank::Two).face_up(),
        card(Suit::Clubs, Rank::Five).face_up(),
        card(Suit::Spades, Rank::Nine).face_up(),
        card(Suit::Diamonds, Rank::King).face_up(),
    ];

    table.act(|game| game.draw_card("p1", DrawSource::Deck));
    assert!(table.game.drawn_card.is_some());
    assert_eq!(table.game.discard_pile.len(), 1);
    assert_eq!(table.game.discard_pile[0].rank, Rank::King);
    assert_eq!(table.game.deck.remaining(), 2);
    assert_eq!(table.game.phase, GamePhase::Playing);
}

// ---------------------------------------------------------------------
// Full round flow
// ---------------------------------------------------------------------

/// Play the scripted round from the determinism scenario: p1 swaps
/// into every position while p2 draws and discards.
fn play_scripted_round(table: &mut Table) {
    for position in 0..6 {
        table.act(|game| game.draw_card("p1", DrawSource::Deck));
        table.act(|game| game.swap_card("p1", position));
        if table.game.phase == GamePhase::RoundOver {
            return;
        }
        table.act(|game| game.draw_card("p2", DrawSource::Deck));
        table.act(|game| game.discard_drawn("p2"));
    }
}

#[test]
fn finisher_gets_final_turn_semantics() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 42);
    play_scripted_round(&mut table);

    assert_eq!(table.game.phase, GamePhase::RoundOver);
    assert_eq!(table.game.finisher_id.as_deref(), Some("p1"));
    for player in &table.game.players {
        assert_eq!(player.cards.len(), 6);
        assert!(player.all_face_up());
    }

    // Engine scores equal a recomputation over the revealed hands.
    for player in &table.game.players {
        assert_eq!(player.score, score_hand(&player.cards, &table.game.options));
        assert_eq!(player.total_score, player.score);
    }
    let min = table.game.players.iter().map(|p| p.score).min().unwrap();
    for player in &table.game.players {
        assert_eq!(player.rounds_won, u32::from(player.score == min));
    }
}

#[test]
fn identical_seed_and_script_produce_identical_hands() {
    let run = |seed| {
        let mut table = Table::new(2);
        table.start(no_flip_options(), seed);
        play_scripted_round(&mut table);
        table
            .game
            .players
            .iter()
            .map(|p| (p.cards.clone(), p.score))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(42), run(42));
}

#[test]
fn next_round_after_the_last_ends_the_game() {
    let mut table = Table::new(2);
    table.start(no_flip_options(), 42);
    play_scripted_round(&mut table);
    assert_eq!(table.game.phase, GamePhase::RoundOver);

    let events = table.game.start_next_round(None).expect("transition");
    assert_eq!(table.game.phase, GamePhase::GameOver);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), EventType::GameEnded);
}

#[test]
fn multi_round_games_deal_again() {
    let mut game = GolfGame::new(Uuid::new_v4(), "TEST");
    game.emit_game_created("p1");
    game.add_player("p1", "Player 1", false, None).unwrap();
    game.add_player("p2", "Player 2", false, None).unwrap();
    game.start_game(1, 3, no_flip_options(), Some(42)).unwrap();

    let mut table = Table {
        game,
        events: Vec::new(),
    };
    play_scripted_round(&mut table);
    assert_eq!(table.game.phase, GamePhase::RoundOver);

    let events = table.game.start_next_round(Some(43)).expect("next round");
    assert_eq!(table.game.current_round, 2);
    assert_eq!(table.game.phase, GamePhase::Playing);
    assert_eq!(events[0].event_type(), EventType::RoundStarted);
    assert!(table.game.finisher_id.is_none());
    for player in &table.game.players {
        assert_eq!(player.cards.len(), 6);
        assert!(!player.all_face_up());
    }
}
