use std::collections::HashMap;

use super::cards::{Card, Rank};
use super::options::GameOptions;

/// Point value of a single card with house rules applied. Rule variants
/// never mutate the card; they are applied here at valuation time.
pub fn card_value(card: &Card, options: &GameOptions) -> i32 {
    match card.rank {
        Rank::Joker if options.lucky_swing => -5,
        Rank::King if options.super_kings => -2,
        Rank::Seven if options.lucky_sevens => 0,
        Rank::Ten if options.ten_penny => 1,
        rank => rank.base_value(),
    }
}

fn cards_match(a: &Card, b: &Card, options: &GameOptions) -> bool {
    if a.rank == b.rank {
        return true;
    }
    options.queens_wild && (a.rank == Rank::Queen || b.rank == Rank::Queen)
}

/// Score a 6-card hand laid out as two rows of three. Columns are
/// (0,3), (1,4), (2,5); a matching column scores zero.
pub fn score_hand(cards: &[Card], options: &GameOptions) -> i32 {
    if cards.len() != 6 {
        return 0;
    }

    // Four of a kind: four (or more) cards of one rank all score zero.
    let mut quad = [false; 6];
    if options.four_of_a_kind {
        let mut by_rank: HashMap<Rank, Vec<usize>> = HashMap::new();
        for (idx, card) in cards.iter().enumerate() {
            by_rank.entry(card.rank).or_default().push(idx);
        }
        for positions in by_rank.values() {
            if positions.len() >= 4 {
                for &idx in positions {
                    quad[idx] = true;
                }
            }
        }
    }

    let mut total = 0;
    for col in 0..3 {
        let top_idx = col;
        let bottom_idx = col + 3;
        let top = &cards[top_idx];
        let bottom = &cards[bottom_idx];

        if quad[top_idx] && quad[bottom_idx] {
            continue;
        }

        if cards_match(top, bottom, options) {
            // Eagle Eye: paired jokers compound to -8 instead of canceling.
            if options.eagle_eye && top.rank == Rank::Joker && bottom.rank == Rank::Joker {
                total -= 8;
            }
            continue;
        }

        if !quad[top_idx] {
            total += card_value(top, options);
        }
        if !quad[bottom_idx] {
            total += card_value(bottom, options);
        }
    }

    total
}

/// Global round-end modifiers, applied to per-hand scores in a fixed
/// order: blackjack, knock_penalty, knock_bonus, underdog_bonus,
/// tied_shame.
pub fn apply_round_modifiers(scores: &mut [i32], finisher: Option<usize>, options: &GameOptions) {
    if scores.is_empty() {
        return;
    }

    if options.blackjack {
        for score in scores.iter_mut() {
            if *score == 21 {
                *score = 0;
            }
        }
    }

    if options.knock_penalty {
        if let Some(idx) = finisher {
            let min = *scores.iter().min().expect("non-empty scores");
            if scores[idx] > min {
                scores[idx] += 10;
            }
        }
    }

    if options.knock_bonus {
        if let Some(idx) = finisher {
            scores[idx] -= 5;
        }
    }

    if options.underdog_bonus {
        let min = *scores.iter().min().expect("non-empty scores");
        for score in scores.iter_mut() {
            if *score == min {
                *score -= 3;
            }
        }
    }

    if options.tied_shame {
        let mut counts: HashMap<i32, usize> = HashMap::new();
        for score in scores.iter() {
            *counts.entry(*score).or_insert(0) += 1;
        }
        for score in scores.iter_mut() {
            if counts[score] > 1 {
                *score += 5;
            }
        }
    }
}
