use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::engine::{scoring, Card, DrawSource, GolfGame, PlayerId, HAND_SIZE};

/// A named CPU personality: policy parameters plus the display strings
/// shown to players. Each profile seats at most one active CPU at a
/// time.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuProfile {
    pub name: String,
    pub style: String,
    /// Swap when the drawn card's value is at or below this.
    pub swap_threshold: i32,
    /// Tendency to hold cards hoping to complete a column pair.
    pub pair_hope: f64,
    /// Tendency to race for going out early.
    pub aggression: f64,
    /// Chance of an off-script play.
    pub unpredictability: f64,
}

impl CpuProfile {
    fn new(
        name: &str,
        style: &str,
        swap_threshold: i32,
        pair_hope: f64,
        aggression: f64,
        unpredictability: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            style: style.to_string(),
            swap_threshold,
            pair_hope,
            aggression,
            unpredictability,
        }
    }
}

/// Listing shape sent to clients; policy parameters stay server-side.
#[derive(Clone, Debug, Serialize)]
pub struct CpuProfileInfo {
    pub name: String,
    pub style: String,
}

pub static CPU_PROFILES: Lazy<Vec<CpuProfile>> = Lazy::new(|| {
    vec![
        CpuProfile::new("Sofia", "Calculated & Patient", 4, 0.2, 0.2, 0.02),
        CpuProfile::new("Maya", "Aggressive Closer", 6, 0.4, 0.85, 0.1),
        CpuProfile::new("Priya", "Pair Hunter", 7, 0.8, 0.5, 0.05),
        CpuProfile::new("Marcus", "Steady Eddie", 5, 0.35, 0.4, 0.03),
        CpuProfile::new("Kenji", "Risk Taker", 8, 0.7, 0.75, 0.12),
        CpuProfile::new("Diego", "Chaotic Gambler", 6, 0.5, 0.6, 0.28),
        CpuProfile::new("River", "Adaptive Strategist", 5, 0.45, 0.55, 0.08),
        CpuProfile::new("Sage", "Sneaky Finisher", 5, 0.3, 0.9, 0.15),
    ]
});

/// Refcounted pool of profile tokens: `assign` takes one, `release`
/// returns it, and a room teardown must release every seat it took.
#[derive(Default)]
pub struct CpuProfileRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    in_use: HashSet<String>,
    assignments: HashMap<PlayerId, CpuProfile>,
}

impl CpuProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a random available profile to a CPU seat.
    pub fn assign(&self, cpu_id: &str) -> Option<CpuProfile> {
        let mut state = self.inner.lock();
        let available: Vec<&CpuProfile> = CPU_PROFILES
            .iter()
            .filter(|profile| !state.in_use.contains(&profile.name))
            .collect();
        let profile = (*available.choose(&mut rand::thread_rng())?).clone();
        state.in_use.insert(profile.name.clone());
        state.assignments.insert(cpu_id.to_string(), profile.clone());
        Some(profile)
    }

    /// Assign a specific profile by name if it exists and is free.
    pub fn assign_named(&self, cpu_id: &str, profile_name: &str) -> Option<CpuProfile> {
        let mut state = self.inner.lock();
        let profile = CPU_PROFILES
            .iter()
            .find(|profile| profile.name == profile_name && !state.in_use.contains(&profile.name))?
            .clone();
        state.in_use.insert(profile.name.clone());
        state.assignments.insert(cpu_id.to_string(), profile.clone());
        Some(profile)
    }

    /// Return a seat's token to the pool.
    pub fn release_seat(&self, cpu_id: &str) {
        let mut state = self.inner.lock();
        if let Some(profile) = state.assignments.remove(cpu_id) {
            state.in_use.remove(&profile.name);
        }
    }

    pub fn profile_for(&self, cpu_id: &str) -> Option<CpuProfile> {
        self.inner.lock().assignments.get(cpu_id).cloned()
    }

    pub fn all_profiles(&self) -> Vec<CpuProfileInfo> {
        CPU_PROFILES
            .iter()
            .map(|profile| CpuProfileInfo {
                name: profile.name.clone(),
                style: profile.style.clone(),
            })
            .collect()
    }

    pub fn assigned_count(&self) -> usize {
        self.inner.lock().assignments.len()
    }
}

/// What a CPU does with a drawn card.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuAction {
    Swap { position: usize },
    Discard,
}

pub type SharedCpuPolicy = Arc<dyn CpuPolicy>;

/// Decision interface the orchestrator calls when driving a CPU seat.
/// The CPU acts through the same engine operations as a human; richer
/// heuristics plug in behind this trait.
pub trait CpuPolicy: Send + Sync {
    fn choose_initial_flips(&self, count: usize) -> Vec<usize>;
    fn choose_draw(&self, game: &GolfGame, player_id: &str, profile: &CpuProfile) -> DrawSource;
    fn choose_action(
        &self,
        game: &GolfGame,
        player_id: &str,
        drawn: &Card,
        profile: &CpuProfile,
    ) -> CpuAction;
    fn choose_flip(&self, game: &GolfGame, player_id: &str, profile: &CpuProfile) -> usize;
}

/// The built-in policy: take obviously good cards, pair columns when
/// possible, replace the worst visible card, otherwise discard.
pub struct HouseCpu;

impl HouseCpu {
    /// Position whose card pairs the given rank through an unmatched
    /// column, if any.
    fn pairing_position(game: &GolfGame, player_id: &str, card: &Card) -> Option<usize> {
        let player = game.get_player(player_id)?;
        for col in 0..3 {
            let top = &player.cards[col];
            let bottom = &player.cards[col + 3];
            if top.face_up && top.rank == card.rank && !bottom.face_up {
                return Some(col + 3);
            }
            if bottom.face_up && bottom.rank == card.rank && !top.face_up {
                return Some(col);
            }
        }
        None
    }

    /// Face-up position holding the worst card, by value under the
    /// active options.
    fn worst_face_up(game: &GolfGame, player_id: &str) -> Option<(usize, i32)> {
        let player = game.get_player(player_id)?;
        player
            .cards
            .iter()
            .enumerate()
            .filter(|(_, card)| card.face_up)
            .map(|(idx, card)| (idx, scoring::card_value(card, &game.options)))
            .max_by_key(|(_, value)| *value)
    }
}

impl CpuPolicy for HouseCpu {
    fn choose_initial_flips(&self, count: usize) -> Vec<usize> {
        let mut rng = rand::thread_rng();
        match count {
            0 => Vec::new(),
            1 => vec![rng.gen_range(0..HAND_SIZE)],
            _ => {
                // Prefer two different columns for pair information.
                let spreads: [[usize; 2]; 6] =
                    [[0, 4], [2, 4], [3, 1], [5, 1], [0, 5], [2, 3]];
                spreads.choose(&mut rng).expect("non-empty").to_vec()
            }
        }
    }

    fn choose_draw(&self, game: &GolfGame, player_id: &str, profile: &CpuProfile) -> DrawSource {
        let Some(top) = game.discard_pile.last() else {
            return DrawSource::Deck;
        };
        if Self::pairing_position(game, player_id, top).is_some() {
            return DrawSource::Discard;
        }
        let value = scoring::card_value(top, &game.options);
        if value <= profile.swap_threshold - 2 {
            return DrawSource::Discard;
        }
        DrawSource::Deck
    }

    fn choose_action(
        &self,
        game: &GolfGame,
        player_id: &str,
        drawn: &Card,
        profile: &CpuProfile,
    ) -> CpuAction {
        if let Some(position) = Self::pairing_position(game, player_id, drawn) {
            return CpuAction::Swap { position };
        }

        let value = scoring::card_value(drawn, &game.options);
        if value <= profile.swap_threshold {
            // Improve the worst visible card, or probe a hidden slot.
            if let Some((position, worst)) = Self::worst_face_up(game, player_id) {
                if worst > value {
                    return CpuAction::Swap { position };
                }
            }
            if let Some(player) = game.get_player(player_id) {
                if let Some(position) = player.face_down_positions().first().copied() {
                    return CpuAction::Swap { position };
                }
            }
        }
        CpuAction::Discard
    }

    fn choose_flip(&self, game: &GolfGame, player_id: &str, _profile: &CpuProfile) -> usize {
        game.get_player(player_id)
            .and_then(|player| player.face_down_positions().first().copied())
            .unwrap_or(0)
    }
}
