use serde::{Deserialize, Serialize};

/// Rule-variant bundle for a game. Every flag defaults to off and the
/// whole struct deserializes leniently, so unknown inbound flags are
/// ignored and old persisted bundles keep loading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameOptions {
    // Standard options
    pub flip_on_discard: bool,
    /// Cards each player flips before the first turn (0, 1, or 2).
    pub initial_flips: u8,
    pub knock_penalty: bool,
    pub use_jokers: bool,

    // House rules - point modifiers
    pub lucky_swing: bool,
    pub super_kings: bool,
    pub lucky_sevens: bool,
    pub ten_penny: bool,

    // House rules - bonuses and penalties
    pub knock_bonus: bool,
    pub underdog_bonus: bool,
    pub tied_shame: bool,
    pub blackjack: bool,

    // House rules - gameplay twists
    pub queens_wild: bool,
    pub four_of_a_kind: bool,
    pub eagle_eye: bool,

    // Recognized tags whose gameplay effect is still unconfirmed; they
    // are carried so persisted option bundles round-trip unchanged.
    pub wolfpack: bool,
    pub negative_pairs_keep_value: bool,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            flip_on_discard: false,
            initial_flips: 2,
            knock_penalty: false,
            use_jokers: false,
            lucky_swing: false,
            super_kings: false,
            lucky_sevens: false,
            ten_penny: false,
            knock_bonus: false,
            underdog_bonus: false,
            tied_shame: false,
            blackjack: false,
            queens_wild: false,
            four_of_a_kind: false,
            eagle_eye: false,
            wolfpack: false,
            negative_pairs_keep_value: false,
        }
    }
}
