use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    #[serde(rename = "A")]
    Ace,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "9")]
    Nine,
    #[serde(rename = "10")]
    Ten,
    #[serde(rename = "J")]
    Jack,
    #[serde(rename = "Q")]
    Queen,
    #[serde(rename = "K")]
    King,
    #[serde(rename = "★")]
    Joker,
}

impl Rank {
    /// Every rank printed on a physical deck, Jokers excluded.
    pub const STANDARD: [Rank; 13] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
    ];

    /// Point value before any house-rule modifiers.
    pub fn base_value(self) -> i32 {
        match self {
            Rank::Ace => 1,
            Rank::Two => -2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Eight => 8,
            Rank::Nine => 9,
            Rank::Ten => 10,
            Rank::Jack => 10,
            Rank::Queen => 10,
            Rank::King => 0,
            Rank::Joker => -2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
    #[serde(default)]
    pub face_up: bool,
}

impl Card {
    pub fn new(suit: Suit, rank: Rank) -> Self {
        Self {
            suit,
            rank,
            face_up: false,
        }
    }

    pub fn face_up(mut self) -> Self {
        self.face_up = true;
        self
    }

    /// Identity comparison ignoring orientation.
    pub fn same_card(&self, other: &Card) -> bool {
        self.suit == other.suit && self.rank == other.rank
    }
}

/// An ordered pile of cards drawn from the end. The shuffle (and every
/// later reshuffle) comes from a single rng stream seeded by a recorded
/// value, so a deck rebuilt from the same seed deals identically.
#[derive(Clone, Debug)]
pub struct Deck {
    cards: Vec<Card>,
    seed: u64,
    rng: StdRng,
}

impl Deck {
    pub fn new(num_decks: u8, use_jokers: bool, lucky_swing: bool, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cards = Self::full_set(num_decks, use_jokers, lucky_swing);
        cards.shuffle(&mut rng);
        Self { cards, seed, rng }
    }

    /// The unshuffled multiset a fresh deck is built from.
    pub fn full_set(num_decks: u8, use_jokers: bool, lucky_swing: bool) -> Vec<Card> {
        let mut cards = Vec::with_capacity(usize::from(num_decks) * 54 + 1);
        for _ in 0..num_decks {
            for suit in Suit::ALL {
                for rank in Rank::STANDARD {
                    cards.push(Card::new(suit, rank));
                }
            }
            if use_jokers && !lucky_swing {
                cards.push(Card::new(Suit::Hearts, Rank::Joker));
                cards.push(Card::new(Suit::Spades, Rank::Joker));
            }
        }
        // Lucky Swing plays with a single joker for the whole game.
        if use_jokers && lucky_swing {
            cards.push(Card::new(Suit::Hearts, Rank::Joker));
        }
        cards
    }

    /// Placeholder used before the first round is dealt.
    pub fn empty() -> Self {
        Self {
            cards: Vec::new(),
            seed: 0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Rebuild a deck from a known set of remaining cards, reshuffled
    /// under the recorded seed. Used when resuming a game from the log.
    pub fn from_parts(mut cards: Vec<Card>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        cards.shuffle(&mut rng);
        Self { cards, seed, rng }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn draw(&mut self) -> Option<Card> {
        self.cards.pop()
    }

    pub fn remaining(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Return cards to the deck and reshuffle from the deck's rng stream.
    pub fn add_cards(&mut self, cards: Vec<Card>) {
        self.cards.extend(cards);
        self.cards.shuffle(&mut self.rng);
    }
}
