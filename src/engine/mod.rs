pub mod cards;
pub mod errors;
pub mod game;
pub mod options;
pub mod scoring;
pub mod state;
pub mod view;

pub use cards::{Card, Deck, Rank, Suit};
pub use errors::ActionError;
pub use game::GolfGame;
pub use options::GameOptions;
pub use state::{DrawSource, GamePhase, GamePlayer, PlayerId, HAND_SIZE, MAX_PLAYERS};
pub use view::{CardView, GameStateView, PlayerView};

#[cfg(test)]
mod tests;
