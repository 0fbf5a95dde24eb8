pub mod cache;
pub mod engine;
pub mod events;
pub mod pubsub;
pub mod recovery;
pub mod room;
pub mod server;
pub mod store;

pub use engine::{GameOptions, GolfGame};
pub use events::{rebuild_state, GameEvent, RebuiltGameState};
