pub mod event;
pub mod replay;

pub use event::{EventPayload, EventType, GameEvent};
pub use replay::{rebuild_state, RebuiltGameState, RebuiltPlayer, ReplayError};

#[cfg(test)]
mod tests;
