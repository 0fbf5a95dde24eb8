use std::sync::Arc;

use crate::cache::SharedStateCache;
use crate::pubsub::GamePubSub;
use crate::room::{CpuProfileRegistry, RoomManager, SharedCpuPolicy};
use crate::store::{SharedEventStore, SharedGameDirectory};

pub mod bootstrap;
pub mod cpu_driver;
pub mod handlers;
pub mod matchmaking;
pub mod messages;
pub mod ws;

pub use bootstrap::{run_server, ServerConfig};
pub use handlers::ConnectionContext;
pub use messages::{ClientMessage, ServerMessage};

/// Every subsystem the dispatcher needs, composed once at startup and
/// passed down. Nothing in here is a lazy global.
pub struct AppEnv {
    pub server_id: String,
    pub rooms: RoomManager,
    pub events: SharedEventStore,
    pub directory: SharedGameDirectory,
    pub cache: SharedStateCache,
    pub bus: Arc<GamePubSub>,
    pub profiles: Arc<CpuProfileRegistry>,
    pub policy: SharedCpuPolicy,
    pub queue: matchmaking::MatchQueue,
}
