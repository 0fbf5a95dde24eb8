use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::engine::GamePhase;
use crate::room::{CpuAction, Room};

use super::handlers::broadcast_game_state;
use super::AppEnv;

const LOG_TARGET: &str = "server::cpu";

/// Kick off CPU turn driving for a room. Runs as its own task so the
/// triggering handler returns immediately.
pub fn spawn_cpu_turns(env: &Arc<AppEnv>, room: &Arc<Room>) {
    let env = Arc::clone(env);
    let room = Arc::clone(room);
    tokio::spawn(run_cpu_turns(env, room));
}

/// Drive CPU seats while they hold the turn, chaining through
/// consecutive CPUs. Pacing delays are bounded so a chain of CPUs can
/// never starve human notifications.
pub async fn run_cpu_turns(env: Arc<AppEnv>, room: Arc<Room>) {
    loop {
        let (cpu_id, profile) = {
            let state = room.lock().await;
            if !matches!(state.game.phase, GamePhase::Playing | GamePhase::FinalTurn) {
                return;
            }
            let Some(current) = state.game.current_player() else {
                return;
            };
            if !current.is_cpu {
                return;
            }
            let cpu_id = current.id.clone();
            let Some(profile) = env.profiles.profile_for(&cpu_id) else {
                warn!(target: LOG_TARGET, %cpu_id, "cpu seat has no profile");
                return;
            };
            (cpu_id, profile)
        };

        // Thinking time, taken outside the room lock.
        let think = Duration::from_millis(rand::thread_rng().gen_range(400..=1200));
        tokio::time::sleep(think).await;

        let mut state = room.lock().await;
        if !matches!(state.game.phase, GamePhase::Playing | GamePhase::FinalTurn) {
            return;
        }
        // Membership may have changed while we slept.
        if state.game.current_player().map(|p| p.id.as_str()) != Some(cpu_id.as_str()) {
            continue;
        }

        let source = env.policy.choose_draw(&state.game, &cpu_id, &profile);
        let events = match state.game.draw_card(&cpu_id, source) {
            Ok(events) => events,
            Err(err) => {
                warn!(target: LOG_TARGET, %cpu_id, %err, "cpu draw rejected");
                return;
            }
        };
        if let Err(err) = super::handlers::commit(&env, &room.code, &mut state, &events)
            .await
        {
            warn!(target: LOG_TARGET, %cpu_id, ?err, "cpu draw commit failed");
            return;
        }
        broadcast_game_state(&state);

        let Some(drawn) = state.game.drawn_card else {
            // The deck ran dry and the round ended during the draw.
            continue;
        };

        // A short reveal pause; the only sleep taken under the lock.
        let pause = Duration::from_millis(rand::thread_rng().gen_range(200..=500));
        tokio::time::sleep(pause).await;

        let mut action = env.policy.choose_action(&state.game, &cpu_id, &drawn, &profile);
        if action == CpuAction::Discard && state.game.drawn_from_discard {
            // A discard-pile draw must be swapped somewhere.
            action = CpuAction::Swap {
                position: forced_swap_position(&state.game, &cpu_id),
            };
        }

        let mut events = match action {
            CpuAction::Swap { position } => state.game.swap_card(&cpu_id, position),
            CpuAction::Discard => state.game.discard_drawn(&cpu_id),
        }
        .unwrap_or_else(|err| {
            warn!(target: LOG_TARGET, %cpu_id, %err, "cpu action rejected");
            Vec::new()
        });
        if events.is_empty() {
            return;
        }

        if state.game.pending_flip.as_deref() == Some(cpu_id.as_str()) {
            let position = env.policy.choose_flip(&state.game, &cpu_id, &profile);
            match state.game.flip_and_end_turn(&cpu_id, position) {
                Ok(mut flip_events) => events.append(&mut flip_events),
                Err(err) => {
                    warn!(target: LOG_TARGET, %cpu_id, %err, "cpu flip rejected");
                    return;
                }
            }
        }

        if let Err(err) = super::handlers::commit(&env, &room.code, &mut state, &events)
            .await
        {
            warn!(target: LOG_TARGET, %cpu_id, ?err, "cpu action commit failed");
            return;
        }
        broadcast_game_state(&state);
        drop(state);
    }
}

/// Where a CPU puts a card it was not allowed to discard: the first
/// hidden slot, else the worst face-up card.
fn forced_swap_position(game: &crate::engine::GolfGame, cpu_id: &str) -> usize {
    let Some(player) = game.get_player(cpu_id) else {
        return 0;
    };
    if let Some(position) = player.face_down_positions().first().copied() {
        return position;
    }
    player
        .cards
        .iter()
        .enumerate()
        .max_by_key(|(_, card)| crate::engine::scoring::card_value(card, &game.options))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}
