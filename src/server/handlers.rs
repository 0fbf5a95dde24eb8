use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{RoomRecord, RoomStatus};
use crate::engine::{CardView, GamePhase, GameOptions, PlayerId};
use crate::events::event::EventPayload;
use crate::events::{rebuild_state, GameEvent, RebuiltGameState};
use crate::pubsub::{BusMessage, BusPayload};
use crate::room::{Room, RoomState};
use crate::store::StoreError;

use super::cpu_driver;
use super::matchmaking::QueuedPlayer;
use super::messages::{ClientMessage, Rankings, ScoreLine, ServerMessage, StartGameParams};
use super::AppEnv;

const LOG_TARGET: &str = "server::handlers";

/// Per-connection state. Nothing else is retained between messages.
pub struct ConnectionContext {
    pub connection_id: Uuid,
    pub player_id: PlayerId,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    pub current_room: Option<Arc<Room>>,
}

impl ConnectionContext {
    pub fn new(sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            player_id: Uuid::new_v4().to_string(),
            sender,
            current_room: None,
        }
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.sender.send(message);
    }

    fn send_error(&self, message: impl Into<String>) {
        self.send(ServerMessage::error(message));
    }
}

#[derive(Debug)]
pub(crate) enum CommitError {
    /// Another writer owns these sequence numbers; the room's engine
    /// has been replaced with a rebuild from the log.
    Stale,
    Store(StoreError),
}

/// One handler per inbound message type; the exhaustive match is the
/// dispatch map.
pub async fn dispatch(env: &Arc<AppEnv>, ctx: &mut ConnectionContext, message: ClientMessage) {
    match message {
        ClientMessage::CreateRoom { player_name } => handle_create_room(env, ctx, player_name).await,
        ClientMessage::JoinRoom {
            room_code,
            player_name,
        } => handle_join_room(env, ctx, room_code, player_name).await,
        ClientMessage::LeaveRoom | ClientMessage::LeaveGame => handle_leave_room(env, ctx).await,
        ClientMessage::EndGame => handle_end_game(env, ctx).await,
        ClientMessage::GetCpuProfiles => handle_get_cpu_profiles(env, ctx).await,
        ClientMessage::AddCpu { profile_name } => handle_add_cpu(env, ctx, profile_name).await,
        ClientMessage::RemoveCpu => handle_remove_cpu(env, ctx).await,
        ClientMessage::StartGame(params) => handle_start_game(env, ctx, params).await,
        ClientMessage::FlipInitial { positions } => handle_flip_initial(env, ctx, positions).await,
        ClientMessage::Draw { source } => handle_draw(env, ctx, source).await,
        ClientMessage::Swap { position } => handle_swap(env, ctx, position).await,
        ClientMessage::Discard => handle_discard(env, ctx).await,
        ClientMessage::CancelDraw => handle_cancel_draw(env, ctx).await,
        ClientMessage::FlipCard { position } => handle_flip_card(env, ctx, position).await,
        ClientMessage::SkipFlip => handle_skip_flip(env, ctx).await,
        ClientMessage::FlipAsAction { position } => {
            handle_flip_as_action(env, ctx, position).await
        }
        ClientMessage::KnockEarly => handle_knock_early(env, ctx).await,
        ClientMessage::NextRound => handle_next_round(env, ctx).await,
        ClientMessage::JoinQueue {
            player_name,
            desired_players,
        } => handle_join_queue(env, ctx, player_name, desired_players).await,
        ClientMessage::LeaveQueue => handle_leave_queue(env, ctx).await,
    }
}

/// Resolve the sender's room: the connection context first, then the
/// reverse index (a matchmaking seat arrives without one).
async fn resolve_room(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) -> Option<Arc<Room>> {
    if let Some(room) = &ctx.current_room {
        return Some(Arc::clone(room));
    }
    let code = env
        .cache
        .get_player_room(&ctx.player_id)
        .await
        .ok()
        .flatten()?;
    let room = env.rooms.get(&code)?;
    ctx.current_room = Some(Arc::clone(&room));
    Some(room)
}

// ---------------------------------------------------------------------
// Commit pipeline
// ---------------------------------------------------------------------

/// Persist a batch of engine events and fan the change out: append to
/// the log (atomic), refresh the cache and TTLs, update the directory
/// on lifecycle transitions, publish a cross-replica notice.
///
/// On a sequence conflict the local engine is stale: it is replaced by
/// a rebuild from the log and the action is reported as `Stale` so the
/// caller rejects it to the client.
pub(crate) async fn commit(
    env: &Arc<AppEnv>,
    room_code: &str,
    state: &mut RoomState,
    events: &[GameEvent],
) -> Result<(), CommitError> {
    if events.is_empty() {
        return Ok(());
    }
    let game_id = state.game.game_id;

    match env.events.append_batch(events).await {
        Ok(_) => {}
        Err(StoreError::Concurrency { sequence, .. }) => {
            warn!(
                target: LOG_TARGET,
                %game_id,
                sequence,
                "sequence conflict; rebuilding engine from log"
            );
            match env.events.get_events(game_id, 1, None).await {
                Ok(stored) if !stored.is_empty() => match rebuild_state(&stored) {
                    Ok(rebuilt) => state.game = rebuilt.into_engine(),
                    Err(err) => {
                        warn!(target: LOG_TARGET, %game_id, %err, "rebuild after conflict failed")
                    }
                },
                Ok(_) => {}
                Err(err) => {
                    warn!(target: LOG_TARGET, %game_id, %err, "re-read after conflict failed")
                }
            }
            return Err(CommitError::Stale);
        }
        Err(err) => return Err(CommitError::Store(err)),
    }

    // Everything past the append is best-effort: the log is the source
    // of truth and the cache rebuilds on the next cold read.
    let snapshot = RebuiltGameState::from_engine(&state.game);
    if let Err(err) = env.cache.save_game_state(game_id, &snapshot).await {
        warn!(target: LOG_TARGET, %game_id, %err, "cache update failed");
    }
    if let Err(err) = env.cache.refresh_room_ttl(room_code).await {
        warn!(target: LOG_TARGET, room_code, %err, "ttl refresh failed");
    }

    for event in events {
        if let EventPayload::GameEnded { winner_id } = &event.payload {
            if let Err(err) = env
                .directory
                .mark_completed(game_id, winner_id.as_deref())
                .await
            {
                warn!(target: LOG_TARGET, %game_id, %err, "directory completion update failed");
            }
        }
    }

    env.bus
        .publish(BusMessage {
            room_code: room_code.to_string(),
            sender_id: None,
            payload: BusPayload::GameStateUpdate {
                game_id,
                sequence_num: state.game.last_sequence(),
            },
        })
        .await;

    Ok(())
}

fn report_commit_failure(ctx: &ConnectionContext, err: CommitError) {
    match err {
        CommitError::Stale => {
            ctx.send_error("Action superseded by a newer game state, please retry")
        }
        CommitError::Store(err) => {
            warn!(target: LOG_TARGET, %err, "event append failed");
            ctx.send_error("Action could not be saved, please retry");
        }
    }
}

// ---------------------------------------------------------------------
// Broadcast fan-out
// ---------------------------------------------------------------------

fn score_lines(state: &RoomState, with_round_score: bool) -> Vec<ScoreLine> {
    state
        .game
        .players
        .iter()
        .map(|player| ScoreLine {
            name: player.name.clone(),
            score: with_round_score.then_some(player.score),
            total: player.total_score,
            rounds_won: player.rounds_won,
        })
        .collect()
}

fn rankings(state: &RoomState, with_round_score: bool) -> Rankings {
    let mut by_points = score_lines(state, with_round_score);
    by_points.sort_by_key(|line| line.total);
    let mut by_rounds_won = score_lines(state, with_round_score);
    by_rounds_won.sort_by_key(|line| std::cmp::Reverse(line.rounds_won));
    Rankings {
        by_points,
        by_rounds_won,
    }
}

/// Send each connected human their personalized projection, plus the
/// phase-specific extras (`round_over` / `game_over` summaries, the
/// `your_turn` nudge).
pub fn broadcast_game_state(state: &RoomState) {
    for member in &state.members {
        if member.is_cpu {
            continue;
        }
        let Some(sender) = &member.sender else {
            continue;
        };

        let view = state.game.state_for(&member.id);
        let _ = sender.send(ServerMessage::GameState { game_state: view });

        match state.game.phase {
            GamePhase::RoundOver => {
                let _ = sender.send(ServerMessage::RoundOver {
                    scores: score_lines(state, true),
                    round: state.game.current_round,
                    total_rounds: state.game.num_rounds,
                    rankings: rankings(state, true),
                });
            }
            GamePhase::GameOver => {
                let _ = sender.send(ServerMessage::GameOver {
                    final_scores: {
                        let mut lines = score_lines(state, false);
                        lines.sort_by_key(|line| line.total);
                        lines
                    },
                    rankings: rankings(state, false),
                });
            }
            GamePhase::Playing | GamePhase::FinalTurn => {
                let is_their_turn = state
                    .game
                    .current_player()
                    .map(|current| current.id == member.id)
                    .unwrap_or(false);
                if is_their_turn
                    && state.game.drawn_card.is_none()
                    && state.game.pending_flip.is_none()
                {
                    let _ = sender.send(ServerMessage::YourTurn);
                }
            }
            _ => {}
        }
    }
}

/// Mirror updates published by other replicas into this replica's
/// local projections.
pub fn attach_bus_listener(env: &Arc<AppEnv>, room: &Arc<Room>) {
    let env_for_handler = Arc::clone(env);
    let room_for_handler = Arc::clone(room);
    env.bus.subscribe(
        &room.code,
        Arc::new(move |message: BusMessage| {
            let env = Arc::clone(&env_for_handler);
            let room = Arc::clone(&room_for_handler);
            Box::pin(async move {
                match message.payload {
                    BusPayload::GameStateUpdate { game_id, .. } => {
                        let Ok(Some(snapshot)) = env.cache.get_game_state(game_id).await else {
                            return;
                        };
                        let mut state = room.lock().await;
                        if snapshot.sequence_num > state.game.last_sequence() {
                            state.game = snapshot.into_engine();
                            broadcast_game_state(&state);
                        }
                    }
                    BusPayload::RoomClosed => {
                        let state = room.lock().await;
                        state.broadcast(
                            &ServerMessage::GameEnded {
                                reason: "Room closed".to_string(),
                            },
                            None,
                        );
                        drop(state);
                        env.bus.unsubscribe(&room.code);
                        env.rooms.remove(&room.code);
                    }
                    BusPayload::PlayerJoined { .. }
                    | BusPayload::PlayerLeft { .. }
                    | BusPayload::Broadcast { .. } => {}
                }
            })
        }),
    );
}

// ---------------------------------------------------------------------
// Lobby / room handlers
// ---------------------------------------------------------------------

async fn handle_create_room(
    env: &Arc<AppEnv>,
    ctx: &mut ConnectionContext,
    player_name: Option<String>,
) {
    if resolve_room(env, ctx).await.is_some() {
        ctx.send_error("Leave your current room first");
        return;
    }
    let player_name = player_name.unwrap_or_else(|| "Player".to_string());

    let room = env.rooms.create_room();
    let mut state = room.lock().await;

    let mut events = vec![state.game.emit_game_created(&ctx.player_id)];
    match state.add_member(ctx.player_id.clone(), player_name, ctx.sender.clone()) {
        Ok(event) => events.push(event),
        Err(err) => {
            env.rooms.remove(&room.code);
            ctx.send_error(err.to_string());
            return;
        }
    }

    let game_id = state.game.game_id;
    if let Err(err) = commit(env, &room.code, &mut state, &events).await {
        env.rooms.remove(&room.code);
        report_commit_failure(ctx, err);
        return;
    }
    if let Err(err) = env
        .directory
        .create_game(game_id, &room.code, &ctx.player_id, &GameOptions::default())
        .await
    {
        warn!(target: LOG_TARGET, %game_id, %err, "directory create failed");
    }
    let record = RoomRecord {
        game_id: Some(game_id),
        host_id: ctx.player_id.clone(),
        status: RoomStatus::Waiting,
        server_id: env.server_id.clone(),
        created_at: Utc::now(),
    };
    if let Err(err) = env.cache.create_room(&room.code, &record).await {
        warn!(target: LOG_TARGET, room_code = %room.code, %err, "cache room create failed");
    }
    if let Err(err) = env
        .cache
        .add_player_to_room(&room.code, &ctx.player_id)
        .await
    {
        warn!(target: LOG_TARGET, %err, "cache player add failed");
    }

    ctx.send(ServerMessage::RoomCreated {
        room_code: room.code.clone(),
        player_id: ctx.player_id.clone(),
    });
    state.broadcast(
        &ServerMessage::PlayerJoined {
            players: state.member_list(&env.profiles),
        },
        None,
    );
    drop(state);

    attach_bus_listener(env, &room);
    ctx.current_room = Some(room);
    info!(target: LOG_TARGET, player_id = %ctx.player_id, "room created");
}

async fn handle_join_room(
    env: &Arc<AppEnv>,
    ctx: &mut ConnectionContext,
    room_code: String,
    player_name: Option<String>,
) {
    if resolve_room(env, ctx).await.is_some() {
        ctx.send_error("Leave your current room first");
        return;
    }
    let player_name = player_name.unwrap_or_else(|| "Player".to_string());

    let Some(room) = env.rooms.get(&room_code) else {
        ctx.send_error("Room not found");
        return;
    };
    let mut state = room.lock().await;
    if state.game.phase != GamePhase::Waiting {
        ctx.send_error("Game already in progress");
        return;
    }

    let event = match state.add_member(ctx.player_id.clone(), player_name, ctx.sender.clone()) {
        Ok(event) => event,
        Err(err) => {
            ctx.send_error(err.to_string());
            return;
        }
    };
    if let Err(err) = commit(env, &room.code, &mut state, &[event]).await {
        report_commit_failure(ctx, err);
        return;
    }
    if let Err(err) = env
        .cache
        .add_player_to_room(&room.code, &ctx.player_id)
        .await
    {
        warn!(target: LOG_TARGET, %err, "cache player add failed");
    }

    ctx.send(ServerMessage::RoomJoined {
        room_code: room.code.clone(),
        player_id: ctx.player_id.clone(),
    });
    state.broadcast(
        &ServerMessage::PlayerJoined {
            players: state.member_list(&env.profiles),
        },
        None,
    );
    drop(state);
    ctx.current_room = Some(room);
}

async fn handle_get_cpu_profiles(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    if resolve_room(env, ctx).await.is_none() {
        return;
    }
    ctx.send(ServerMessage::CpuProfiles {
        profiles: env.profiles.all_profiles(),
    });
}

async fn handle_add_cpu(
    env: &Arc<AppEnv>,
    ctx: &mut ConnectionContext,
    profile_name: Option<String>,
) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    if !state.is_host(&ctx.player_id) {
        ctx.send_error("Only the host can add CPU players");
        return;
    }
    if state.members.len() >= 6 {
        ctx.send_error("Room is full");
        return;
    }

    let cpu_id = format!("cpu_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let profile = match profile_name {
        Some(name) => env.profiles.assign_named(&cpu_id, &name),
        None => env.profiles.assign(&cpu_id),
    };
    let Some(profile) = profile else {
        ctx.send_error("CPU profile not available");
        return;
    };

    let event = match state.add_cpu_member(cpu_id.clone(), &profile) {
        Ok(event) => event,
        Err(err) => {
            env.profiles.release_seat(&cpu_id);
            ctx.send_error(err.to_string());
            return;
        }
    };
    if let Err(err) = commit(env, &room.code, &mut state, &[event]).await {
        report_commit_failure(ctx, err);
        return;
    }
    if let Err(err) = env.cache.add_player_to_room(&room.code, &cpu_id).await {
        warn!(target: LOG_TARGET, %err, "cache cpu add failed");
    }

    state.broadcast(
        &ServerMessage::PlayerJoined {
            players: state.member_list(&env.profiles),
        },
        None,
    );
}

async fn handle_remove_cpu(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    if !state.is_host(&ctx.player_id) {
        ctx.send_error("Only the host can remove CPU players");
        return;
    }
    let Some(cpu_id) = state.cpu_ids().pop() else {
        return;
    };

    let Some((_, event)) = state.remove_member(&cpu_id, &env.profiles) else {
        return;
    };
    if let Some(event) = event {
        if let Err(err) = commit(env, &room.code, &mut state, &[event]).await {
            report_commit_failure(ctx, err);
            return;
        }
    }
    if let Err(err) = env
        .cache
        .remove_player_from_room(&room.code, &cpu_id)
        .await
    {
        warn!(target: LOG_TARGET, %err, "cache cpu remove failed");
    }

    state.broadcast(
        &ServerMessage::PlayerJoined {
            players: state.member_list(&env.profiles),
        },
        None,
    );
}

// ---------------------------------------------------------------------
// Game lifecycle handlers
// ---------------------------------------------------------------------

async fn handle_start_game(env: &Arc<AppEnv>, ctx: &mut ConnectionContext, params: StartGameParams) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    if !state.is_host(&ctx.player_id) {
        ctx.send_error("Only the host can start the game");
        return;
    }
    if state.members.len() < 2 {
        ctx.send_error("Need at least 2 players");
        return;
    }

    let mut events = match state
        .game
        .start_game(params.decks, params.rounds, params.options, None)
    {
        Ok(events) => events,
        Err(err) => {
            ctx.send_error(err.to_string());
            return;
        }
    };

    // CPU seats flip immediately so humans never wait on them.
    if state.game.options.initial_flips > 0 {
        let flips = usize::from(state.game.options.initial_flips);
        for cpu_id in state.cpu_ids() {
            let positions = env.policy.choose_initial_flips(flips);
            match state.game.flip_initial_cards(&cpu_id, &positions) {
                Ok(mut flip_events) => events.append(&mut flip_events),
                Err(err) => {
                    warn!(target: LOG_TARGET, %cpu_id, %err, "cpu initial flip rejected")
                }
            }
        }
    }

    let game_id = state.game.game_id;
    if let Err(err) = commit(env, &room.code, &mut state, &events).await {
        report_commit_failure(ctx, err);
        return;
    }
    let player_ids: Vec<PlayerId> = state.game.players.iter().map(|p| p.id.clone()).collect();
    if let Err(err) = env
        .directory
        .mark_started(
            game_id,
            player_ids.len() as u32,
            state.game.num_rounds,
            &player_ids,
        )
        .await
    {
        warn!(target: LOG_TARGET, %game_id, %err, "directory start update failed");
    }
    if let Err(err) = env
        .cache
        .set_room_status(&room.code, RoomStatus::Playing)
        .await
    {
        warn!(target: LOG_TARGET, %err, "cache status update failed");
    }

    for member in &state.members {
        if member.is_cpu {
            continue;
        }
        state.send_to(
            &member.id,
            ServerMessage::GameStarted {
                game_state: state.game.state_for(&member.id),
            },
        );
    }
    drop(state);

    cpu_driver::spawn_cpu_turns(env, &room);
}

async fn handle_next_round(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    if !state.is_host(&ctx.player_id) {
        ctx.send_error("Only the host can start the next round");
        return;
    }

    let mut events = match state.game.start_next_round(None) {
        Ok(events) => events,
        Err(err) => {
            ctx.send_error(err.to_string());
            return;
        }
    };

    let advanced = state.game.phase != GamePhase::GameOver;
    if advanced && state.game.options.initial_flips > 0 {
        let flips = usize::from(state.game.options.initial_flips);
        for cpu_id in state.cpu_ids() {
            let positions = env.policy.choose_initial_flips(flips);
            match state.game.flip_initial_cards(&cpu_id, &positions) {
                Ok(mut flip_events) => events.append(&mut flip_events),
                Err(err) => {
                    warn!(target: LOG_TARGET, %cpu_id, %err, "cpu initial flip rejected")
                }
            }
        }
    }

    if let Err(err) = commit(env, &room.code, &mut state, &events).await {
        report_commit_failure(ctx, err);
        return;
    }

    if advanced {
        for member in &state.members {
            if member.is_cpu {
                continue;
            }
            state.send_to(
                &member.id,
                ServerMessage::RoundStarted {
                    game_state: state.game.state_for(&member.id),
                },
            );
        }
        drop(state);
        cpu_driver::spawn_cpu_turns(env, &room);
    } else {
        // No rounds left: the game is over.
        broadcast_game_state(&state);
    }
}

async fn handle_end_game(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    if !state.is_host(&ctx.player_id) {
        ctx.send_error("Only the host can end the game");
        return;
    }

    state.broadcast(
        &ServerMessage::GameEnded {
            reason: "Host ended the game".to_string(),
        },
        None,
    );

    if let Some(event) = state.game.end_game() {
        if let Err(err) = commit(env, &room.code, &mut state, &[event]).await {
            report_commit_failure(ctx, err);
        }
    }
    teardown_room(env, &room, &mut state).await;
    drop(state);
    ctx.current_room = None;
}

// ---------------------------------------------------------------------
// Turn action handlers
// ---------------------------------------------------------------------

async fn handle_flip_initial(env: &Arc<AppEnv>, ctx: &mut ConnectionContext, positions: Vec<usize>) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.flip_initial_cards(&ctx.player_id, &positions) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);
            drop(state);
            cpu_driver::spawn_cpu_turns(env, &room);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_draw(
    env: &Arc<AppEnv>,
    ctx: &mut ConnectionContext,
    source: crate::engine::DrawSource,
) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.draw_card(&ctx.player_id, source) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            if let Some(card) = state.game.drawn_card {
                ctx.send(ServerMessage::CardDrawn {
                    card: CardView::of(&card, true),
                    source,
                });
            }
            broadcast_game_state(&state);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_swap(env: &Arc<AppEnv>, ctx: &mut ConnectionContext, position: usize) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.swap_card(&ctx.player_id, position) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);
            drop(state);
            cpu_driver::spawn_cpu_turns(env, &room);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_discard(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.discard_drawn(&ctx.player_id) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);

            if state.game.pending_flip.as_deref() == Some(ctx.player_id.as_str()) {
                ctx.send(ServerMessage::CanFlip {
                    optional: state.game.flip_is_optional(),
                });
            } else {
                drop(state);
                cpu_driver::spawn_cpu_turns(env, &room);
            }
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_cancel_draw(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.cancel_draw(&ctx.player_id) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_flip_card(env: &Arc<AppEnv>, ctx: &mut ConnectionContext, position: usize) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.flip_and_end_turn(&ctx.player_id, position) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);
            drop(state);
            cpu_driver::spawn_cpu_turns(env, &room);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_skip_flip(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.skip_flip(&ctx.player_id) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);
            drop(state);
            cpu_driver::spawn_cpu_turns(env, &room);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_flip_as_action(env: &Arc<AppEnv>, ctx: &mut ConnectionContext, position: usize) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.flip_card_as_action(&ctx.player_id, position) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);
            drop(state);
            cpu_driver::spawn_cpu_turns(env, &room);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

async fn handle_knock_early(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    let mut state = room.lock().await;
    match state.game.knock_early(&ctx.player_id) {
        Ok(events) => {
            if let Err(err) = commit(env, &room.code, &mut state, &events).await {
                report_commit_failure(ctx, err);
                return;
            }
            broadcast_game_state(&state);
            drop(state);
            cpu_driver::spawn_cpu_turns(env, &room);
        }
        Err(err) => ctx.send_error(err.to_string()),
    }
}

// ---------------------------------------------------------------------
// Leaving and teardown
// ---------------------------------------------------------------------

async fn handle_leave_room(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    // Leaving while in no room is a no-op, not an error.
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    player_leave(env, &room, &ctx.player_id).await;
    ctx.current_room = None;
}

/// Remove a player from a room, reassign the host flag, and tear the
/// room down when the last human is gone. Idempotent: a second call
/// for the same player does nothing.
pub async fn player_leave(env: &Arc<AppEnv>, room: &Arc<Room>, player_id: &str) {
    let mut state = room.lock().await;
    let Some((member, event)) = state.remove_member(player_id, &env.profiles) else {
        return;
    };
    if let Err(err) = env
        .cache
        .remove_player_from_room(&room.code, player_id)
        .await
    {
        warn!(target: LOG_TARGET, %err, "cache player remove failed");
    }

    let mut events: Vec<GameEvent> = event.into_iter().collect();

    if state.human_count() == 0 {
        let mut cpu_events = state.drain_cpus(&env.profiles);
        events.append(&mut cpu_events);
        if let Err(err) = commit(env, &room.code, &mut state, &events).await {
            warn!(target: LOG_TARGET, ?err, "teardown commit failed");
        }
        teardown_room(env, room, &mut state).await;
        return;
    }

    if let Err(err) = commit(env, &room.code, &mut state, &events).await {
        warn!(target: LOG_TARGET, ?err, "leave commit failed");
    }
    state.broadcast(
        &ServerMessage::PlayerLeft {
            player_id: player_id.to_string(),
            player_name: member.name.clone(),
            players: state.member_list(&env.profiles),
        },
        None,
    );
    env.bus
        .publish(BusMessage {
            room_code: room.code.clone(),
            sender_id: None,
            payload: BusPayload::PlayerLeft {
                player_id: player_id.to_string(),
            },
        })
        .await;

    // The departure may have handed the turn to a CPU.
    drop(state);
    cpu_driver::spawn_cpu_turns(env, room);
}

/// Remove every trace of the room: cache records, directory status,
/// the cross-replica notice, and the local registration.
async fn teardown_room(env: &Arc<AppEnv>, room: &Arc<Room>, state: &mut RoomState) {
    let game_id = state.game.game_id;

    for cpu_id in state.cpu_ids() {
        env.profiles.release_seat(&cpu_id);
    }

    if state.game.phase != GamePhase::GameOver {
        if let Err(err) = env.directory.mark_abandoned(game_id).await {
            warn!(target: LOG_TARGET, %game_id, %err, "directory abandon update failed");
        }
    }
    if let Err(err) = env.cache.delete_room(&room.code).await {
        warn!(target: LOG_TARGET, room_code = %room.code, %err, "cache room delete failed");
    }
    env.bus
        .publish(BusMessage {
            room_code: room.code.clone(),
            sender_id: None,
            payload: BusPayload::RoomClosed,
        })
        .await;
    env.bus.unsubscribe(&room.code);
    env.rooms.remove(&room.code);
    info!(target: LOG_TARGET, room_code = %room.code, "room torn down");
}

// ---------------------------------------------------------------------
// Matchmaking handlers
// ---------------------------------------------------------------------

async fn handle_join_queue(
    env: &Arc<AppEnv>,
    ctx: &mut ConnectionContext,
    player_name: Option<String>,
    desired_players: Option<usize>,
) {
    if resolve_room(env, ctx).await.is_some() {
        ctx.send_error("Leave your current room first");
        return;
    }
    let position = env.queue.join(QueuedPlayer {
        player_id: ctx.player_id.clone(),
        name: player_name.unwrap_or_else(|| "Player".to_string()),
        sender: ctx.sender.clone(),
        desired_players: desired_players.unwrap_or(2).clamp(2, 6),
    });
    ctx.send(ServerMessage::QueueJoined { position });
}

async fn handle_leave_queue(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    env.queue.leave(&ctx.player_id);
    ctx.send(ServerMessage::QueueLeft);
}

/// Disconnect cleanup: drop any queue entry, then run the leave flow
/// on the connection's current room, if any.
pub async fn handle_disconnect(env: &Arc<AppEnv>, ctx: &mut ConnectionContext) {
    env.queue.leave(&ctx.player_id);
    let Some(room) = resolve_room(env, ctx).await else {
        return;
    };
    player_leave(env, &room, &ctx.player_id).await;
    ctx.current_room = None;
}
