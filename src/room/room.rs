use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::engine::{ActionError, GolfGame, PlayerId};
use crate::events::GameEvent;
use crate::server::messages::ServerMessage;

use super::cpu::{CpuProfile, CpuProfileRegistry};

/// One seat in a room. CPU seats have no channel handle.
pub struct RoomMember {
    pub id: PlayerId,
    pub name: String,
    pub sender: Option<mpsc::UnboundedSender<ServerMessage>>,
    pub is_host: bool,
    pub is_cpu: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct MemberInfo {
    pub id: PlayerId,
    pub name: String,
    pub is_host: bool,
    pub is_cpu: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// A room owns its game and its serialization lock; every
/// read-then-write on the game happens under [`Room::lock`], which
/// linearizes concurrent client messages for the room.
pub struct Room {
    pub code: String,
    state: Mutex<RoomState>,
}

pub struct RoomState {
    pub members: Vec<RoomMember>,
    pub game: GolfGame,
}

impl Room {
    pub fn new(code: String, game: GolfGame) -> Self {
        Self {
            code,
            state: Mutex::new(RoomState {
                members: Vec::new(),
                game,
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }
}

impl RoomState {
    pub fn member(&self, player_id: &str) -> Option<&RoomMember> {
        self.members.iter().find(|member| member.id == player_id)
    }

    pub fn is_host(&self, player_id: &str) -> bool {
        self.member(player_id)
            .map(|member| member.is_host)
            .unwrap_or(false)
    }

    pub fn human_count(&self) -> usize {
        self.members.iter().filter(|member| !member.is_cpu).count()
    }

    pub fn cpu_ids(&self) -> Vec<PlayerId> {
        self.members
            .iter()
            .filter(|member| member.is_cpu)
            .map(|member| member.id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Seat a human. The first member becomes host.
    pub fn add_member(
        &mut self,
        player_id: impl Into<PlayerId>,
        name: impl Into<String>,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<GameEvent, ActionError> {
        let player_id = player_id.into();
        let name = name.into();
        let event = self
            .game
            .add_player(player_id.clone(), name.clone(), false, None)?;
        let is_host = self.members.is_empty();
        self.members.push(RoomMember {
            id: player_id,
            name,
            sender: Some(sender),
            is_host,
            is_cpu: false,
        });
        Ok(event)
    }

    /// Seat a CPU under an assigned profile.
    pub fn add_cpu_member(
        &mut self,
        cpu_id: impl Into<PlayerId>,
        profile: &CpuProfile,
    ) -> Result<GameEvent, ActionError> {
        let cpu_id = cpu_id.into();
        let event = self.game.add_player(
            cpu_id.clone(),
            profile.name.clone(),
            true,
            Some(profile.name.clone()),
        )?;
        self.members.push(RoomMember {
            id: cpu_id,
            name: profile.name.clone(),
            sender: None,
            is_host: false,
            is_cpu: true,
        });
        Ok(event)
    }

    /// Remove a seat. Releases a CPU's profile token, reassigns the
    /// host flag to the next member in join order, and returns the
    /// emitted `player_left` event when the player was in the game.
    pub fn remove_member(
        &mut self,
        player_id: &str,
        profiles: &CpuProfileRegistry,
    ) -> Option<(RoomMember, Option<GameEvent>)> {
        let idx = self
            .members
            .iter()
            .position(|member| member.id == player_id)?;
        let member = self.members.remove(idx);
        let event = self.game.remove_player(player_id).map(|(_, event)| event);

        if member.is_cpu {
            profiles.release_seat(&member.id);
        }

        if member.is_host {
            if let Some(next_host) = self.members.first_mut() {
                next_host.is_host = true;
            }
        }

        Some((member, event))
    }

    /// Remove every CPU seat, releasing their profile tokens. Used at
    /// teardown when the last human leaves.
    pub fn drain_cpus(&mut self, profiles: &CpuProfileRegistry) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for cpu_id in self.cpu_ids() {
            if let Some((_, Some(event))) = self.remove_member(&cpu_id, profiles) {
                events.push(event);
            }
        }
        events
    }

    pub fn member_list(&self, profiles: &CpuProfileRegistry) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|member| MemberInfo {
                id: member.id.clone(),
                name: member.name.clone(),
                is_host: member.is_host,
                is_cpu: member.is_cpu,
                style: member
                    .is_cpu
                    .then(|| profiles.profile_for(&member.id).map(|p| p.style.clone()))
                    .flatten(),
            })
            .collect()
    }

    /// Send to every connected human, optionally excluding one player.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<&str>) {
        for member in &self.members {
            if member.is_cpu || Some(member.id.as_str()) == exclude {
                continue;
            }
            if let Some(sender) = &member.sender {
                let _ = sender.send(message.clone());
            }
        }
    }

    pub fn send_to(&self, player_id: &str, message: ServerMessage) {
        if let Some(member) = self.member(player_id) {
            if let Some(sender) = &member.sender {
                let _ = sender.send(message);
            }
        }
    }
}

/// Registry of live rooms on this replica, keyed by room code.
#[derive(Default)]
pub struct RoomManager {
    rooms: DashMap<String, Arc<Room>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..4)
                .map(|_| rng.gen_range(b'A'..=b'Z') as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Create a room with a fresh 4-letter code and an empty game.
    pub fn create_room(&self) -> Arc<Room> {
        let code = self.generate_code();
        let game = GolfGame::new(Uuid::new_v4(), code.clone());
        let room = Arc::new(Room::new(code.clone(), game));
        self.rooms.insert(code, Arc::clone(&room));
        room
    }

    pub fn get(&self, code: &str) -> Option<Arc<Room>> {
        self.rooms.get(&code.to_uppercase()).map(|room| Arc::clone(&room))
    }

    pub fn remove(&self, code: &str) {
        self.rooms.remove(code);
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn sender() -> mpsc::UnboundedSender<ServerMessage> {
        mpsc::unbounded_channel().0
    }

    async fn room_with_members(names: &[&str]) -> Arc<Room> {
        let manager = RoomManager::new();
        let room = manager.create_room();
        let mut state = room.lock().await;
        state.game.emit_game_created(names[0]);
        for name in names {
            state
                .add_member(name.to_string(), name.to_string(), sender())
                .expect("seat available");
        }
        drop(state);
        room
    }

    #[tokio::test]
    async fn first_member_is_host() {
        let room = room_with_members(&["a", "b"]).await;
        let state = room.lock().await;
        assert!(state.is_host("a"));
        assert!(!state.is_host("b"));
    }

    #[tokio::test]
    async fn host_flag_passes_down_join_order() {
        let profiles = CpuProfileRegistry::new();
        let room = room_with_members(&["a", "b", "c"]).await;
        let mut state = room.lock().await;

        // a leaves: b inherits the flag and the room stays alive.
        let (removed, event) = state.remove_member("a", &profiles).expect("member removed");
        assert!(removed.is_host);
        assert!(event.is_some());
        assert!(state.is_host("b"));
        assert!(!state.is_host("c"));
        assert_eq!(state.members.len(), 2);

        // b leaves: c is the last host standing.
        state.remove_member("b", &profiles).expect("member removed");
        assert!(state.is_host("c"));

        state.remove_member("c", &profiles).expect("member removed");
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn removing_an_absent_member_is_a_no_op() {
        let profiles = CpuProfileRegistry::new();
        let room = room_with_members(&["a"]).await;
        let mut state = room.lock().await;
        assert!(state.remove_member("ghost", &profiles).is_none());
        assert_eq!(state.members.len(), 1);
    }

    #[tokio::test]
    async fn cpu_seats_release_their_profiles() {
        let profiles = CpuProfileRegistry::new();
        let room = room_with_members(&["a"]).await;
        let mut state = room.lock().await;

        let profile = profiles.assign("cpu_1").expect("profile available");
        state
            .add_cpu_member("cpu_1", &profile)
            .expect("seat available");
        assert_eq!(profiles.assigned_count(), 1);
        assert_eq!(state.human_count(), 1);

        state.remove_member("cpu_1", &profiles).expect("cpu removed");
        assert_eq!(profiles.assigned_count(), 0);
    }

    #[tokio::test]
    async fn drain_cpus_empties_every_cpu_seat() {
        let profiles = CpuProfileRegistry::new();
        let room = room_with_members(&["a"]).await;
        let mut state = room.lock().await;

        for idx in 0..3 {
            let cpu_id = format!("cpu_{idx}");
            let profile = profiles.assign(&cpu_id).expect("profile available");
            state
                .add_cpu_member(cpu_id, &profile)
                .expect("seat available");
        }
        assert_eq!(profiles.assigned_count(), 3);

        let events = state.drain_cpus(&profiles);
        assert_eq!(events.len(), 3);
        assert_eq!(profiles.assigned_count(), 0);
        assert_eq!(state.members.len(), 1);
    }

    #[tokio::test]
    async fn rooms_cap_at_six_members() {
        let room = room_with_members(&["a", "b", "c", "d", "e", "f"]).await;
        let mut state = room.lock().await;
        let err = state
            .add_member("g".to_string(), "g".to_string(), sender())
            .unwrap_err();
        assert_eq!(err, ActionError::RoomFull);
    }

    #[test]
    fn a_profile_seats_one_cpu_at_a_time() {
        let profiles = CpuProfileRegistry::new();
        let first = profiles.assign_named("cpu_1", "Maya").expect("free");
        assert_eq!(first.name, "Maya");
        assert!(profiles.assign_named("cpu_2", "Maya").is_none());

        profiles.release_seat("cpu_1");
        assert!(profiles.assign_named("cpu_2", "Maya").is_some());
    }

    #[test]
    fn room_codes_are_four_uppercase_letters() {
        let manager = RoomManager::new();
        let room = manager.create_room();
        assert_eq!(room.code.len(), 4);
        assert!(room.code.chars().all(|c| c.is_ascii_uppercase()));
        assert!(manager.get(&room.code.to_lowercase()).is_some());
    }
}
