pub mod cpu;
#[allow(clippy::module_inception)]
pub mod room;

pub use cpu::{
    CpuAction, CpuPolicy, CpuProfile, CpuProfileInfo, CpuProfileRegistry, HouseCpu,
    SharedCpuPolicy, CPU_PROFILES,
};
pub use room::{MemberInfo, Room, RoomManager, RoomMember, RoomState};
