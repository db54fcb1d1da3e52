// The scheduler: fixed-interval control loop plus the operator heartbeat
pub mod control_loop;
pub mod heartbeat;

pub use control_loop::{ControlLoop, CycleOutcome};
pub use heartbeat::{spawn_heartbeat, HeartbeatState, SharedHeartbeat};
