// Risk management: equity/drawdown tracking, kill switch, position sizing
pub mod kill_switch;
pub mod manager;
pub mod sizing;

pub use kill_switch::{KillSwitch, KillSwitchEvent, TriggerKind};
pub use manager::{RiskConfig, RiskManager, RiskStatus};
pub use sizing::{PositionSizer, SizePlan};
