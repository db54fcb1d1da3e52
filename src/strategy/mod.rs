// Decision pipeline: regime gate, entry evaluation, exit state machine
pub mod entry;
pub mod exit;
pub mod regime;

pub use entry::{EntryConfig, EntryEvaluator, EntrySignal, LiquidityInfo};
pub use exit::{ExitConfig, ExitEvaluator, ExitSignal, ExitType};
pub use regime::{Regime, RegimeAnalysis, RegimeClassifier, RegimeConfig};
