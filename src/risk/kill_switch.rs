use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What latched the kill switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Drawdown,
    OracleDivergence,
    Manual,
    RpcFailure,
    SystemError,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Drawdown => "drawdown",
            TriggerKind::OracleDivergence => "oracle_divergence",
            TriggerKind::Manual => "manual",
            TriggerKind::RpcFailure => "rpc_failure",
            TriggerKind::SystemError => "system_error",
        };
        f.write_str(s)
    }
}

/// Record of the most recent trigger, serialized into the sentinel file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchEvent {
    pub kind: TriggerKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Latched trading halt, durable across restarts via a sentinel file
///
/// The sentinel's presence is the source of truth for "triggered"; the
/// in-memory flag is a cache refreshed on every check, so an operator
/// touching the file by hand halts the bot just like an internal trigger.
pub struct KillSwitch {
    sentinel_path: PathBuf,
    enabled: bool,
    latched: bool,
    last_event: Option<KillSwitchEvent>,
}

impl KillSwitch {
    pub fn new(sentinel_path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            sentinel_path: sentinel_path.into(),
            enabled,
            latched: false,
            last_event: None,
        }
    }

    pub fn sentinel_path(&self) -> &Path {
        &self.sentinel_path
    }

    pub fn last_event(&self) -> Option<&KillSwitchEvent> {
        self.last_event.as_ref()
    }

    /// Latch the switch and persist the event to the sentinel file
    ///
    /// Idempotent once latched. A disabled switch only logs.
    pub fn trigger(&mut self, kind: TriggerKind, data: serde_json::Value) {
        if !self.enabled {
            tracing::warn!(kind = %kind, "kill switch disabled, trigger ignored");
            return;
        }
        if self.latched {
            tracing::debug!(kind = %kind, "kill switch already latched");
            return;
        }

        let event = KillSwitchEvent {
            kind,
            timestamp: Utc::now(),
            data,
        };

        tracing::error!(kind = %kind, data = %event.data, "KILL SWITCH TRIGGERED");

        match serde_json::to_string_pretty(&event) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.sentinel_path, json) {
                    tracing::error!(
                        path = %self.sentinel_path.display(),
                        error = %e,
                        "failed to persist kill switch sentinel"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize kill switch event"),
        }

        self.latched = true;
        self.last_event = Some(event);
    }

    /// Check the latch, treating the sentinel's mere presence as an implicit
    /// manual trigger
    pub fn is_triggered(&mut self) -> bool {
        if self.latched {
            return true;
        }

        if self.sentinel_path.exists() {
            tracing::warn!(
                path = %self.sentinel_path.display(),
                "kill switch sentinel present, latching"
            );
            self.latched = true;
            if self.last_event.is_none() {
                // Recover the persisted event if it parses, otherwise record
                // the bare fact of the external marker
                self.last_event = std::fs::read_to_string(&self.sentinel_path)
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .or(Some(KillSwitchEvent {
                        kind: TriggerKind::Manual,
                        timestamp: Utc::now(),
                        data: serde_json::json!({"source": "external sentinel"}),
                    }));
            }
            return true;
        }

        false
    }

    /// Clear the latch and remove the sentinel; the only way out of a
    /// triggered state
    pub fn reset(&mut self) -> Result<()> {
        if self.sentinel_path.exists() {
            std::fs::remove_file(&self.sentinel_path)?;
        }
        self.latched = false;
        self.last_event = None;
        tracing::info!("kill switch reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_sentinel() -> PathBuf {
        std::env::temp_dir().join(format!("swingbot-ks-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn test_trigger_latches_and_persists() {
        let path = temp_sentinel();
        let mut ks = KillSwitch::new(&path, true);

        assert!(!ks.is_triggered());

        ks.trigger(TriggerKind::Drawdown, serde_json::json!({"drawdown": 0.34}));

        assert!(ks.is_triggered());
        assert!(path.exists());

        let event: KillSwitchEvent =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(event.kind, TriggerKind::Drawdown);

        ks.reset().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_trigger_idempotent_once_latched() {
        let path = temp_sentinel();
        let mut ks = KillSwitch::new(&path, true);

        ks.trigger(TriggerKind::Drawdown, serde_json::json!({}));
        ks.trigger(TriggerKind::Manual, serde_json::json!({}));

        // First trigger wins
        assert_eq!(ks.last_event().unwrap().kind, TriggerKind::Drawdown);
        ks.reset().unwrap();
    }

    #[test]
    fn test_external_sentinel_is_implicit_manual_trigger() {
        let path = temp_sentinel();
        std::fs::write(&path, "halt").unwrap();

        let mut ks = KillSwitch::new(&path, true);
        assert!(ks.is_triggered());
        assert_eq!(ks.last_event().unwrap().kind, TriggerKind::Manual);

        ks.reset().unwrap();
        assert!(!ks.is_triggered());
    }

    #[test]
    fn test_sentinel_survives_process_restart() {
        let path = temp_sentinel();

        {
            let mut ks = KillSwitch::new(&path, true);
            ks.trigger(TriggerKind::RpcFailure, serde_json::json!({"rpc": "down"}));
        }

        // A fresh instance (new process) sees the latch and the event
        let mut restarted = KillSwitch::new(&path, true);
        assert!(restarted.is_triggered());
        assert_eq!(restarted.last_event().unwrap().kind, TriggerKind::RpcFailure);

        restarted.reset().unwrap();
    }

    #[test]
    fn test_disabled_switch_never_latches() {
        let path = temp_sentinel();
        let mut ks = KillSwitch::new(&path, false);

        ks.trigger(TriggerKind::Drawdown, serde_json::json!({}));

        assert!(!ks.is_triggered());
        assert!(!path.exists());
    }
}
