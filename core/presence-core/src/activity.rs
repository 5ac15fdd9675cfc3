//! The presence record shown by the desktop app, and its merge rules.
//!
//! Updates are partial: an omitted field keeps its current value, and assets
//! merge slot by slot. The start timestamp is fixed when the record is built.

use rand::RngCore;
use std::collections::BTreeMap;

use presence_protocol::{ActivityPayload, CommandFrame, SetActivityArgs, Timestamps};

use crate::config::PresenceConfig;

pub const LARGE_IMAGE: &str = "large_image";
pub const SMALL_IMAGE: &str = "small_image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub details: Option<String>,
    pub state: Option<String>,
    pub assets: BTreeMap<String, String>,
    start_timestamp: i64,
}

impl Activity {
    pub fn new(start_timestamp: i64) -> Self {
        Self {
            details: None,
            state: None,
            assets: BTreeMap::new(),
            start_timestamp,
        }
    }

    /// Initial record from static configuration.
    pub fn from_config(config: &PresenceConfig, start_timestamp: i64) -> Self {
        let mut assets = BTreeMap::new();
        if let Some(image) = &config.large_image {
            assets.insert(LARGE_IMAGE.to_string(), image.clone());
        }
        if let Some(image) = &config.small_image {
            assets.insert(SMALL_IMAGE.to_string(), image.clone());
        }
        Self {
            details: config.details.clone(),
            state: config.state.clone(),
            assets,
            start_timestamp,
        }
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    /// Field-wise merge; `self` is left untouched.
    pub fn merge(&self, update: &ActivityUpdate) -> Activity {
        let mut merged = self.clone();
        if let Some(details) = &update.details {
            merged.details = Some(details.clone());
        }
        if let Some(state) = &update.state {
            merged.state = Some(state.clone());
        }
        for (slot, value) in &update.assets {
            merged.assets.insert(slot.clone(), value.clone());
        }
        merged
    }

    pub fn to_payload(&self) -> ActivityPayload {
        ActivityPayload {
            details: self.details.clone(),
            state: self.state.clone(),
            assets: self.assets.clone(),
            timestamps: Timestamps {
                start: self.start_timestamp,
            },
        }
    }
}

/// A partial change to an [`Activity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityUpdate {
    pub details: Option<String>,
    pub state: Option<String>,
    pub assets: BTreeMap<String, String>,
}

impl ActivityUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn asset(mut self, slot: impl Into<String>, value: impl Into<String>) -> Self {
        self.assets.insert(slot.into(), value.into());
        self
    }

    pub fn large_image(self, key: impl Into<String>) -> Self {
        self.asset(LARGE_IMAGE, key)
    }

    pub fn small_image(self, key: impl Into<String>) -> Self {
        self.asset(SMALL_IMAGE, key)
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_none() && self.state.is_none() && self.assets.is_empty()
    }

    /// One update equivalent to applying `self` and then `next`.
    pub fn then(&self, next: &ActivityUpdate) -> ActivityUpdate {
        let mut assets = self.assets.clone();
        assets.extend(next.assets.clone());
        ActivityUpdate {
            details: next.details.clone().or_else(|| self.details.clone()),
            state: next.state.clone().or_else(|| self.state.clone()),
            assets,
        }
    }
}

/// `SET_ACTIVITY` carrying `activity` for process `pid`.
pub fn to_wire(activity: &Activity, pid: u32) -> CommandFrame<SetActivityArgs> {
    CommandFrame::set_activity(
        make_nonce(),
        SetActivityArgs {
            pid,
            activity: Some(activity.to_payload()),
        },
    )
}

/// `SET_ACTIVITY` with a null activity: hides the presence, keeps the session.
pub fn to_wire_clear(pid: u32) -> CommandFrame<SetActivityArgs> {
    CommandFrame::set_activity(
        make_nonce(),
        SetActivityArgs {
            pid,
            activity: None,
        },
    )
}

fn make_nonce() -> String {
    rand::thread_rng().next_u64().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PresenceConfig {
        PresenceConfig {
            client_id: "X".to_string(),
            details: Some("D".to_string()),
            state: Some("S".to_string()),
            large_image: Some("L".to_string()),
            small_image: Some("s".to_string()),
            webhook_url: None,
        }
    }

    fn sample_updates() -> Vec<ActivityUpdate> {
        vec![
            ActivityUpdate::new(),
            ActivityUpdate::new().details("Compiling"),
            ActivityUpdate::new().state("3 errors"),
            ActivityUpdate::new().large_image("rust"),
            ActivityUpdate::new().small_image("idle").details("Idle"),
            ActivityUpdate::new()
                .asset("large_text", "Rust 1.80")
                .state("clean"),
        ]
    }

    #[test]
    fn from_config_fills_both_image_slots() {
        let activity = Activity::from_config(&config(), 1_700_000_000);
        assert_eq!(activity.details.as_deref(), Some("D"));
        assert_eq!(activity.state.as_deref(), Some("S"));
        assert_eq!(activity.assets.get(LARGE_IMAGE).map(String::as_str), Some("L"));
        assert_eq!(activity.assets.get(SMALL_IMAGE).map(String::as_str), Some("s"));
        assert_eq!(activity.start_timestamp(), 1_700_000_000);
    }

    #[test]
    fn omitted_fields_are_kept() {
        let base = Activity::from_config(&config(), 10);
        let merged = base.merge(&ActivityUpdate::new().state("Busy"));
        assert_eq!(merged.details.as_deref(), Some("D"));
        assert_eq!(merged.state.as_deref(), Some("Busy"));
        assert_eq!(merged.assets, base.assets);
        assert_eq!(merged.start_timestamp(), 10);
    }

    #[test]
    fn assets_merge_per_slot() {
        let base = Activity::from_config(&config(), 10);
        let merged = base.merge(&ActivityUpdate::new().small_image("away"));
        assert_eq!(merged.assets.get(LARGE_IMAGE).map(String::as_str), Some("L"));
        assert_eq!(merged.assets.get(SMALL_IMAGE).map(String::as_str), Some("away"));
    }

    #[test]
    fn merge_is_idempotent() {
        let base = Activity::from_config(&config(), 10);
        for update in sample_updates() {
            let once = base.merge(&update);
            assert_eq!(once.merge(&update), once);
        }
    }

    #[test]
    fn sequential_merges_equal_combined_update() {
        let base = Activity::from_config(&config(), 10);
        let updates = sample_updates();
        for first in &updates {
            for second in &updates {
                for third in &updates {
                    let sequential = base.merge(first).merge(second).merge(third);
                    let left = base.merge(&first.then(second).then(third));
                    let right = base.merge(&first.then(&second.then(third)));
                    assert_eq!(sequential, left);
                    assert_eq!(sequential, right);
                }
            }
        }
    }

    #[test]
    fn to_wire_builds_set_activity_command() {
        let activity = Activity::from_config(&config(), 1_700_000_000);
        let value = serde_json::to_value(to_wire(&activity, 4242)).unwrap();

        assert_eq!(value["cmd"], "SET_ACTIVITY");
        assert!(value["nonce"]
            .as_str()
            .is_some_and(|nonce| !nonce.is_empty() && nonce.chars().all(|c| c.is_ascii_digit())));
        assert_eq!(value["args"]["pid"], 4242);
        assert_eq!(
            value["args"]["activity"],
            serde_json::json!({
                "details": "D",
                "state": "S",
                "assets": {"large_image": "L", "small_image": "s"},
                "timestamps": {"start": 1_700_000_000}
            })
        );
    }

    #[test]
    fn to_wire_clear_sends_null_activity() {
        let value = serde_json::to_value(to_wire_clear(7)).unwrap();
        assert_eq!(value["cmd"], "SET_ACTIVITY");
        assert_eq!(value["args"]["pid"], 7);
        assert!(value["args"]["activity"].is_null());
    }
}
