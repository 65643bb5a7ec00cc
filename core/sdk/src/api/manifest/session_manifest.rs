// Copyright 2023 Comcast Cable Communications Management, LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{fs, path::Path};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{api::user_info::UserInfo, utils::error::SessionError};

pub const DEFAULT_MAX_RUNNING_USERS: usize = 3;
pub const DEFAULT_USER_SWITCH_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_SCHEDULED_STOP_ALARM_GRACE_SECS: u64 = 30 * 60;

#[derive(Deserialize, Debug, Clone)]
pub struct SessionManifest {
    #[serde(default)]
    pub policy: SessionPolicy,
    #[serde(default = "bool::default")]
    pub headless_system_user: bool,
    #[serde(default = "bool::default")]
    pub designate_main_user_on_boot: bool,
    #[serde(default = "bool::default")]
    pub create_initial_user_on_boot: bool,
    #[serde(default)]
    pub users: Vec<UserInfo>,
}

/// Tunables for the running-user lifecycle. A negative
/// `background_user_dispensable_time_secs` disables the background-user
/// judgement/stop schedules entirely.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionPolicy {
    #[serde(default = "user_switch_ui_enabled_default")]
    pub user_switch_ui_enabled: bool,
    #[serde(default = "max_running_users_default")]
    pub max_running_users: usize,
    #[serde(default = "bool::default")]
    pub delay_user_data_locking: bool,
    #[serde(default = "dispensable_time_default")]
    pub background_user_dispensable_time_secs: i64,
    #[serde(default = "user_switch_timeout_default")]
    pub user_switch_timeout_ms: u64,
    #[serde(default = "alarm_grace_default")]
    pub scheduled_stop_alarm_grace_secs: u64,
}

pub const DEFAULT_SESSION_POLICY: SessionPolicy = SessionPolicy {
    user_switch_ui_enabled: true,
    max_running_users: DEFAULT_MAX_RUNNING_USERS,
    delay_user_data_locking: false,
    background_user_dispensable_time_secs: -1,
    user_switch_timeout_ms: DEFAULT_USER_SWITCH_TIMEOUT_MS,
    scheduled_stop_alarm_grace_secs: DEFAULT_SCHEDULED_STOP_ALARM_GRACE_SECS,
};

fn user_switch_ui_enabled_default() -> bool {
    true
}

fn max_running_users_default() -> usize {
    DEFAULT_MAX_RUNNING_USERS
}

fn dispensable_time_default() -> i64 {
    -1
}

fn user_switch_timeout_default() -> u64 {
    DEFAULT_USER_SWITCH_TIMEOUT_MS
}

fn alarm_grace_default() -> u64 {
    DEFAULT_SCHEDULED_STOP_ALARM_GRACE_SECS
}

impl Default for SessionPolicy {
    fn default() -> Self {
        DEFAULT_SESSION_POLICY
    }
}

impl Default for SessionManifest {
    fn default() -> Self {
        SessionManifest {
            policy: SessionPolicy::default(),
            headless_system_user: false,
            designate_main_user_on_boot: false,
            create_initial_user_on_boot: false,
            users: Vec::new(),
        }
    }
}

impl SessionManifest {
    pub fn load(path: &Path) -> Result<SessionManifest, SessionError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            warn!("Failed to read {}: {}", path.display(), e);
            SessionError::MissingInput
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse {}: {}", path.display(), e);
            SessionError::ParseError
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_defaults() {
        let manifest: SessionManifest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(DEFAULT_SESSION_POLICY, manifest.policy);
        assert!(!manifest.headless_system_user);
        assert!(manifest.users.is_empty());
    }

    #[test]
    fn test_partial_policy() {
        let manifest: SessionManifest = serde_json::from_value(json!({
            "policy": {
                "maxRunningUsers": 5,
                "backgroundUserDispensableTimeSecs": 120
            },
            "headless_system_user": true
        }))
        .unwrap();
        assert_eq!(5, manifest.policy.max_running_users);
        assert_eq!(120, manifest.policy.background_user_dispensable_time_secs);
        assert!(manifest.policy.user_switch_ui_enabled);
        assert!(!manifest.policy.delay_user_data_locking);
        assert!(manifest.headless_system_user);
    }

    #[test]
    fn test_users_section() {
        let manifest: SessionManifest = serde_json::from_value(json!({
            "users": [
                { "id": 0, "name": "System", "flags": 2048, "user_type": "system.headless" },
                { "id": 10, "name": "Owner", "flags": 1026, "user_type": "full.secondary",
                  "profile_group_id": 10 }
            ]
        }))
        .unwrap();
        assert_eq!(2, manifest.users.len());
        assert_eq!(10, manifest.users[1].profile_group_id);
        assert!(!manifest.users[0].pre_created);
    }
}
