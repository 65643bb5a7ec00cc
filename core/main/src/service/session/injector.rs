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

use std::sync::Arc;

use session_sdk::api::{
    session::{DisplayId, UserAssignmentResult, UserLifecycleBroadcast, UserStartMode},
    user_info::{UserId, UserInfo, UserProperties},
};

/// Directory of users known to the device and their display assignments.
pub trait UserRegistry: Send + Sync {
    fn get_user_info(&self, user_id: UserId) -> Option<UserInfo>;
    fn get_users(&self, exclude_dying: bool) -> Vec<UserInfo>;
    fn get_profiles(&self, user_id: UserId, enabled_only: bool) -> Vec<UserInfo>;
    fn get_user_properties(&self, user_id: UserId) -> Option<UserProperties>;
    fn get_main_user_id(&self) -> UserId;
    fn get_boot_user_id(&self) -> Option<UserId>;
    fn get_user_ids(&self) -> Vec<UserId>;
    fn is_headless_system_user_mode(&self) -> bool;
    fn can_switch_to_headless_system_user(&self) -> bool;
    fn does_user_support_switch_to(&self, user: &UserInfo) -> bool;
    fn create_user(&self, name: Option<String>, user_type: &str, flags: u32) -> Option<UserInfo>;
    fn set_main_user(&self, user_id: UserId) -> bool;
    fn set_boot_user(&self, user_id: UserId);
    fn set_last_entered_foreground_time_to_now(&self, user_id: UserId);
    fn assign_user_to_display_on_start(
        &self,
        user_id: UserId,
        profile_group_id: UserId,
        mode: UserStartMode,
        display_id: DisplayId,
    ) -> UserAssignmentResult;
    fn unassign_user_from_display_on_stop(&self, user_id: UserId);
}

/// Credential locking and keyguard state.
pub trait LockSettings: Send + Sync {
    fn unlock_user_key_if_unsecured(&self, user_id: UserId);
    fn lock_user(&self, user_id: UserId);
    fn is_device_secure(&self, user_id: UserId) -> bool;
}

/// Window-level switching chrome. `lock_device_now_and_wait_for_keyguard_shown`
/// blocks the calling switch until the keyguard acknowledges; the switch does
/// not proceed without it.
pub trait WindowSurface: Send + Sync {
    fn set_switching_user(&self, switching: bool);
    fn show_user_switching_dialog(&self, old_user_id: UserId, new_user_id: UserId);
    fn dismiss_user_switching_dialog(&self);
    fn lock_device_now_and_wait_for_keyguard_shown(&self);
}

/// Activity/task side effects of session transitions.
pub trait ActivityTasks: Send + Sync {
    fn clear_all_locked_tasks(&self, reason: &str);
    fn start_home_activity(&self, user_id: UserId, reason: &str);
    fn stop_user_processes(&self, user_id: UserId);
    fn clear_broadcast_queue_for_user(&self, user_id: UserId);
    fn send_user_broadcast(&self, broadcast: UserLifecycleBroadcast, user_id: UserId);
    fn get_visible_activity_users(&self) -> Vec<UserId>;
}

/// Downstream system services notified of lifecycle milestones.
pub trait SystemServices: Send + Sync {
    fn on_user_starting(&self, user_id: UserId);
    fn on_user_switching(&self, old_user_id: UserId, new_user_id: UserId);
    fn on_user_stopped(&self, user_id: UserId);
    fn on_locked_boot_complete(&self, user_id: UserId);
    fn on_user_completed_event(&self, user_id: UserId, event_types: u32);
}

/// Signals consulted only as stop-policy vetoes, plus the low-memory-kill
/// counter used as the idleness heuristic.
pub trait ResourceMonitor: Send + Sync {
    fn get_lmk_kill_count(&self) -> i64;
    fn millis_until_next_alarm_for_user(&self, user_id: UserId) -> Option<u64>;
    fn is_user_playing_audio(&self, user_id: UserId) -> bool;
}

pub trait PermissionChecker: Send + Sync {
    fn check_component_permission(&self, permission: &str, pid: i32, uid: i32) -> bool;
    fn check_permission_for_preflight(
        &self,
        permission: &str,
        pid: i32,
        uid: i32,
        package: &str,
    ) -> bool;
}

/// Constructor-injected collaborator services. Everything the controller
/// reaches outside itself goes through one of these ports.
#[derive(Clone)]
pub struct Injector {
    pub user_registry: Arc<dyn UserRegistry>,
    pub lock_settings: Arc<dyn LockSettings>,
    pub window: Arc<dyn WindowSurface>,
    pub activity: Arc<dyn ActivityTasks>,
    pub system_services: Arc<dyn SystemServices>,
    pub resources: Arc<dyn ResourceMonitor>,
    pub permissions: Arc<dyn PermissionChecker>,
}
