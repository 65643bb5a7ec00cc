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

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use session_sdk::{
    api::{
        session::{
            DisplayId, UserAssignmentResult, UserLifecycleBroadcast, UserStartMode,
        },
        user_info::{user_properties, UserId, UserInfo, UserProperties, USER_NULL},
    },
    async_trait::async_trait,
};

use crate::service::session::{
    injector::{
        ActivityTasks, Injector, LockSettings, PermissionChecker, ResourceMonitor, SystemServices,
        UserRegistry, WindowSurface,
    },
    switch_observers::UserSwitchObserver,
};

/// In-memory stand-in for every collaborator port, recording each call so
/// tests can assert on side effects.
#[derive(Default)]
pub struct FakeServices {
    pub users: RwLock<HashMap<UserId, UserInfo>>,
    pub headless_system_user: RwLock<bool>,
    pub can_switch_headless: RwLock<bool>,
    pub assignment_result: RwLock<Option<UserAssignmentResult>>,
    pub assignments: RwLock<Vec<(UserId, UserStartMode, DisplayId)>>,
    pub unassignments: RwLock<Vec<UserId>>,
    pub main_user: RwLock<UserId>,
    pub boot_user: RwLock<Option<UserId>>,
    pub created_users: RwLock<Vec<UserInfo>>,
    pub foreground_times_set: RwLock<Vec<UserId>>,

    pub unlocked_keys: RwLock<Vec<UserId>>,
    pub locked_users: RwLock<Vec<UserId>>,
    pub device_secure: RwLock<bool>,

    pub switching_user_calls: RwLock<Vec<bool>>,
    pub dialogs_shown: RwLock<Vec<(UserId, UserId)>>,
    pub dialogs_dismissed: AtomicUsize,
    pub keyguard_locks: AtomicUsize,

    pub cleared_locked_tasks: AtomicUsize,
    pub home_starts: RwLock<Vec<UserId>>,
    pub stopped_processes: RwLock<Vec<UserId>>,
    pub cleared_broadcast_queues: RwLock<Vec<UserId>>,
    pub broadcasts: RwLock<Vec<(UserLifecycleBroadcast, UserId)>>,
    pub relevant_user: RwLock<Option<UserId>>,
    pub visible_activity_users: RwLock<Vec<UserId>>,

    pub users_starting: RwLock<Vec<UserId>>,
    pub users_switching: RwLock<Vec<(UserId, UserId)>>,
    pub users_stopped: RwLock<Vec<UserId>>,
    pub locked_boot_completes: RwLock<Vec<UserId>>,
    pub completed_events: RwLock<Vec<(UserId, u32)>>,

    pub lmk_kill_count: RwLock<i64>,
    pub alarm_millis: RwLock<HashMap<UserId, u64>>,
    pub audio_users: RwLock<HashSet<UserId>>,

    pub component_permissions: RwLock<HashSet<String>>,
    pub preflight_permissions: RwLock<HashSet<String>>,
}

impl FakeServices {
    pub fn new() -> Arc<FakeServices> {
        Arc::new(FakeServices::default())
    }

    pub fn add_user(&self, user: UserInfo) {
        self.users.write().unwrap().insert(user.id, user);
    }

    pub fn broadcasts_sent(&self) -> Vec<UserLifecycleBroadcast> {
        self.broadcasts
            .read()
            .unwrap()
            .iter()
            .map(|(broadcast, _)| broadcast.clone())
            .collect()
    }

    pub fn injector(self: Arc<Self>) -> Injector {
        Injector {
            user_registry: self.clone(),
            lock_settings: self.clone(),
            window: self.clone(),
            activity: self.clone(),
            system_services: self.clone(),
            resources: self.clone(),
            permissions: self,
        }
    }
}

impl UserRegistry for FakeServices {
    fn get_user_info(&self, user_id: UserId) -> Option<UserInfo> {
        self.users.read().unwrap().get(&user_id).cloned()
    }

    fn get_users(&self, _exclude_dying: bool) -> Vec<UserInfo> {
        self.users.read().unwrap().values().cloned().collect()
    }

    fn get_profiles(&self, user_id: UserId, enabled_only: bool) -> Vec<UserInfo> {
        self.users
            .read()
            .unwrap()
            .values()
            .filter(|user| user.id == user_id || user.profile_group_id == user_id)
            .filter(|user| !enabled_only || user.is_enabled())
            .cloned()
            .collect()
    }

    fn get_user_properties(&self, user_id: UserId) -> Option<UserProperties> {
        self.get_user_info(user_id)
            .map(|user| user_properties(&user.user_type))
    }

    fn get_main_user_id(&self) -> UserId {
        *self.main_user.read().unwrap()
    }

    fn get_boot_user_id(&self) -> Option<UserId> {
        *self.boot_user.read().unwrap()
    }

    fn get_user_ids(&self) -> Vec<UserId> {
        self.users.read().unwrap().keys().cloned().collect()
    }

    fn is_headless_system_user_mode(&self) -> bool {
        *self.headless_system_user.read().unwrap()
    }

    fn can_switch_to_headless_system_user(&self) -> bool {
        *self.can_switch_headless.read().unwrap()
    }

    fn does_user_support_switch_to(&self, user: &UserInfo) -> bool {
        if user.is_system() {
            self.can_switch_to_headless_system_user()
        } else {
            !user.is_profile() && user.is_enabled()
        }
    }

    fn create_user(&self, name: Option<String>, user_type: &str, flags: u32) -> Option<UserInfo> {
        let id = self
            .users
            .read()
            .unwrap()
            .keys()
            .max()
            .map_or(10, |max| max + 1);
        let mut user = UserInfo::new(id, name.unwrap_or_else(|| format!("User{}", id)), flags);
        user.user_type = user_type.to_string();
        self.add_user(user.clone());
        self.created_users.write().unwrap().push(user.clone());
        Some(user)
    }

    fn set_main_user(&self, user_id: UserId) -> bool {
        if self.get_user_info(user_id).is_none() {
            return false;
        }
        *self.main_user.write().unwrap() = user_id;
        true
    }

    fn set_boot_user(&self, user_id: UserId) {
        *self.boot_user.write().unwrap() = Some(user_id);
    }

    fn set_last_entered_foreground_time_to_now(&self, user_id: UserId) {
        self.foreground_times_set.write().unwrap().push(user_id);
    }

    fn assign_user_to_display_on_start(
        &self,
        user_id: UserId,
        _profile_group_id: UserId,
        mode: UserStartMode,
        display_id: DisplayId,
    ) -> UserAssignmentResult {
        self.assignments
            .write()
            .unwrap()
            .push((user_id, mode, display_id));
        self.assignment_result
            .read()
            .unwrap()
            .unwrap_or(UserAssignmentResult::SuccessVisible)
    }

    fn unassign_user_from_display_on_stop(&self, user_id: UserId) {
        self.unassignments.write().unwrap().push(user_id);
    }
}

impl LockSettings for FakeServices {
    fn unlock_user_key_if_unsecured(&self, user_id: UserId) {
        self.unlocked_keys.write().unwrap().push(user_id);
    }

    fn lock_user(&self, user_id: UserId) {
        self.locked_users.write().unwrap().push(user_id);
    }

    fn is_device_secure(&self, _user_id: UserId) -> bool {
        *self.device_secure.read().unwrap()
    }
}

impl WindowSurface for FakeServices {
    fn set_switching_user(&self, switching: bool) {
        self.switching_user_calls.write().unwrap().push(switching);
    }

    fn show_user_switching_dialog(&self, old_user_id: UserId, new_user_id: UserId) {
        self.dialogs_shown
            .write()
            .unwrap()
            .push((old_user_id, new_user_id));
    }

    fn dismiss_user_switching_dialog(&self) {
        self.dialogs_dismissed.fetch_add(1, Ordering::SeqCst);
    }

    fn lock_device_now_and_wait_for_keyguard_shown(&self) {
        self.keyguard_locks.fetch_add(1, Ordering::SeqCst);
    }
}

impl ActivityTasks for FakeServices {
    fn clear_all_locked_tasks(&self, _reason: &str) {
        self.cleared_locked_tasks.fetch_add(1, Ordering::SeqCst);
    }

    fn start_home_activity(&self, user_id: UserId, _reason: &str) {
        self.home_starts.write().unwrap().push(user_id);
    }

    fn stop_user_processes(&self, user_id: UserId) {
        self.stopped_processes.write().unwrap().push(user_id);
    }

    fn clear_broadcast_queue_for_user(&self, user_id: UserId) {
        self.cleared_broadcast_queues.write().unwrap().push(user_id);
    }

    fn send_user_broadcast(&self, broadcast: UserLifecycleBroadcast, user_id: UserId) {
        let relevant = *self.relevant_user.read().unwrap();
        if relevant.is_none() || relevant == Some(user_id) || user_id == USER_NULL {
            self.broadcasts.write().unwrap().push((broadcast, user_id));
        }
    }

    fn get_visible_activity_users(&self) -> Vec<UserId> {
        self.visible_activity_users.read().unwrap().clone()
    }
}

impl SystemServices for FakeServices {
    fn on_user_starting(&self, user_id: UserId) {
        self.users_starting.write().unwrap().push(user_id);
    }

    fn on_user_switching(&self, old_user_id: UserId, new_user_id: UserId) {
        self.users_switching
            .write()
            .unwrap()
            .push((old_user_id, new_user_id));
    }

    fn on_user_stopped(&self, user_id: UserId) {
        self.users_stopped.write().unwrap().push(user_id);
    }

    fn on_locked_boot_complete(&self, user_id: UserId) {
        self.locked_boot_completes.write().unwrap().push(user_id);
    }

    fn on_user_completed_event(&self, user_id: UserId, event_types: u32) {
        self.completed_events
            .write()
            .unwrap()
            .push((user_id, event_types));
    }
}

impl ResourceMonitor for FakeServices {
    fn get_lmk_kill_count(&self) -> i64 {
        *self.lmk_kill_count.read().unwrap()
    }

    fn millis_until_next_alarm_for_user(&self, user_id: UserId) -> Option<u64> {
        self.alarm_millis.read().unwrap().get(&user_id).copied()
    }

    fn is_user_playing_audio(&self, user_id: UserId) -> bool {
        self.audio_users.read().unwrap().contains(&user_id)
    }
}

impl PermissionChecker for FakeServices {
    fn check_component_permission(&self, permission: &str, _pid: i32, _uid: i32) -> bool {
        self.component_permissions
            .read()
            .unwrap()
            .contains(permission)
    }

    fn check_permission_for_preflight(
        &self,
        permission: &str,
        _pid: i32,
        _uid: i32,
        _package: &str,
    ) -> bool {
        self.preflight_permissions
            .read()
            .unwrap()
            .contains(permission)
    }
}

/// Switch observer that records calls and acknowledges (or not) per its
/// configuration.
pub struct RecordingObserver {
    pub acknowledge_switching: bool,
    pub before_calls: RwLock<Vec<UserId>>,
    pub switching_calls: RwLock<Vec<UserId>>,
    pub complete_calls: RwLock<Vec<UserId>>,
}

impl RecordingObserver {
    pub fn new(acknowledge_switching: bool) -> Arc<RecordingObserver> {
        Arc::new(RecordingObserver {
            acknowledge_switching,
            before_calls: RwLock::new(Vec::new()),
            switching_calls: RwLock::new(Vec::new()),
            complete_calls: RwLock::new(Vec::new()),
        })
    }
}

#[async_trait]
impl UserSwitchObserver for RecordingObserver {
    async fn on_before_user_switching(&self, new_user_id: UserId) {
        self.before_calls.write().unwrap().push(new_user_id);
    }

    async fn on_user_switching(&self, new_user_id: UserId) -> bool {
        self.switching_calls.write().unwrap().push(new_user_id);
        self.acknowledge_switching
    }

    async fn on_user_switch_complete(&self, new_user_id: UserId) {
        self.complete_calls.write().unwrap().push(new_user_id);
    }
}
