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
    sync::{Arc, RwLock},
};

use session_sdk::{
    api::{
        manifest::session_manifest::SessionManifest,
        session::{DisplayId, UserAssignmentResult, UserLifecycleBroadcast, UserStartMode},
        user_info::{
            user_properties, UserId, UserInfo, UserProperties, USER_NULL,
        },
    },
    log::{debug, info},
};

use crate::service::session::injector::{
    ActivityTasks, Injector, LockSettings, PermissionChecker, ResourceMonitor, SystemServices,
    UserRegistry,
};

/// User directory backed by the manifest's `users` section. Good enough to
/// run the daemon standalone; a device integration replaces it with the real
/// account service.
pub struct ManifestUserRegistry {
    users: RwLock<HashMap<UserId, UserInfo>>,
    main_user: RwLock<UserId>,
    boot_user: RwLock<Option<UserId>>,
    headless_system_user: bool,
}

impl ManifestUserRegistry {
    pub fn new(manifest: &SessionManifest) -> ManifestUserRegistry {
        let mut users = HashMap::new();
        for user in &manifest.users {
            users.insert(user.id, user.clone());
        }
        let main_user = users
            .values()
            .find(|user| user.is_main())
            .map_or(USER_NULL, |user| user.id);
        ManifestUserRegistry {
            users: RwLock::new(users),
            main_user: RwLock::new(main_user),
            boot_user: RwLock::new(None),
            headless_system_user: manifest.headless_system_user,
        }
    }
}

impl UserRegistry for ManifestUserRegistry {
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
        let boot_user = *self.boot_user.read().unwrap();
        boot_user.or_else(|| {
            let main = self.get_main_user_id();
            if main != USER_NULL {
                Some(main)
            } else {
                None
            }
        })
    }

    fn get_user_ids(&self) -> Vec<UserId> {
        self.users.read().unwrap().keys().cloned().collect()
    }

    fn is_headless_system_user_mode(&self) -> bool {
        self.headless_system_user
    }

    fn can_switch_to_headless_system_user(&self) -> bool {
        false
    }

    fn does_user_support_switch_to(&self, user: &UserInfo) -> bool {
        if user.is_system() {
            self.can_switch_to_headless_system_user()
        } else {
            !user.is_profile() && user.is_enabled()
        }
    }

    fn create_user(&self, name: Option<String>, user_type: &str, flags: u32) -> Option<UserInfo> {
        let mut users = self.users.write().unwrap();
        let id = users.keys().max().map_or(10, |max| max + 1);
        let mut user = UserInfo::new(id, name.unwrap_or_else(|| "Owner".into()), flags);
        user.user_type = user_type.to_string();
        users.insert(id, user.clone());
        info!("created user {} ({})", id, user.user_type);
        Some(user)
    }

    fn set_main_user(&self, user_id: UserId) -> bool {
        if !self.users.read().unwrap().contains_key(&user_id) {
            return false;
        }
        *self.main_user.write().unwrap() = user_id;
        true
    }

    fn set_boot_user(&self, user_id: UserId) {
        *self.boot_user.write().unwrap() = Some(user_id);
    }

    fn set_last_entered_foreground_time_to_now(&self, user_id: UserId) {
        debug!("user {} entered the foreground", user_id);
    }

    fn assign_user_to_display_on_start(
        &self,
        user_id: UserId,
        _profile_group_id: UserId,
        mode: UserStartMode,
        display_id: DisplayId,
    ) -> UserAssignmentResult {
        debug!(
            "assigning user {} to display {} ({})",
            user_id,
            display_id,
            mode.as_string()
        );
        UserAssignmentResult::SuccessVisible
    }

    fn unassign_user_from_display_on_stop(&self, user_id: UserId) {
        debug!("unassigning user {} from its display", user_id);
    }
}

/// Tracks per-user credential lock state in memory.
#[derive(Default)]
pub struct InMemoryLockSettings {
    unlocked_users: RwLock<HashSet<UserId>>,
}

impl LockSettings for InMemoryLockSettings {
    fn unlock_user_key_if_unsecured(&self, user_id: UserId) {
        info!("unlocking credential keys for user {}", user_id);
        self.unlocked_users.write().unwrap().insert(user_id);
    }

    fn lock_user(&self, user_id: UserId) {
        info!("locking credential keys for user {}", user_id);
        self.unlocked_users.write().unwrap().remove(&user_id);
    }

    fn is_device_secure(&self, _user_id: UserId) -> bool {
        false
    }
}

/// Stands in for the window stack; switching chrome is a log line here.
#[derive(Default)]
pub struct LoggingWindowService;

impl crate::service::session::injector::WindowSurface for LoggingWindowService {
    fn set_switching_user(&self, switching: bool) {
        debug!("set_switching_user({})", switching);
    }

    fn show_user_switching_dialog(&self, old_user_id: UserId, new_user_id: UserId) {
        info!("switching from user {} to user {}", old_user_id, new_user_id);
    }

    fn dismiss_user_switching_dialog(&self) {
        debug!("dismissing user switching dialog");
    }

    fn lock_device_now_and_wait_for_keyguard_shown(&self) {
        debug!("lock_device_now_and_wait_for_keyguard_shown");
    }
}

#[derive(Default)]
pub struct LoggingActivityService;

impl ActivityTasks for LoggingActivityService {
    fn clear_all_locked_tasks(&self, reason: &str) {
        debug!("clear_all_locked_tasks({})", reason);
    }

    fn start_home_activity(&self, user_id: UserId, reason: &str) {
        info!("starting home activity for user {} ({})", user_id, reason);
    }

    fn stop_user_processes(&self, user_id: UserId) {
        info!("stopping processes of user {}", user_id);
    }

    fn clear_broadcast_queue_for_user(&self, user_id: UserId) {
        debug!("clearing broadcast queue for user {}", user_id);
    }

    fn send_user_broadcast(&self, broadcast: UserLifecycleBroadcast, user_id: UserId) {
        info!("broadcast {} for user {}", broadcast.as_event(), user_id);
    }

    fn get_visible_activity_users(&self) -> Vec<UserId> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct LoggingSystemServices;

impl SystemServices for LoggingSystemServices {
    fn on_user_starting(&self, user_id: UserId) {
        debug!("on_user_starting({})", user_id);
    }

    fn on_user_switching(&self, old_user_id: UserId, new_user_id: UserId) {
        debug!("on_user_switching({} -> {})", old_user_id, new_user_id);
    }

    fn on_user_stopped(&self, user_id: UserId) {
        debug!("on_user_stopped({})", user_id);
    }

    fn on_locked_boot_complete(&self, user_id: UserId) {
        debug!("on_locked_boot_complete({})", user_id);
    }

    fn on_user_completed_event(&self, user_id: UserId, event_types: u32) {
        debug!("on_user_completed_event({}, {:#x})", user_id, event_types);
    }
}

/// Reports a quiet device: no memory pressure, no alarms, no audio. Keeps
/// background users alive until a real monitor is wired in.
#[derive(Default)]
pub struct IdleResourceMonitor;

impl ResourceMonitor for IdleResourceMonitor {
    fn get_lmk_kill_count(&self) -> i64 {
        0
    }

    fn millis_until_next_alarm_for_user(&self, _user_id: UserId) -> Option<u64> {
        None
    }

    fn is_user_playing_audio(&self, _user_id: UserId) -> bool {
        false
    }
}

/// In-process callers are implicitly trusted.
#[derive(Default)]
pub struct PermissivePermissionChecker;

impl PermissionChecker for PermissivePermissionChecker {
    fn check_component_permission(&self, permission: &str, _pid: i32, _uid: i32) -> bool {
        debug!("check_component_permission({})", permission);
        true
    }

    fn check_permission_for_preflight(
        &self,
        permission: &str,
        _pid: i32,
        _uid: i32,
        _package: &str,
    ) -> bool {
        debug!("check_permission_for_preflight({})", permission);
        true
    }
}

pub fn build_injector(manifest: &SessionManifest) -> Injector {
    Injector {
        user_registry: Arc::new(ManifestUserRegistry::new(manifest)),
        lock_settings: Arc::new(InMemoryLockSettings::default()),
        window: Arc::new(LoggingWindowService),
        activity: Arc::new(LoggingActivityService),
        system_services: Arc::new(LoggingSystemServices),
        resources: Arc::new(IdleResourceMonitor),
        permissions: Arc::new(PermissivePermissionChecker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_sdk::{
        api::user_info::{FLAG_ADMIN, FLAG_FULL, FLAG_MAIN},
        serde_json::json,
    };

    fn manifest_with_users() -> SessionManifest {
        session_sdk::serde_json::from_value(json!({
            "headless_system_user": true,
            "users": [
                { "id": 0, "name": "System", "flags": 2048, "user_type": "system.headless" },
                { "id": 10, "name": "Owner",
                  "flags": FLAG_FULL | FLAG_ADMIN | FLAG_MAIN,
                  "user_type": "full.secondary", "profile_group_id": 10 }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_registry_from_manifest() {
        let registry = ManifestUserRegistry::new(&manifest_with_users());
        assert!(registry.is_headless_system_user_mode());
        assert_eq!(10, registry.get_main_user_id());
        assert_eq!(Some(10), registry.get_boot_user_id());
        assert!(registry.get_user_info(10).unwrap().is_admin());
    }

    #[test]
    fn test_registry_create_user_allocates_next_id() {
        let registry = ManifestUserRegistry::new(&manifest_with_users());
        let user = registry
            .create_user(None, session_sdk::api::user_info::USER_TYPE_FULL_SECONDARY, FLAG_ADMIN)
            .unwrap();
        assert_eq!(11, user.id);
        assert!(registry.set_main_user(user.id));
        assert_eq!(11, registry.get_main_user_id());
    }

    #[test]
    fn test_lock_settings_tracks_unlocked_users() {
        let lock_settings = InMemoryLockSettings::default();
        lock_settings.unlock_user_key_if_unsecured(10);
        assert!(lock_settings.unlocked_users.read().unwrap().contains(&10));
        lock_settings.lock_user(10);
        assert!(!lock_settings.unlocked_users.read().unwrap().contains(&10));
    }
}
