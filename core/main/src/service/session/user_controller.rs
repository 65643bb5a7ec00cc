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
    time::{Duration, Instant},
};

use session_sdk::{
    api::{
        manifest::session_manifest::{SessionPolicy, DEFAULT_SESSION_POLICY},
        permission::{
            AllowMode, INTERACT_ACROSS_PROFILES, INTERACT_ACROSS_USERS,
            INTERACT_ACROSS_USERS_FULL,
        },
        session::{
            DisplayId, StopUserOnSwitch, UserAssignmentResult, UserLifecycleBroadcast,
            UserOpError, UserOpResponse, UserSessionState, UserStartMode,
            COMPLETED_EVENT_STARTING, COMPLETED_EVENT_SWITCHING, COMPLETED_EVENT_UNLOCKED,
            DEFAULT_DISPLAY,
        },
        user_info::{UserId, UserInfo, NO_PROFILE_GROUP_ID, PER_USER_RANGE, USER_NULL, USER_SYSTEM},
    },
    log::{debug, info, warn},
    tokio,
    utils::error::SessionError,
};

use crate::state::session_handler::{
    MessageKind, SessionHandler, SessionMessage, UserAndLmkThreshold,
};

use super::{
    injector::Injector,
    switch_observers::{UserSwitchObserver, UserSwitchObservers},
    user_state::{KeyEvictedCallback, UserState},
};

/// Retry delay for a vetoed scheduled stop when the judgement schedule is
/// disabled (temporary background starts still go through the stop path).
const SCHEDULED_STOP_RETRY_SECS: u64 = 30;

#[derive(Clone, Default)]
struct SessionState {
    started_users: Arc<RwLock<HashMap<UserId, UserState>>>,
    user_lru: Arc<RwLock<Vec<UserId>>>,
    profile_group_ids: Arc<RwLock<HashMap<UserId, UserId>>>,
    current_user_id: Arc<RwLock<UserId>>,
    target_user_id: Arc<RwLock<UserId>>,
    temporary_background_users: Arc<RwLock<HashSet<UserId>>>,
    delayed_locked_users: Arc<RwLock<Vec<UserId>>>,
    deferred_locked_boot_users: Arc<RwLock<Vec<UserId>>>,
    stop_user_on_switch: Arc<RwLock<StopUserOnSwitch>>,
    allow_user_unlocking: Arc<RwLock<bool>>,
    ready: Arc<RwLock<bool>>,
}

impl SessionState {
    fn seed_system_user(&self) {
        self.started_users
            .write()
            .unwrap()
            .insert(USER_SYSTEM, UserState::new(USER_SYSTEM));
        self.user_lru.write().unwrap().push(USER_SYSTEM);
        *self.current_user_id.write().unwrap() = USER_SYSTEM;
        *self.target_user_id.write().unwrap() = USER_NULL;
        *self.stop_user_on_switch.write().unwrap() = StopUserOnSwitch::Default;
    }

    fn is_ready(&self) -> bool {
        *self.ready.read().unwrap()
    }

    fn current_user_id(&self) -> UserId {
        *self.current_user_id.read().unwrap()
    }

    fn target_user_id(&self) -> UserId {
        *self.target_user_id.read().unwrap()
    }

    fn get_session(&self, user_id: UserId) -> Option<UserState> {
        self.started_users.read().unwrap().get(&user_id).cloned()
    }

    fn has_running_session(&self, user_id: UserId) -> bool {
        self.started_users
            .read()
            .unwrap()
            .get(&user_id)
            .map_or(false, |session| session.is_running())
    }

    fn set_session_state(&self, user_id: UserId, state: UserSessionState) {
        if let Some(session) = self.started_users.write().unwrap().get_mut(&user_id) {
            session.set_state(state);
        }
    }

    fn is_temporary_background_user(&self, user_id: UserId) -> bool {
        self.temporary_background_users
            .read()
            .unwrap()
            .contains(&user_id)
    }

    fn add_temporary_background_user(&self, user_id: UserId) {
        self.temporary_background_users
            .write()
            .unwrap()
            .insert(user_id);
    }

    fn remove_temporary_background_user(&self, user_id: UserId) {
        self.temporary_background_users
            .write()
            .unwrap()
            .remove(&user_id);
    }

    fn remove_delayed_locked_user(&self, user_id: UserId) {
        self.delayed_locked_users
            .write()
            .unwrap()
            .retain(|id| *id != user_id);
    }

    /// Moves or inserts the user in the LRU list: foreground users go last,
    /// background users slot in just before the current user.
    fn add_user_to_lru(&self, user_id: UserId, foreground: bool) {
        let current = self.current_user_id();
        let mut lru = self.user_lru.write().unwrap();
        lru.retain(|id| *id != user_id);
        if foreground {
            lru.push(user_id);
        } else {
            let position = lru
                .iter()
                .position(|id| *id == current)
                .unwrap_or(lru.len());
            lru.insert(position, user_id);
        }
    }

    fn remove_user_from_lru(&self, user_id: UserId) {
        self.user_lru.write().unwrap().retain(|id| *id != user_id);
    }

    fn profile_group_of(&self, user_id: UserId) -> Option<UserId> {
        let group = *self.profile_group_ids.read().unwrap().get(&user_id)?;
        if group == NO_PROFILE_GROUP_ID {
            None
        } else {
            Some(group)
        }
    }
}

/// Coordinates the lifecycle of OS-user sessions: starting, switching,
/// stopping and locking, plus the disposal heuristics for background users.
/// All transition steps are serialized through the [`SessionHandler`];
/// public entry points either enqueue work or perform the synchronous
/// prefix of a transition.
pub struct UserController {
    injector: Injector,
    handler: SessionHandler,
    observers: UserSwitchObservers,
    state: SessionState,
    config: Arc<RwLock<SessionPolicy>>,
}

impl UserController {
    pub fn new(injector: Injector) -> UserController {
        let state = SessionState::default();
        state.seed_system_user();
        UserController {
            injector,
            handler: SessionHandler::new(),
            observers: UserSwitchObservers::default(),
            state,
            config: Arc::new(RwLock::new(DEFAULT_SESSION_POLICY)),
        }
    }

    pub fn handler(&self) -> &SessionHandler {
        &self.handler
    }

    pub fn set_initial_config(
        &self,
        user_switch_ui_enabled: bool,
        max_running_users: usize,
        delay_user_data_locking: bool,
        background_user_dispensable_time_secs: i64,
    ) {
        let mut config = self.config.write().unwrap();
        config.user_switch_ui_enabled = user_switch_ui_enabled;
        config.max_running_users = max_running_users;
        config.delay_user_data_locking = delay_user_data_locking;
        config.background_user_dispensable_time_secs = background_user_dispensable_time_secs;
    }

    pub fn set_session_policy(&self, policy: SessionPolicy) {
        *self.config.write().unwrap() = policy;
    }

    fn config(&self) -> SessionPolicy {
        self.config.read().unwrap().clone()
    }

    pub fn set_allow_user_unlocking(&self, allow: bool) {
        *self.state.allow_user_unlocking.write().unwrap() = allow;
    }

    pub fn set_stop_user_on_switch(&self, mode: StopUserOnSwitch) {
        *self.state.stop_user_on_switch.write().unwrap() = mode;
    }

    pub fn register_user_switch_observer(&self, observer: Arc<dyn UserSwitchObserver>) {
        self.observers.register(observer);
    }

    /// Marks the controller ready for start requests and caches the
    /// profile-group relationships from the user registry.
    pub fn on_system_ready(&self) {
        let mut groups = HashMap::new();
        for user in self.injector.user_registry.get_users(false) {
            groups.insert(user.id, user.profile_group_id);
        }
        *self.state.profile_group_ids.write().unwrap() = groups;
        *self.state.ready.write().unwrap() = true;
    }

    /// Boot has finished; unlocking becomes allowed and locked-boot
    /// broadcasts deferred during early boot are flushed.
    pub fn on_boot_complete(&self) {
        self.set_allow_user_unlocking(true);
        let deferred: Vec<UserId> = self
            .state
            .deferred_locked_boot_users
            .write()
            .unwrap()
            .drain(..)
            .collect();
        for user_id in deferred {
            self.injector
                .activity
                .send_user_broadcast(UserLifecycleBroadcast::LockedBootCompleted, user_id);
        }
    }

    pub fn get_current_user_id(&self) -> UserId {
        self.state.current_user_id()
    }

    pub fn get_current_or_target_user_id(&self) -> UserId {
        let target = self.state.target_user_id();
        if target != USER_NULL {
            target
        } else {
            self.state.current_user_id()
        }
    }

    pub fn get_started_user_state(&self, user_id: UserId) -> Option<UserState> {
        self.state.get_session(user_id)
    }

    pub fn is_system_user_started(&self) -> bool {
        self.state.get_session(USER_SYSTEM).map_or(false, |s| {
            matches!(
                s.state,
                UserSessionState::RunningLocked | UserSessionState::RunningUnlocked
            )
        })
    }

    /// Running users in LRU order with two invariants: every profile comes
    /// before its parent, and the current user comes last.
    pub fn get_running_users(&self) -> Vec<UserId> {
        let lru = self.state.user_lru.read().unwrap().clone();
        let mut running: Vec<UserId> = lru
            .into_iter()
            .filter(|id| self.state.has_running_session(*id))
            .collect();
        // Delay each parent until after the last of its running profiles.
        let mut index = 0;
        while index < running.len() {
            let user_id = running[index];
            let last_profile = running
                .iter()
                .enumerate()
                .filter(|(position, candidate)| {
                    *position > index
                        && **candidate != user_id
                        && self.state.profile_group_of(**candidate) == Some(user_id)
                })
                .map(|(position, _)| position)
                .max();
            if let Some(position) = last_profile {
                running.remove(index);
                running.insert(position, user_id);
            } else {
                index += 1;
            }
        }
        running
    }

    pub fn can_start_more_users(&self) -> bool {
        self.get_running_users().len() < self.config().max_running_users
    }

    pub async fn start_user(
        &self,
        user_id: UserId,
        mode: UserStartMode,
    ) -> Result<bool, SessionError> {
        self.start_user_internal(user_id, mode, DEFAULT_DISPLAY, false)
            .await
    }

    pub async fn start_user_visible_on_display(
        &self,
        user_id: UserId,
        display_id: DisplayId,
    ) -> Result<bool, SessionError> {
        self.start_user_internal(user_id, UserStartMode::BackgroundVisible, display_id, false)
            .await
    }

    pub async fn start_user_in_foreground(&self, user_id: UserId) -> bool {
        match self
            .start_user_internal(user_id, UserStartMode::Foreground, DEFAULT_DISPLAY, false)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                self.injector.window.set_switching_user(false);
                if self.config().user_switch_ui_enabled {
                    self.injector.window.dismiss_user_switching_dialog();
                }
                false
            }
            Err(e) => {
                warn!("start_user_in_foreground({}): {:?}", user_id, e);
                self.injector.window.set_switching_user(false);
                false
            }
        }
    }

    /// Starts a user in the background and schedules it to be stopped again
    /// after the given duration. Repeated calls move the stop deadline; a
    /// user already running non-temporarily is left untouched.
    pub async fn start_user_in_background_temporarily(
        &self,
        user_id: UserId,
        duration_secs: u64,
    ) -> Result<bool, SessionError> {
        let already_running_forever = self.state.has_running_session(user_id)
            && !self.state.is_temporary_background_user(user_id);
        let started = self
            .start_user_internal(user_id, UserStartMode::Background, DEFAULT_DISPLAY, true)
            .await?;
        if !started {
            return Ok(false);
        }
        if !already_running_forever {
            self.state.add_temporary_background_user(user_id);
            self.handler.post_unique_delayed(
                SessionMessage::ScheduleStopOfBackgroundUser(user_id),
                Duration::from_secs(duration_secs),
            );
        }
        Ok(true)
    }

    pub async fn start_profile(
        &self,
        user_id: UserId,
        even_when_disabled: bool,
    ) -> Result<bool, UserOpError> {
        let user_info = self
            .injector
            .user_registry
            .get_user_info(user_id)
            .ok_or(UserOpError::InvalidArg)?;
        if !user_info.is_profile() {
            return Err(UserOpError::InvalidArg);
        }
        if !user_info.is_enabled() && !even_when_disabled {
            return Ok(false);
        }
        match self
            .start_user_internal(
                user_id,
                UserStartMode::BackgroundVisible,
                DEFAULT_DISPLAY,
                false,
            )
            .await
        {
            Ok(started) => Ok(started),
            Err(e) => {
                warn!("start_profile({}): {:?}", user_id, e);
                Ok(false)
            }
        }
    }

    async fn start_user_internal(
        &self,
        user_id: UserId,
        mode: UserStartMode,
        display_id: DisplayId,
        temporary: bool,
    ) -> Result<bool, SessionError> {
        if !self.state.is_ready() {
            return Err(SessionError::NotReady(user_id));
        }
        let foreground = mode == UserStartMode::Foreground;
        let user_info = match self.injector.user_registry.get_user_info(user_id) {
            Some(info) => info,
            None => {
                warn!("start_user({}): no such user", user_id);
                return Ok(false);
            }
        };
        if user_info.pre_created {
            if foreground {
                warn!("start_user({}): cannot start pre-created user in foreground", user_id);
                return Ok(false);
            }
            return Ok(self.start_pre_created_user(user_id));
        }

        let old_user_id = self.state.current_user_id();
        if foreground && user_id == old_user_id && self.state.target_user_id() == USER_NULL {
            // Already in the foreground; refresh the session and re-announce.
            self.resurrect_or_create_session(user_id);
            self.state.add_user_to_lru(user_id, true);
            self.send_start_broadcasts(&user_info, true);
            return Ok(true);
        }

        let assignment = self.injector.user_registry.assign_user_to_display_on_start(
            user_id,
            user_info.profile_group_id,
            mode,
            display_id,
        );
        if assignment == UserAssignmentResult::Failure {
            warn!("start_user({}): display assignment failed", user_id);
            return Ok(false);
        }

        let config = self.config();
        if foreground {
            if config.user_switch_ui_enabled {
                self.injector.window.set_switching_user(true);
                if self.injector.lock_settings.is_device_secure(user_id) {
                    // The switch must not proceed until the old user's
                    // screen is covered.
                    self.injector
                        .window
                        .lock_device_now_and_wait_for_keyguard_shown();
                }
            }
            self.injector.activity.clear_all_locked_tasks("startUser");

            self.resurrect_or_create_session(user_id);
            self.cancel_background_user_schedules(user_id);
            self.state.remove_temporary_background_user(user_id);
            self.state.remove_delayed_locked_user(user_id);
            *self.state.target_user_id.write().unwrap() = user_id;
            self.state.add_user_to_lru(user_id, true);

            self.observers.dispatch_before_user_switching(user_id).await;
            self.send_start_broadcasts(&user_info, true);

            self.handler.post(SessionMessage::ReportUserSwitch {
                old_user_id,
                new_user_id: user_id,
            });
            self.handler.post_delayed(
                SessionMessage::UserSwitchTimeout {
                    old_user_id,
                    new_user_id: user_id,
                },
                Duration::from_millis(config.user_switch_timeout_ms),
            );
            self.handler.post(SessionMessage::UserStart(user_id));
            self.handler.post(SessionMessage::UserCurrent(user_id));
        } else {
            self.resurrect_or_create_session(user_id);
            self.state.add_user_to_lru(user_id, false);
            if *self.state.allow_user_unlocking.read().unwrap() {
                self.injector.lock_settings.unlock_user_key_if_unsecured(user_id);
                self.state
                    .set_session_state(user_id, UserSessionState::RunningLocked);
            }
            self.send_start_broadcasts(&user_info, false);
            self.handler.post(SessionMessage::UserStart(user_id));
            self.handler
                .post(SessionMessage::ReportLockedBootComplete(user_id));

            if !temporary {
                self.state.remove_temporary_background_user(user_id);
                self.handler
                    .remove_equal_messages(&SessionMessage::ScheduleStopOfBackgroundUser(user_id));
                self.state.remove_delayed_locked_user(user_id);
                if mode == UserStartMode::Background {
                    self.schedule_judgement_of_background_user(user_id);
                }
                self.stop_excess_running_users(user_id);
            }
        }
        Ok(true)
    }

    /// Pre-created users only get their storage prepared so that a later
    /// real start is fast; no lifecycle broadcasts go out.
    fn start_pre_created_user(&self, user_id: UserId) -> bool {
        self.resurrect_or_create_session(user_id);
        self.state.add_user_to_lru(user_id, false);
        self.state
            .set_session_state(user_id, UserSessionState::RunningLocked);
        self.handler.post(SessionMessage::UserStart(user_id));
        true
    }

    /// Creates a fresh session, replacing one that is already winding down.
    fn resurrect_or_create_session(&self, user_id: UserId) {
        let mut sessions = self.state.started_users.write().unwrap();
        let needs_new = sessions
            .get(&user_id)
            .map_or(true, |session| !session.is_running());
        if needs_new {
            sessions.insert(user_id, UserState::new(user_id));
            self.handler.remove_messages_matching(|message| {
                matches!(
                    message,
                    SessionMessage::FinishUserStopping { user_id: id, .. }
                    | SessionMessage::FinishUserStopped { user_id: id, .. } if *id == user_id
                )
            });
        }
    }

    fn send_start_broadcasts(&self, user_info: &UserInfo, foreground: bool) {
        if user_info.id == USER_SYSTEM
            && !self.injector.user_registry.is_headless_system_user_mode()
        {
            return;
        }
        self.injector
            .activity
            .send_user_broadcast(UserLifecycleBroadcast::UserStarted, user_info.id);
        if !foreground {
            if *self.state.allow_user_unlocking.read().unwrap() {
                self.injector
                    .activity
                    .send_user_broadcast(UserLifecycleBroadcast::LockedBootCompleted, user_info.id);
            } else {
                self.state
                    .deferred_locked_boot_users
                    .write()
                    .unwrap()
                    .push(user_info.id);
            }
        }
        self.injector
            .activity
            .send_user_broadcast(UserLifecycleBroadcast::UserStarting, user_info.id);
    }

    /// Validates the target and queues the switch; the foreground start runs
    /// on the handler.
    pub fn switch_user(&self, target_user_id: UserId) -> bool {
        let target = match self.injector.user_registry.get_user_info(target_user_id) {
            Some(info) => info,
            None => return false,
        };
        if !self.injector.user_registry.does_user_support_switch_to(&target) {
            warn!("switch_user({}): target does not support switching", target_user_id);
            return false;
        }
        if self.config().user_switch_ui_enabled {
            self.injector
                .window
                .show_user_switching_dialog(self.get_current_user_id(), target_user_id);
        }
        self.handler
            .post(SessionMessage::StartUserInForeground(target_user_id));
        true
    }

    /// Returns the device to the system (or main) user and stops the
    /// logged-out user.
    pub fn logout_user(&self, user_id: UserId) {
        self.handler
            .remove_equal_messages(&SessionMessage::StartUserInForeground(user_id));
        if user_id != self.get_current_or_target_user_id() {
            if let Err(e) = self.stop_user(user_id, false, None) {
                debug!("logout_user({}): stop skipped: {:?}", user_id, e);
            }
            return;
        }
        let logout_target = if self.injector.user_registry.is_headless_system_user_mode() {
            USER_SYSTEM
        } else {
            let main = self.injector.user_registry.get_main_user_id();
            if main != USER_NULL && main != user_id {
                main
            } else {
                USER_SYSTEM
            }
        };
        info!("logout_user({}): returning to user {}", user_id, logout_target);
        self.complete_user_switch(user_id, logout_target);
        if let Err(e) = self.stop_user(user_id, false, None) {
            warn!("logout_user({}): stop failed: {:?}", user_id, e);
        }
    }

    /// Notifies switch observers; the switch continues only once every
    /// observer has acknowledged. There is no timeout here: a switch whose
    /// observers stay silent does not proceed.
    pub async fn dispatch_user_switch(&self, old_user_id: UserId, new_user_id: UserId) {
        if self.observers.dispatch_user_switching(new_user_id).await {
            self.handler.post(SessionMessage::ContinueUserSwitch {
                old_user_id,
                new_user_id,
            });
        }
    }

    pub fn continue_user_switch(&self, old_user_id: UserId, new_user_id: UserId) {
        if self.config().user_switch_ui_enabled {
            self.injector.window.dismiss_user_switching_dialog();
        }
        self.handler
            .remove_messages_of_kind(MessageKind::UserSwitchTimeout);

        if old_user_id != new_user_id {
            let old_is_guest = self
                .injector
                .user_registry
                .get_user_info(old_user_id)
                .map_or(false, |user| user.is_guest());
            if old_user_id != USER_SYSTEM && (self.should_stop_user_on_switch() || old_is_guest) {
                self.stop_users(old_user_id, true, None);
                self.handler
                    .post(SessionMessage::ClearUserJourneySession(old_user_id));
            } else if old_user_id != USER_SYSTEM {
                self.schedule_judgement_of_background_user(old_user_id);
            }
        }

        self.handler.post(SessionMessage::CompleteUserSwitch {
            old_user_id,
            new_user_id,
        });
        self.handler.post(SessionMessage::ReportUserSwitchComplete {
            old_user_id,
            new_user_id,
        });
    }

    pub fn complete_user_switch(&self, _old_user_id: UserId, new_user_id: UserId) {
        *self.state.current_user_id.write().unwrap() = new_user_id;
        *self.state.target_user_id.write().unwrap() = USER_NULL;
        self.state.add_user_to_lru(new_user_id, true);
        self.injector
            .activity
            .start_home_activity(new_user_id, "completeUserSwitch");
    }

    pub async fn dispatch_user_switch_complete(&self, _old_user_id: UserId, new_user_id: UserId) {
        self.observers
            .dispatch_user_switch_complete(new_user_id)
            .await;
        self.injector.window.set_switching_user(false);
        self.injector
            .activity
            .send_user_broadcast(UserLifecycleBroadcast::UserSwitched, new_user_id);
    }

    /// Post-switch settling: start the new user's profiles and evict any
    /// excess background users.
    pub async fn finish_user_switch(&self, new_user_id: UserId) {
        self.start_profiles(new_user_id).await;
        self.stop_excess_running_users(new_user_id);
    }

    async fn start_profiles(&self, user_id: UserId) {
        let profiles = self.injector.user_registry.get_profiles(user_id, false);
        for profile in profiles {
            if profile.id == user_id || !profile.is_profile() {
                continue;
            }
            if !profile.is_initialized() || !profile.is_enabled() {
                continue;
            }
            let start_with_parent = self
                .injector
                .user_registry
                .get_user_properties(profile.id)
                .map_or(false, |properties| properties.start_with_parent);
            if !start_with_parent {
                continue;
            }
            if let Err(e) = self
                .start_user_internal(
                    profile.id,
                    UserStartMode::BackgroundVisible,
                    DEFAULT_DISPLAY,
                    false,
                )
                .await
            {
                warn!("start_profiles: failed to start {}: {:?}", profile.id, e);
            }
        }
    }

    fn should_stop_user_on_switch(&self) -> bool {
        match *self.state.stop_user_on_switch.read().unwrap() {
            StopUserOnSwitch::True => true,
            StopUserOnSwitch::False => false,
            StopUserOnSwitch::Default => self.config().delay_user_data_locking,
        }
    }

    /// Whether the old user's packages may be killed early during a switch:
    /// only when the old user is about to be stopped anyway.
    pub fn is_early_package_kill_enabled_for_user_switch(
        &self,
        old_user_id: UserId,
        _new_user_id: UserId,
    ) -> bool {
        match *self.state.stop_user_on_switch.read().unwrap() {
            StopUserOnSwitch::True => true,
            StopUserOnSwitch::False => false,
            StopUserOnSwitch::Default => {
                self.config().delay_user_data_locking && old_user_id != USER_SYSTEM
            }
        }
    }

    pub fn stop_user(
        &self,
        user_id: UserId,
        allow_delayed_locking: bool,
        key_evicted_callback: Option<KeyEvictedCallback>,
    ) -> UserOpResponse {
        if user_id < 0 {
            return Err(UserOpError::InvalidArg);
        }
        if user_id == USER_SYSTEM {
            return Err(UserOpError::IsSystem);
        }
        if user_id == self.get_current_or_target_user_id() {
            return Err(UserOpError::IsCurrent);
        }
        self.stop_users(user_id, allow_delayed_locking, key_evicted_callback);
        Ok(())
    }

    /// Stops a profile without touching its parent. Rejects full users.
    pub fn stop_profile(&self, user_id: UserId) -> Result<bool, UserOpError> {
        let user_info = self
            .injector
            .user_registry
            .get_user_info(user_id)
            .ok_or(UserOpError::InvalidArg)?;
        if !user_info.is_profile() {
            return Err(UserOpError::InvalidArg);
        }
        self.stop_single_user(user_id, false, None);
        Ok(true)
    }

    /// Stops a user and its running profiles.
    fn stop_users(
        &self,
        user_id: UserId,
        allow_delayed_locking: bool,
        key_evicted_callback: Option<KeyEvictedCallback>,
    ) {
        let profiles: Vec<UserId> = self
            .get_running_users()
            .into_iter()
            .filter(|id| *id != user_id && self.state.profile_group_of(*id) == Some(user_id))
            .collect();
        for profile_id in profiles {
            self.stop_single_user(profile_id, allow_delayed_locking, None);
        }
        self.stop_single_user(user_id, allow_delayed_locking, key_evicted_callback);
    }

    fn stop_single_user(
        &self,
        user_id: UserId,
        allow_delayed_locking: bool,
        key_evicted_callback: Option<KeyEvictedCallback>,
    ) {
        self.cancel_background_user_schedules(user_id);
        self.state.remove_temporary_background_user(user_id);
        {
            let mut sessions = self.state.started_users.write().unwrap();
            let session = match sessions.get_mut(&user_id) {
                Some(session) => session,
                None => return,
            };
            if !session.is_running() {
                // Already winding down; a later callback still wins.
                if key_evicted_callback.is_some() {
                    session.key_evicted_callback = key_evicted_callback;
                }
                return;
            }
            session.set_state(UserSessionState::Stopping);
            if key_evicted_callback.is_some() {
                session.key_evicted_callback = key_evicted_callback;
            }
        }
        info!("stop_single_user({}): stopping", user_id);
        self.injector.activity.stop_user_processes(user_id);
        self.handler.post(SessionMessage::FinishUserStopping {
            user_id,
            allow_delayed_locking,
        });
    }

    pub fn finish_user_stopping(&self, user_id: UserId, allow_delayed_locking: bool) {
        {
            let sessions = self.state.started_users.read().unwrap();
            match sessions.get(&user_id) {
                Some(session) if session.state == UserSessionState::Stopping => {}
                _ => return,
            }
        }
        self.injector.activity.clear_broadcast_queue_for_user(user_id);
        self.state
            .set_session_state(user_id, UserSessionState::Shutdown);
        self.handler.post(SessionMessage::FinishUserStopped {
            user_id,
            allow_delayed_locking,
        });
    }

    /// Final stage of a stop: the session record is removed and credentials
    /// are locked unless a delayed locking was both requested and permitted
    /// (and no key-evicted callback demands otherwise).
    pub fn finish_user_stopped(&self, user_id: UserId, allow_delayed_locking: bool) {
        let session = {
            let mut sessions = self.state.started_users.write().unwrap();
            let shut_down = matches!(
                sessions.get(&user_id),
                Some(session) if session.state == UserSessionState::Shutdown
            );
            if !shut_down {
                return;
            }
            match sessions.remove(&user_id) {
                Some(session) => session,
                None => return,
            }
        };
        self.state.remove_user_from_lru(user_id);
        self.state.remove_temporary_background_user(user_id);
        self.cancel_background_user_schedules(user_id);
        self.injector
            .user_registry
            .unassign_user_from_display_on_stop(user_id);
        self.injector.system_services.on_user_stopped(user_id);

        let config = self.config();
        let device_allows = config.delay_user_data_locking;
        let user_allows = self
            .injector
            .user_registry
            .get_user_properties(user_id)
            .map_or(false, |properties| {
                properties.allow_stopping_with_delayed_locking
            });
        let skip_locking = allow_delayed_locking
            && session.key_evicted_callback.is_none()
            && (device_allows || user_allows);
        if skip_locking {
            debug!("finish_user_stopped({}): delaying credential lock", user_id);
            if device_allows {
                self.remember_delayed_locked_user(user_id, config.max_running_users);
            }
        } else {
            self.injector.lock_settings.lock_user(user_id);
            if let Some(callback) = session.key_evicted_callback {
                callback.invoke(user_id);
            }
        }
    }

    /// Device-wide delayed locking keeps a bounded set of stopped-but-
    /// unlocked users; the oldest get locked once running plus remembered
    /// exceeds the running-user budget.
    fn remember_delayed_locked_user(&self, user_id: UserId, max_running_users: usize) {
        let running = self.get_running_users().len();
        let mut delayed = self.state.delayed_locked_users.write().unwrap();
        delayed.insert(0, user_id);
        while running + delayed.len() > max_running_users {
            match delayed.pop() {
                Some(oldest) => {
                    debug!("delayed locking budget exceeded, locking user {}", oldest);
                    self.injector.lock_settings.lock_user(oldest);
                }
                None => break,
            }
        }
    }

    fn stop_excess_running_users(&self, just_started_user_id: UserId) {
        let max_running_users = self.config().max_running_users;
        loop {
            let running = self.get_running_users();
            if running.len() <= max_running_users {
                return;
            }
            let current = self.get_current_or_target_user_id();
            let candidate = running.iter().copied().find(|&user_id| {
                if user_id == USER_SYSTEM
                    || user_id == current
                    || user_id == just_started_user_id
                    || self.is_same_profile_group(user_id, current)
                {
                    return false;
                }
                // A profile goes down with its parent, not on its own.
                if let Some(parent) = self.state.profile_group_of(user_id) {
                    if parent != user_id && running.contains(&parent) {
                        return false;
                    }
                }
                true
            });
            match candidate {
                Some(user_id) => {
                    info!(
                        "stop_excess_running_users: evicting least recently used user {}",
                        user_id
                    );
                    self.stop_users(user_id, false, None);
                }
                None => return,
            }
        }
    }

    fn schedule_judgement_of_background_user(&self, user_id: UserId) {
        let dispensable_secs = self.config().background_user_dispensable_time_secs;
        if dispensable_secs < 0 || user_id == USER_SYSTEM {
            return;
        }
        if self.state.is_temporary_background_user(user_id) {
            return;
        }
        // Profiles are not judged on their own; they go down with their
        // parent.
        if self
            .injector
            .user_registry
            .get_user_info(user_id)
            .map_or(false, |user| user.is_profile())
        {
            return;
        }
        self.handler.post_unique_delayed(
            SessionMessage::JudgeFateOfBackgroundUser(UserAndLmkThreshold::new(user_id, -1)),
            Duration::from_secs(dispensable_secs as u64),
        );
    }

    /// Two-phase idleness trial for a background user. The first firing
    /// records the low-memory-kill count as a baseline; the second compares
    /// against it. Increased kills mean the user is costing the device
    /// memory, so a stop is scheduled; an unchanged count restarts the
    /// trial.
    pub fn process_judge_fate_of_background_user(&self, payload: UserAndLmkThreshold) {
        let user_id = payload.user_id;
        let dispensable_secs = self.config().background_user_dispensable_time_secs;
        if dispensable_secs < 0 {
            return;
        }
        if !self.state.has_running_session(user_id)
            || user_id == self.get_current_or_target_user_id()
        {
            return;
        }
        let delay = Duration::from_secs(dispensable_secs as u64);
        let kill_count = self.injector.resources.get_lmk_kill_count();
        if payload.lmk_count_threshold < 0 {
            self.handler.post_unique_delayed(
                SessionMessage::JudgeFateOfBackgroundUser(UserAndLmkThreshold::new(
                    user_id, kill_count,
                )),
                delay,
            );
        } else if kill_count > payload.lmk_count_threshold {
            debug!(
                "judge_fate({}): kill count {} > {}, scheduling stop",
                user_id, kill_count, payload.lmk_count_threshold
            );
            self.handler.post_unique_delayed(
                SessionMessage::ScheduleStopOfBackgroundUser(user_id),
                delay,
            );
        } else {
            self.handler.post_unique_delayed(
                SessionMessage::JudgeFateOfBackgroundUser(UserAndLmkThreshold::new(user_id, -1)),
                delay,
            );
        }
    }

    /// Stops a judged background user unless a veto applies; any veto
    /// reschedules rather than cancels.
    pub fn process_scheduled_stop_of_background_user(&self, user_id: UserId) {
        if !self.state.has_running_session(user_id)
            || user_id == USER_SYSTEM
            || user_id == self.get_current_or_target_user_id()
        {
            return;
        }
        let config = self.config();
        let current = self.get_current_or_target_user_id();
        let current_is_guest = self
            .injector
            .user_registry
            .get_user_info(current)
            .map_or(false, |user| user.is_guest());
        let imminent_alarm = self
            .injector
            .resources
            .millis_until_next_alarm_for_user(user_id)
            .map_or(false, |millis| {
                millis < config.scheduled_stop_alarm_grace_secs * 1000
            });
        let playing_audio = self.injector.resources.is_user_playing_audio(user_id);
        let visible_activity = self
            .injector
            .activity
            .get_visible_activity_users()
            .contains(&user_id);

        if current_is_guest || imminent_alarm || playing_audio || visible_activity {
            debug!(
                "scheduled_stop({}): vetoed (guest={} alarm={} audio={} visible={}), rescheduling",
                user_id, current_is_guest, imminent_alarm, playing_audio, visible_activity
            );
            let retry_secs = if config.background_user_dispensable_time_secs >= 0 {
                config.background_user_dispensable_time_secs as u64
            } else {
                SCHEDULED_STOP_RETRY_SECS
            };
            self.handler.post_unique_delayed(
                SessionMessage::ScheduleStopOfBackgroundUser(user_id),
                Duration::from_secs(retry_secs),
            );
            return;
        }
        self.stop_users(user_id, true, None);
    }

    fn cancel_background_user_schedules(&self, user_id: UserId) {
        self.handler
            .remove_equal_messages(&SessionMessage::JudgeFateOfBackgroundUser(
                UserAndLmkThreshold::new(user_id, 0),
            ));
        self.handler
            .remove_equal_messages(&SessionMessage::ScheduleStopOfBackgroundUser(user_id));
    }

    /// Accumulates completed-event types for a user and coalesces the
    /// report into one message per user.
    pub fn schedule_on_user_completed_event(
        &self,
        user_id: UserId,
        event_types: u32,
        delay_ms: u64,
    ) {
        {
            let mut sessions = self.state.started_users.write().unwrap();
            match sessions.get_mut(&user_id) {
                Some(session) => session.pending_completed_events |= event_types,
                None => return,
            }
        }
        self.handler.post_unique_delayed(
            SessionMessage::UserCompletedEvent(user_id),
            Duration::from_millis(delay_ms),
        );
    }

    /// Delivers the union of accumulated events, dropping the ones the user
    /// no longer qualifies for.
    pub fn report_on_user_completed_event(&self, user_id: UserId) {
        let (pending, state) = {
            let mut sessions = self.state.started_users.write().unwrap();
            match sessions.get_mut(&user_id) {
                Some(session) => {
                    let pending = session.pending_completed_events;
                    session.pending_completed_events = 0;
                    (pending, session.state)
                }
                None => return,
            }
        };
        let mut allowed = COMPLETED_EVENT_STARTING;
        if user_id == self.get_current_or_target_user_id() {
            allowed |= COMPLETED_EVENT_SWITCHING;
        }
        if state == UserSessionState::RunningUnlocked {
            allowed |= COMPLETED_EVENT_UNLOCKED;
        }
        let delivered = pending & allowed;
        if delivered != 0 {
            self.injector
                .system_services
                .on_user_completed_event(user_id, delivered);
        }
    }

    fn is_same_profile_group(&self, user_id: UserId, other_user_id: UserId) -> bool {
        if user_id == other_user_id {
            return true;
        }
        match (
            self.state.profile_group_of(user_id),
            self.state.profile_group_of(other_user_id),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Authorization for a request targeting another user. Deterministic
    /// policy over the caller's permission tier and the requested allow
    /// mode; same-user requests always pass.
    pub fn handle_incoming_user(
        &self,
        pid: i32,
        uid: i32,
        target_user_id: UserId,
        allow_all: bool,
        allow_mode: AllowMode,
        name: &str,
        caller_package: &str,
    ) -> Result<UserId, SessionError> {
        let caller_user_id = uid / PER_USER_RANGE;
        if target_user_id == caller_user_id || allow_all {
            return Ok(target_user_id);
        }
        if self.injector.permissions.check_component_permission(
            INTERACT_ACROSS_USERS_FULL,
            pid,
            uid,
        ) {
            return Ok(target_user_id);
        }
        let same_group = self.is_same_profile_group(caller_user_id, target_user_id);
        if self
            .injector
            .permissions
            .check_component_permission(INTERACT_ACROSS_USERS, pid, uid)
        {
            let allowed = match allow_mode {
                AllowMode::NonFull | AllowMode::ProfilesOrNonFull => true,
                AllowMode::NonFullInProfile => same_group,
                AllowMode::FullOnly => false,
            };
            if allowed {
                return Ok(target_user_id);
            }
        }
        if allow_mode == AllowMode::ProfilesOrNonFull
            && same_group
            && self.injector.permissions.check_permission_for_preflight(
                INTERACT_ACROSS_PROFILES,
                pid,
                uid,
                caller_package,
            )
        {
            return Ok(target_user_id);
        }
        Err(SessionError::Security(format!(
            "permission denied for {} (pid={}, uid={}) targeting user {} with mode {}",
            name,
            pid,
            uid,
            target_user_id,
            allow_mode.as_string()
        )))
    }

    pub async fn process_message(&self, message: SessionMessage) {
        match message {
            SessionMessage::ReportUserSwitch {
                old_user_id,
                new_user_id,
            } => self.dispatch_user_switch(old_user_id, new_user_id).await,
            SessionMessage::UserSwitchTimeout {
                old_user_id,
                new_user_id,
            } => {
                warn!(
                    "switch to user {} timed out awaiting observers, continuing",
                    new_user_id
                );
                self.continue_user_switch(old_user_id, new_user_id);
            }
            SessionMessage::UserStart(user_id) => {
                self.injector.system_services.on_user_starting(user_id)
            }
            SessionMessage::UserCurrent(user_id) => self
                .injector
                .system_services
                .on_user_switching(self.state.current_user_id(), user_id),
            SessionMessage::ReportLockedBootComplete(user_id) => self
                .injector
                .system_services
                .on_locked_boot_complete(user_id),
            SessionMessage::ContinueUserSwitch {
                old_user_id,
                new_user_id,
            } => self.continue_user_switch(old_user_id, new_user_id),
            SessionMessage::CompleteUserSwitch {
                old_user_id,
                new_user_id,
            } => {
                self.complete_user_switch(old_user_id, new_user_id);
                self.finish_user_switch(new_user_id).await;
            }
            SessionMessage::ReportUserSwitchComplete {
                old_user_id,
                new_user_id,
            } => {
                self.dispatch_user_switch_complete(old_user_id, new_user_id)
                    .await
            }
            SessionMessage::ClearUserJourneySession(user_id) => {
                if let Some(session) = self.get_started_user_state(user_id) {
                    debug!(
                        "clearing switch journey {} for user {}",
                        session.journey_id, user_id
                    );
                }
            }
            SessionMessage::StartUserInForeground(user_id) => {
                self.start_user_in_foreground(user_id).await;
            }
            SessionMessage::FinishUserStopping {
                user_id,
                allow_delayed_locking,
            } => self.finish_user_stopping(user_id, allow_delayed_locking),
            SessionMessage::FinishUserStopped {
                user_id,
                allow_delayed_locking,
            } => self.finish_user_stopped(user_id, allow_delayed_locking),
            SessionMessage::JudgeFateOfBackgroundUser(payload) => {
                self.process_judge_fate_of_background_user(payload)
            }
            SessionMessage::ScheduleStopOfBackgroundUser(user_id) => {
                self.process_scheduled_stop_of_background_user(user_id)
            }
            SessionMessage::UserCompletedEvent(user_id) => {
                self.report_on_user_completed_event(user_id)
            }
        }
    }

    /// Drains due messages forever; the single consumer of the handler
    /// queue.
    pub async fn run_handler_loop(self: Arc<Self>) {
        loop {
            while let Some(message) = self.handler.take_due_message() {
                self.process_message(message).await;
            }
            match self.handler.next_deadline() {
                Some(deadline) => {
                    let delay = deadline.saturating_duration_since(Instant::now());
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.handler.wait_for_messages() => {}
                    }
                }
                None => self.handler.wait_for_messages().await,
            }
        }
    }
}
