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

use session_sdk::{
    api::{
        session::UserStartMode,
        user_info::{FLAG_ADMIN, FLAG_MAIN, USER_NULL, USER_SYSTEM, USER_TYPE_FULL_SECONDARY},
    },
    log::{debug, error, info, warn},
};

use super::{injector::Injector, user_controller::UserController};

/// Boots a headless-system-user device into the proper user: makes sure a
/// main (or at least an admin) user exists, unlocks the system user, and
/// switches to the boot user.
pub struct BootUserInitializer {
    injector: Injector,
    designate_main_user: bool,
    create_initial_user: bool,
}

impl BootUserInitializer {
    /// Only meaningful in headless system user mode; returns None otherwise.
    pub fn create(
        injector: Injector,
        designate_main_user: bool,
        create_initial_user: bool,
    ) -> Option<BootUserInitializer> {
        if !injector.user_registry.is_headless_system_user_mode() {
            return None;
        }
        Some(BootUserInitializer {
            injector,
            designate_main_user,
            create_initial_user,
        })
    }

    /// Runs before services come up, so that anything needing a main user
    /// finds one.
    pub fn init(&self) {
        info!(
            "BootUserInitializer: designate_main_user={} create_initial_user={}",
            self.designate_main_user, self.create_initial_user
        );
        if self.designate_main_user {
            self.designate_main_user_if_needed();
            return;
        }
        if self.create_initial_user {
            self.create_admin_user_if_needed();
        }
    }

    fn designate_main_user_if_needed(&self) {
        let main_user = self.injector.user_registry.get_main_user_id();
        if main_user != USER_NULL {
            debug!("found existing main user {}", main_user);
            return;
        }
        if !self.promote_admin_user_to_main() {
            self.create_initial_user(true);
        }
    }

    fn promote_admin_user_to_main(&self) -> bool {
        for user in self.injector.user_registry.get_users(true) {
            if user.is_full() && user.is_admin() {
                info!("promoting admin user {} to main user", user.id);
                if !self.injector.user_registry.set_main_user(user.id) {
                    error!("failed to promote admin user {} to main user", user.id);
                    continue;
                }
                return true;
            }
        }
        false
    }

    fn create_admin_user_if_needed(&self) {
        let user_ids = self.injector.user_registry.get_user_ids();
        if user_ids.len() > 1 {
            debug!("already have {} users, not creating one", user_ids.len());
            return;
        }
        self.create_initial_user(false);
    }

    fn create_initial_user(&self, main_user: bool) {
        let mut flags = FLAG_ADMIN;
        if main_user {
            flags |= FLAG_MAIN;
        }
        match self
            .injector
            .user_registry
            .create_user(None, USER_TYPE_FULL_SECONDARY, flags)
        {
            Some(user) => {
                info!("created initial user {} (main={})", user.id, main_user);
                self.injector.user_registry.set_boot_user(user.id);
                if main_user && !self.injector.user_registry.set_main_user(user.id) {
                    error!("failed to record user {} as main user", user.id);
                }
            }
            None => error!("initial user creation failed"),
        }
    }

    /// Puts the device into the correct user state: restart/unlock the
    /// system user in the background, then switch to the boot user.
    pub async fn system_running(&self, controller: &UserController) {
        info!("BootUserInitializer: unlocking system user");
        match controller
            .start_user(USER_SYSTEM, UserStartMode::Background)
            .await
        {
            Ok(true) => {}
            other => warn!("could not restart system user in background: {:?}", other),
        }

        let boot_user = match self.injector.user_registry.get_boot_user_id() {
            Some(user_id) => user_id,
            None => {
                let main_user = self.injector.user_registry.get_main_user_id();
                if main_user != USER_NULL {
                    main_user
                } else {
                    USER_SYSTEM
                }
            }
        };
        info!("switching to boot user {}", boot_user);
        if boot_user == USER_SYSTEM {
            // The system user is already in the foreground, so no switch
            // will record the entry time; do it explicitly.
            self.injector
                .user_registry
                .set_last_entered_foreground_time_to_now(boot_user);
            return;
        }
        if !controller.start_user_in_foreground(boot_user).await {
            error!("failed to start boot user {} in foreground", boot_user);
        }
    }
}
