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

use session_sdk::{
    api::{session::UserSessionState, user_info::UserId},
    uuid::Uuid,
};

/// Invoked once a stopped user's credential keys have been evicted.
#[derive(Clone)]
pub struct KeyEvictedCallback(pub Arc<dyn Fn(UserId) + Send + Sync>);

impl KeyEvictedCallback {
    pub fn new(callback: impl Fn(UserId) + Send + Sync + 'static) -> KeyEvictedCallback {
        KeyEvictedCallback(Arc::new(callback))
    }

    pub fn invoke(&self, user_id: UserId) {
        (self.0)(user_id)
    }
}

impl std::fmt::Debug for KeyEvictedCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyEvictedCallback")
    }
}

/// Per-user session record. Owned by the controller; only mutated through
/// its serialized execution path.
#[derive(Debug, Clone)]
pub struct UserState {
    pub user_id: UserId,
    pub state: UserSessionState,
    pub journey_id: Uuid,
    pub key_evicted_callback: Option<KeyEvictedCallback>,
    pub pending_completed_events: u32,
}

impl UserState {
    pub fn new(user_id: UserId) -> UserState {
        UserState {
            user_id,
            state: UserSessionState::Booting,
            journey_id: Uuid::new_v4(),
            key_evicted_callback: None,
            pending_completed_events: 0,
        }
    }

    pub fn set_state(&mut self, state: UserSessionState) {
        self.state = state;
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_booting() {
        let state = UserState::new(100);
        assert_eq!(100, state.user_id);
        assert_eq!(UserSessionState::Booting, state.state);
        assert!(state.is_running());
        assert!(state.key_evicted_callback.is_none());
    }

    #[test]
    fn test_stopping_is_not_running() {
        let mut state = UserState::new(100);
        state.set_state(UserSessionState::Stopping);
        assert!(!state.is_running());
        state.set_state(UserSessionState::Shutdown);
        assert!(!state.is_running());
    }
}
