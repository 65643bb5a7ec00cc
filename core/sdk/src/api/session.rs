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

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{
    api::user_info::UserId,
    utils::{channel_utils::oneshot_send_and_log, error::SessionError},
};

pub const SESSION_EVENT_USER_STARTED: &str = "session.onUserStarted";
pub const SESSION_EVENT_USER_STARTING: &str = "session.onUserStarting";
pub const SESSION_EVENT_LOCKED_BOOT_COMPLETED: &str = "session.onLockedBootCompleted";
pub const SESSION_EVENT_USER_SWITCHED: &str = "session.onUserSwitched";

pub type DisplayId = i32;
pub const DEFAULT_DISPLAY: DisplayId = 0;

/// Event types aggregated per user and reported in one completed-event
/// callback once the user has settled.
pub const COMPLETED_EVENT_STARTING: u32 = 1;
pub const COMPLETED_EVENT_SWITCHING: u32 = 1 << 1;
pub const COMPLETED_EVENT_UNLOCKED: u32 = 1 << 2;

#[derive(Debug, Deserialize, Serialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserSessionState {
    Booting,
    RunningLocked,
    RunningUnlocked,
    Stopping,
    Shutdown,
}

impl UserSessionState {
    pub fn as_string(&self) -> &'static str {
        match self {
            UserSessionState::Booting => "booting",
            UserSessionState::RunningLocked => "running-locked",
            UserSessionState::RunningUnlocked => "running-unlocked",
            UserSessionState::Stopping => "stopping",
            UserSessionState::Shutdown => "shutdown",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            UserSessionState::Booting
                | UserSessionState::RunningLocked
                | UserSessionState::RunningUnlocked
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStartMode {
    Foreground,
    Background,
    /// Background start that stays visible alongside the current user, used
    /// for profile starts; exempt from background-user judgement.
    BackgroundVisible,
}

impl UserStartMode {
    pub fn as_string(&self) -> &'static str {
        match self {
            UserStartMode::Foreground => "foreground",
            UserStartMode::Background => "background",
            UserStartMode::BackgroundVisible => "background-visible",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum UserAssignmentResult {
    SuccessVisible,
    SuccessInvisible,
    Failure,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Default)]
pub enum StopUserOnSwitch {
    #[default]
    Default,
    True,
    False,
}

/// Operation result codes for policy-rejected start/stop requests. These are
/// expected outcomes, not failures of the controller itself.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum UserOpError {
    InvalidArg,
    IsSystem,
    IsCurrent,
}

pub type UserOpResponse = Result<(), UserOpError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UserLifecycleBroadcast {
    UserStarted,
    UserStarting,
    LockedBootCompleted,
    UserSwitched,
}

impl UserLifecycleBroadcast {
    pub fn as_event(&self) -> &'static str {
        match self {
            UserLifecycleBroadcast::UserStarted => SESSION_EVENT_USER_STARTED,
            UserLifecycleBroadcast::UserStarting => SESSION_EVENT_USER_STARTING,
            UserLifecycleBroadcast::LockedBootCompleted => SESSION_EVENT_LOCKED_BOOT_COMPLETED,
            UserLifecycleBroadcast::UserSwitched => SESSION_EVENT_USER_SWITCHED,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionMethod {
    StartUser(UserId, UserStartMode),
    StartUserOnDisplay(UserId, DisplayId),
    StartUserTemporarily(UserId, u64),
    StartProfile(UserId),
    StopUser(UserId, bool),
    StopProfile(UserId),
    SwitchUser(UserId),
    LogoutUser(UserId),
    GetCurrentUser,
    GetRunningUsers,
    GetStartedUserState(UserId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionManagerResponse {
    None,
    Started(bool),
    StopResult(UserOpResponse),
    CurrentUser(UserId),
    RunningUsers(Vec<UserId>),
    State(Option<UserSessionState>),
}

pub type SessionResponse = Result<SessionManagerResponse, SessionError>;

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub method: SessionMethod,
    pub resp_tx: Arc<RwLock<Option<oneshot::Sender<SessionResponse>>>>, // Allow fire-and-forget.
}

impl SessionRequest {
    pub fn new(method: SessionMethod, sender: oneshot::Sender<SessionResponse>) -> SessionRequest {
        SessionRequest {
            method,
            resp_tx: Arc::new(RwLock::new(Some(sender))),
        }
    }

    pub fn send_response(&self, response: SessionResponse) -> Result<(), SessionError> {
        let mut sender = self.resp_tx.write().unwrap();
        if sender.is_some() {
            oneshot_send_and_log(sender.take().unwrap(), response, "SessionManager response");
            Ok(())
        } else {
            Err(SessionError::SenderMissing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_string() {
        assert_eq!("booting", UserSessionState::Booting.as_string());
        assert_eq!(
            "running-locked",
            UserSessionState::RunningLocked.as_string()
        );
        assert_eq!(
            "running-unlocked",
            UserSessionState::RunningUnlocked.as_string()
        );
        assert_eq!("stopping", UserSessionState::Stopping.as_string());
        assert_eq!("shutdown", UserSessionState::Shutdown.as_string());
    }

    #[test]
    fn test_is_running() {
        assert!(UserSessionState::Booting.is_running());
        assert!(UserSessionState::RunningLocked.is_running());
        assert!(UserSessionState::RunningUnlocked.is_running());
        assert!(!UserSessionState::Stopping.is_running());
        assert!(!UserSessionState::Shutdown.is_running());
    }

    #[test]
    fn test_send_response_consumes_sender() {
        let (tx, mut rx) = oneshot::channel();
        let request = SessionRequest::new(SessionMethod::GetCurrentUser, tx);
        assert!(request
            .send_response(Ok(SessionManagerResponse::CurrentUser(0)))
            .is_ok());
        assert!(rx.try_recv().is_ok());
        assert_eq!(
            Err(SessionError::SenderMissing),
            request.send_response(Ok(SessionManagerResponse::None))
        );
    }
}
