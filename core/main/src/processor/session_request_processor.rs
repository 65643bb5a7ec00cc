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
    api::session::{SessionManagerResponse, SessionMethod, SessionRequest, SessionResponse},
    log::{debug, error},
    tokio::{self, sync::mpsc::Receiver},
};

use crate::service::session::user_controller::UserController;

/// Front door for other threads: callers enqueue a [`SessionRequest`] and
/// (optionally) await the oneshot reply while the controller does the work.
pub struct SessionRequestProcessor;

impl SessionRequestProcessor {
    pub fn start(controller: Arc<UserController>, mut receiver: Receiver<SessionRequest>) {
        tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                debug!("session request: {:?}", request.method);
                let response = Self::handle(&controller, &request.method).await;
                if request.send_response(response).is_err() {
                    error!("session request without a live requester");
                }
            }
        });
    }

    async fn handle(controller: &UserController, method: &SessionMethod) -> SessionResponse {
        match method {
            SessionMethod::StartUser(user_id, mode) => controller
                .start_user(*user_id, *mode)
                .await
                .map(SessionManagerResponse::Started),
            SessionMethod::StartUserOnDisplay(user_id, display_id) => controller
                .start_user_visible_on_display(*user_id, *display_id)
                .await
                .map(SessionManagerResponse::Started),
            SessionMethod::StartUserTemporarily(user_id, duration_secs) => controller
                .start_user_in_background_temporarily(*user_id, *duration_secs)
                .await
                .map(SessionManagerResponse::Started),
            SessionMethod::StartProfile(user_id) => {
                match controller.start_profile(*user_id, false).await {
                    Ok(started) => Ok(SessionManagerResponse::Started(started)),
                    Err(e) => Ok(SessionManagerResponse::StopResult(Err(e))),
                }
            }
            SessionMethod::StopUser(user_id, allow_delayed_locking) => {
                Ok(SessionManagerResponse::StopResult(controller.stop_user(
                    *user_id,
                    *allow_delayed_locking,
                    None,
                )))
            }
            SessionMethod::StopProfile(user_id) => match controller.stop_profile(*user_id) {
                Ok(_) => Ok(SessionManagerResponse::StopResult(Ok(()))),
                Err(e) => Ok(SessionManagerResponse::StopResult(Err(e))),
            },
            SessionMethod::SwitchUser(user_id) => Ok(SessionManagerResponse::Started(
                controller.switch_user(*user_id),
            )),
            SessionMethod::LogoutUser(user_id) => {
                controller.logout_user(*user_id);
                Ok(SessionManagerResponse::None)
            }
            SessionMethod::GetCurrentUser => Ok(SessionManagerResponse::CurrentUser(
                controller.get_current_user_id(),
            )),
            SessionMethod::GetRunningUsers => Ok(SessionManagerResponse::RunningUsers(
                controller.get_running_users(),
            )),
            SessionMethod::GetStartedUserState(user_id) => Ok(SessionManagerResponse::State(
                controller
                    .get_started_user_state(*user_id)
                    .map(|session| session.state),
            )),
        }
    }
}
