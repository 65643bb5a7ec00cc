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
    api::{manifest::session_manifest::SessionManifest, session::SessionRequest},
    log::info,
    tokio::sync::mpsc::{self, Receiver, Sender},
    utils::error::SessionError,
};

use crate::{
    bootstrap::platform_services::build_injector,
    processor::session_request_processor::SessionRequestProcessor,
    service::session::{
        boot_initializer::BootUserInitializer, injector::Injector,
        user_controller::UserController,
    },
};

const SESSION_REQUEST_CHANNEL_CAPACITY: usize = 32;

pub struct BootstrapState {
    pub manifest: SessionManifest,
    pub injector: Injector,
    pub session_tx: Sender<SessionRequest>,
    session_rx: Option<Receiver<SessionRequest>>,
}

impl BootstrapState {
    pub fn build(manifest: SessionManifest) -> Result<BootstrapState, SessionError> {
        let injector = build_injector(&manifest);
        let (session_tx, session_rx) = mpsc::channel(SESSION_REQUEST_CHANNEL_CAPACITY);
        Ok(BootstrapState {
            manifest,
            injector,
            session_tx,
            session_rx: Some(session_rx),
        })
    }

    pub fn take_session_receiver(&mut self) -> Result<Receiver<SessionRequest>, SessionError> {
        self.session_rx.take().ok_or(SessionError::SenderMissing)
    }
}

/// Brings the session controller up: wires the injector, runs the headless
/// boot-user flow if applicable, then parks on the handler loop.
pub async fn boot(mut state: BootstrapState) -> Result<(), SessionError> {
    let controller = Arc::new(UserController::new(state.injector.clone()));
    controller.set_session_policy(state.manifest.policy.clone());
    controller.on_system_ready();

    let receiver = state.take_session_receiver()?;
    SessionRequestProcessor::start(controller.clone(), receiver);

    if let Some(initializer) = BootUserInitializer::create(
        state.injector.clone(),
        state.manifest.designate_main_user_on_boot,
        state.manifest.create_initial_user_on_boot,
    ) {
        initializer.init();
        initializer.system_running(&controller).await;
    }
    controller.on_boot_complete();

    info!("session controller is up");
    controller.run_handler_loop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_state_hands_out_receiver_once() {
        let mut state = BootstrapState::build(SessionManifest::default()).unwrap();
        assert!(state.take_session_receiver().is_ok());
        assert!(state.take_session_receiver().is_err());
    }
}
