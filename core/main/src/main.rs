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

use std::path::Path;

use crate::bootstrap::boot::{boot, BootstrapState};
use session_sdk::{
    api::manifest::session_manifest::SessionManifest,
    log::{error, info, warn},
    tokio,
    utils::logger::init_logger,
};

pub mod bootstrap;
pub mod processor;
pub mod service;
pub mod state;
pub mod utils;

const DEFAULT_MANIFEST_PATH: &str = "/etc/sessiond/manifest.json";

#[tokio::main(worker_threads = 2)]
async fn main() {
    // Init logger
    if let Err(e) = init_logger("sessiond".into()) {
        println!("{:?} logger init error", e);
        return;
    }

    let manifest_path = std::env::var("SESSIOND_MANIFEST")
        .unwrap_or_else(|_| DEFAULT_MANIFEST_PATH.to_string());
    let manifest = match SessionManifest::load(Path::new(&manifest_path)) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(
                "no usable manifest at {} ({:?}), using defaults",
                manifest_path, e
            );
            SessionManifest::default()
        }
    };

    let bootstate = BootstrapState::build(manifest).expect("Failure to init state for bootstrap");

    // bootstrap
    match boot(bootstate).await {
        Ok(_) => {
            info!("Sessiond exited gracefully!");
            std::process::exit(exitcode::OK);
        }
        Err(e) => {
            error!("Sessiond failed with Error: {:?}", e);
            std::process::exit(exitcode::SOFTWARE);
        }
    }
}
