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

use serde::{Deserialize, Serialize};

pub const INTERACT_ACROSS_USERS: &str = "permission.interactAcrossUsers";
pub const INTERACT_ACROSS_USERS_FULL: &str = "permission.interactAcrossUsersFull";
pub const INTERACT_ACROSS_PROFILES: &str = "permission.interactAcrossProfiles";

/// How far an incoming cross-user request may reach for each permission
/// tier the caller holds.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AllowMode {
    /// The across-users permission is enough for any target user.
    NonFull,
    /// The across-users permission is enough only within the caller's
    /// profile group.
    NonFullInProfile,
    /// Only the full across-users permission is accepted.
    FullOnly,
    /// Like NonFull, but the profile-level permission also passes for
    /// targets within the caller's profile group.
    ProfilesOrNonFull,
}

impl AllowMode {
    pub fn as_string(&self) -> &'static str {
        match self {
            AllowMode::NonFull => "nonFull",
            AllowMode::NonFullInProfile => "nonFullInProfile",
            AllowMode::FullOnly => "fullOnly",
            AllowMode::ProfilesOrNonFull => "profilesOrNonFull",
        }
    }
}
