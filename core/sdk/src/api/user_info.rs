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

use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

pub type UserId = i32;

pub const USER_SYSTEM: UserId = 0;
pub const USER_NULL: UserId = -10000;
pub const NO_PROFILE_GROUP_ID: UserId = USER_NULL;

/// Range of uids reserved per user; a caller uid maps back to its user id
/// by integer division.
pub const PER_USER_RANGE: i32 = 100_000;

pub const FLAG_ADMIN: u32 = 1 << 1;
pub const FLAG_GUEST: u32 = 1 << 2;
pub const FLAG_INITIALIZED: u32 = 1 << 4;
pub const FLAG_PROFILE: u32 = 1 << 5;
pub const FLAG_DISABLED: u32 = 1 << 6;
pub const FLAG_FULL: u32 = 1 << 10;
pub const FLAG_SYSTEM: u32 = 1 << 11;
pub const FLAG_MAIN: u32 = 1 << 14;

pub const USER_TYPE_FULL_SECONDARY: &str = "full.secondary";
pub const USER_TYPE_FULL_GUEST: &str = "full.guest";
pub const USER_TYPE_FULL_SYSTEM: &str = "full.system";
pub const USER_TYPE_SYSTEM_HEADLESS: &str = "system.headless";
pub const USER_TYPE_PROFILE_MANAGED: &str = "profile.managed";
pub const USER_TYPE_PROFILE_PRIVATE: &str = "profile.private";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    pub flags: u32,
    pub user_type: String,
    #[serde(default = "no_profile_group_default")]
    pub profile_group_id: UserId,
    #[serde(default = "bool::default")]
    pub pre_created: bool,
}

fn no_profile_group_default() -> UserId {
    NO_PROFILE_GROUP_ID
}

impl UserInfo {
    pub fn new(id: UserId, name: String, flags: u32) -> UserInfo {
        UserInfo {
            id,
            name,
            flags,
            user_type: default_user_type(flags).to_string(),
            profile_group_id: NO_PROFILE_GROUP_ID,
            pre_created: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.flags & FLAG_FULL != 0
    }

    pub fn is_profile(&self) -> bool {
        self.flags & FLAG_PROFILE != 0
    }

    pub fn is_guest(&self) -> bool {
        self.flags & FLAG_GUEST != 0
    }

    pub fn is_system(&self) -> bool {
        self.flags & FLAG_SYSTEM != 0
    }

    pub fn is_admin(&self) -> bool {
        self.flags & FLAG_ADMIN != 0
    }

    pub fn is_main(&self) -> bool {
        self.flags & FLAG_MAIN != 0
    }

    pub fn is_initialized(&self) -> bool {
        self.flags & FLAG_INITIALIZED != 0
    }

    pub fn is_enabled(&self) -> bool {
        self.flags & FLAG_DISABLED == 0
    }
}

/// Picks the user type implied by the info flags when none was given.
pub fn default_user_type(flags: u32) -> &'static str {
    if flags & FLAG_PROFILE != 0 {
        USER_TYPE_PROFILE_MANAGED
    } else if flags & FLAG_GUEST != 0 {
        USER_TYPE_FULL_GUEST
    } else if flags & FLAG_SYSTEM != 0 {
        USER_TYPE_FULL_SYSTEM
    } else {
        USER_TYPE_FULL_SECONDARY
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct UserProperties {
    pub start_with_parent: bool,
    pub allow_stopping_with_delayed_locking: bool,
}

pub const DEFAULT_USER_PROPERTIES: UserProperties = UserProperties {
    start_with_parent: false,
    allow_stopping_with_delayed_locking: false,
};

lazy_static! {
    static ref USER_TYPES: HashMap<&'static str, UserProperties> = {
        let mut types = HashMap::new();
        types.insert(USER_TYPE_FULL_SECONDARY, DEFAULT_USER_PROPERTIES);
        types.insert(USER_TYPE_FULL_GUEST, DEFAULT_USER_PROPERTIES);
        types.insert(USER_TYPE_FULL_SYSTEM, DEFAULT_USER_PROPERTIES);
        types.insert(USER_TYPE_SYSTEM_HEADLESS, DEFAULT_USER_PROPERTIES);
        types.insert(
            USER_TYPE_PROFILE_MANAGED,
            UserProperties {
                start_with_parent: true,
                allow_stopping_with_delayed_locking: false,
            },
        );
        types.insert(
            USER_TYPE_PROFILE_PRIVATE,
            UserProperties {
                start_with_parent: true,
                allow_stopping_with_delayed_locking: true,
            },
        );
        types
    };
}

pub fn user_properties(user_type: &str) -> UserProperties {
    USER_TYPES
        .get(user_type)
        .copied()
        .unwrap_or(DEFAULT_USER_PROPERTIES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_type() {
        assert_eq!(USER_TYPE_PROFILE_MANAGED, default_user_type(FLAG_PROFILE));
        assert_eq!(USER_TYPE_FULL_GUEST, default_user_type(FLAG_GUEST));
        assert_eq!(USER_TYPE_FULL_SYSTEM, default_user_type(FLAG_SYSTEM));
        assert_eq!(USER_TYPE_FULL_SECONDARY, default_user_type(FLAG_FULL));
        assert_eq!(USER_TYPE_FULL_SECONDARY, default_user_type(0));
    }

    #[test]
    fn test_flags() {
        let user = UserInfo::new(10, "User10".into(), FLAG_FULL | FLAG_ADMIN);
        assert!(user.is_full());
        assert!(user.is_admin());
        assert!(user.is_enabled());
        assert!(!user.is_profile());
        assert!(!user.is_guest());

        let profile = UserInfo::new(11, "Profile".into(), FLAG_PROFILE | FLAG_DISABLED);
        assert!(profile.is_profile());
        assert!(!profile.is_enabled());
        assert_eq!(USER_TYPE_PROFILE_MANAGED, profile.user_type);
    }

    #[test]
    fn test_user_properties() {
        assert!(user_properties(USER_TYPE_PROFILE_MANAGED).start_with_parent);
        assert!(!user_properties(USER_TYPE_PROFILE_MANAGED).allow_stopping_with_delayed_locking);
        assert!(user_properties(USER_TYPE_PROFILE_PRIVATE).allow_stopping_with_delayed_locking);
        assert_eq!(DEFAULT_USER_PROPERTIES, user_properties("unknown.type"));
    }
}
