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

use session_sdk::{api::user_info::UserId, async_trait::async_trait, log::warn};

/// Remote party interested in user switches. `on_user_switching` returns
/// whether the observer acknowledged; a switch only proceeds once every
/// registered observer has.
#[async_trait]
pub trait UserSwitchObserver: Send + Sync {
    async fn on_before_user_switching(&self, new_user_id: UserId);
    async fn on_user_switching(&self, new_user_id: UserId) -> bool;
    async fn on_user_switch_complete(&self, new_user_id: UserId);
}

#[derive(Clone, Default)]
pub struct UserSwitchObservers {
    observers: Arc<RwLock<Vec<Arc<dyn UserSwitchObserver>>>>,
}

impl UserSwitchObservers {
    pub fn register(&self, observer: Arc<dyn UserSwitchObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    pub fn count(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn UserSwitchObserver>> {
        self.observers.read().unwrap().clone()
    }

    pub async fn dispatch_before_user_switching(&self, new_user_id: UserId) {
        for observer in self.snapshot() {
            observer.on_before_user_switching(new_user_id).await;
        }
    }

    /// Returns true only when every observer acknowledged the switch.
    pub async fn dispatch_user_switching(&self, new_user_id: UserId) -> bool {
        let mut unacknowledged = 0;
        for observer in self.snapshot() {
            if !observer.on_user_switching(new_user_id).await {
                unacknowledged += 1;
            }
        }
        if unacknowledged > 0 {
            warn!(
                "dispatch_user_switching: {} observer(s) did not acknowledge switch to user {}",
                unacknowledged, new_user_id
            );
        }
        unacknowledged == 0
    }

    pub async fn dispatch_user_switch_complete(&self, new_user_id: UserId) {
        for observer in self.snapshot() {
            observer.on_user_switch_complete(new_user_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use session_sdk::tokio;

    #[derive(Default)]
    struct CountingObserver {
        acknowledge: bool,
        before: AtomicUsize,
        switching: AtomicUsize,
        complete: AtomicUsize,
    }

    #[async_trait]
    impl UserSwitchObserver for CountingObserver {
        async fn on_before_user_switching(&self, _new_user_id: UserId) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_user_switching(&self, _new_user_id: UserId) -> bool {
            self.switching.fetch_add(1, Ordering::SeqCst);
            self.acknowledge
        }

        async fn on_user_switch_complete(&self, _new_user_id: UserId) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dispatch_with_no_observers_is_acknowledged() {
        let observers = UserSwitchObservers::default();
        assert!(observers.dispatch_user_switching(100).await);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_each_observer_once() {
        let observers = UserSwitchObservers::default();
        let observer = Arc::new(CountingObserver {
            acknowledge: true,
            ..Default::default()
        });
        observers.register(observer.clone());

        observers.dispatch_before_user_switching(100).await;
        assert!(observers.dispatch_user_switching(100).await);
        observers.dispatch_user_switch_complete(100).await;

        assert_eq!(1, observer.before.load(Ordering::SeqCst));
        assert_eq!(1, observer.switching.load(Ordering::SeqCst));
        assert_eq!(1, observer.complete.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unacknowledged_observer_blocks() {
        let observers = UserSwitchObservers::default();
        observers.register(Arc::new(CountingObserver {
            acknowledge: true,
            ..Default::default()
        }));
        observers.register(Arc::new(CountingObserver {
            acknowledge: false,
            ..Default::default()
        }));
        assert!(!observers.dispatch_user_switching(100).await);
    }
}
