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
    collections::HashSet,
    hash::{Hash, Hasher},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use session_sdk::{api::user_info::UserId, tokio::sync::Notify};
use strum_macros::Display;

/// Scheduling key and payload for the background-user judgement cycle.
///
/// Equality and hashing consider the user id only: a queued judgement for a
/// user must coalesce with any later one regardless of the kill-count
/// baseline it carries. Do not rely on this type for full value equality.
#[derive(Debug, Clone, Copy, Eq)]
pub struct UserAndLmkThreshold {
    pub user_id: UserId,
    pub lmk_count_threshold: i64,
}

impl UserAndLmkThreshold {
    pub fn new(user_id: UserId, lmk_count_threshold: i64) -> UserAndLmkThreshold {
        UserAndLmkThreshold {
            user_id,
            lmk_count_threshold,
        }
    }
}

impl PartialEq for UserAndLmkThreshold {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }
}

impl Hash for UserAndLmkThreshold {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.user_id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    ReportUserSwitch {
        old_user_id: UserId,
        new_user_id: UserId,
    },
    UserSwitchTimeout {
        old_user_id: UserId,
        new_user_id: UserId,
    },
    UserStart(UserId),
    UserCurrent(UserId),
    ReportLockedBootComplete(UserId),
    ContinueUserSwitch {
        old_user_id: UserId,
        new_user_id: UserId,
    },
    CompleteUserSwitch {
        old_user_id: UserId,
        new_user_id: UserId,
    },
    ReportUserSwitchComplete {
        old_user_id: UserId,
        new_user_id: UserId,
    },
    ClearUserJourneySession(UserId),
    StartUserInForeground(UserId),
    FinishUserStopping {
        user_id: UserId,
        allow_delayed_locking: bool,
    },
    FinishUserStopped {
        user_id: UserId,
        allow_delayed_locking: bool,
    },
    JudgeFateOfBackgroundUser(UserAndLmkThreshold),
    ScheduleStopOfBackgroundUser(UserId),
    UserCompletedEvent(UserId),
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ReportUserSwitch,
    UserSwitchTimeout,
    UserStart,
    UserCurrent,
    ReportLockedBootComplete,
    ContinueUserSwitch,
    CompleteUserSwitch,
    ReportUserSwitchComplete,
    ClearUserJourneySession,
    StartUserInForeground,
    FinishUserStopping,
    FinishUserStopped,
    JudgeFateOfBackgroundUser,
    ScheduleStopOfBackgroundUser,
    UserCompletedEvent,
}

impl SessionMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SessionMessage::ReportUserSwitch { .. } => MessageKind::ReportUserSwitch,
            SessionMessage::UserSwitchTimeout { .. } => MessageKind::UserSwitchTimeout,
            SessionMessage::UserStart(_) => MessageKind::UserStart,
            SessionMessage::UserCurrent(_) => MessageKind::UserCurrent,
            SessionMessage::ReportLockedBootComplete(_) => MessageKind::ReportLockedBootComplete,
            SessionMessage::ContinueUserSwitch { .. } => MessageKind::ContinueUserSwitch,
            SessionMessage::CompleteUserSwitch { .. } => MessageKind::CompleteUserSwitch,
            SessionMessage::ReportUserSwitchComplete { .. } => {
                MessageKind::ReportUserSwitchComplete
            }
            SessionMessage::ClearUserJourneySession(_) => MessageKind::ClearUserJourneySession,
            SessionMessage::StartUserInForeground(_) => MessageKind::StartUserInForeground,
            SessionMessage::FinishUserStopping { .. } => MessageKind::FinishUserStopping,
            SessionMessage::FinishUserStopped { .. } => MessageKind::FinishUserStopped,
            SessionMessage::JudgeFateOfBackgroundUser(_) => MessageKind::JudgeFateOfBackgroundUser,
            SessionMessage::ScheduleStopOfBackgroundUser(_) => {
                MessageKind::ScheduleStopOfBackgroundUser
            }
            SessionMessage::UserCompletedEvent(_) => MessageKind::UserCompletedEvent,
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    due: Instant,
    seq: u64,
    message: SessionMessage,
}

/// Deadline-ordered message queue backing the controller's serialized
/// execution model. Callers enqueue and return; one drain loop processes
/// due messages in post order. Removing a queued message is the only
/// cancellation mechanism.
#[derive(Clone, Default)]
pub struct SessionHandler {
    queue: Arc<RwLock<Vec<QueuedMessage>>>,
    next_seq: Arc<RwLock<u64>>,
    notify: Arc<Notify>,
}

impl SessionHandler {
    pub fn new() -> SessionHandler {
        SessionHandler::default()
    }

    pub fn post(&self, message: SessionMessage) {
        self.post_delayed(message, Duration::ZERO);
    }

    pub fn post_delayed(&self, message: SessionMessage, delay: Duration) {
        let seq = {
            let mut next = self.next_seq.write().unwrap();
            *next += 1;
            *next
        };
        self.queue.write().unwrap().push(QueuedMessage {
            due: Instant::now() + delay,
            seq,
            message,
        });
        self.notify.notify_one();
    }

    /// Remove-then-resubmit: any queued message equal to this one is dropped
    /// before the new deadline is queued, so repeated schedules obey the
    /// last request.
    pub fn post_unique_delayed(&self, message: SessionMessage, delay: Duration) {
        self.remove_equal_messages(&message);
        self.post_delayed(message, delay);
    }

    pub fn has_equal_messages(&self, message: &SessionMessage) -> bool {
        self.queue
            .read()
            .unwrap()
            .iter()
            .any(|queued| queued.message == *message)
    }

    pub fn has_messages_of_kind(&self, kind: MessageKind) -> bool {
        self.queue
            .read()
            .unwrap()
            .iter()
            .any(|queued| queued.message.kind() == kind)
    }

    pub fn remove_equal_messages(&self, message: &SessionMessage) -> usize {
        let mut queue = self.queue.write().unwrap();
        let before = queue.len();
        queue.retain(|queued| queued.message != *message);
        before - queue.len()
    }

    pub fn remove_messages_of_kind(&self, kind: MessageKind) -> usize {
        let mut queue = self.queue.write().unwrap();
        let before = queue.len();
        queue.retain(|queued| queued.message.kind() != kind);
        before - queue.len()
    }

    pub fn remove_messages_matching(&self, matches: impl Fn(&SessionMessage) -> bool) -> usize {
        let mut queue = self.queue.write().unwrap();
        let before = queue.len();
        queue.retain(|queued| !matches(&queued.message));
        before - queue.len()
    }

    /// Deadline of the soonest queued message equal to the given one.
    pub fn deadline_of_equal_message(&self, message: &SessionMessage) -> Option<Instant> {
        self.queue
            .read()
            .unwrap()
            .iter()
            .filter(|queued| queued.message == *message)
            .map(|queued| queued.due)
            .min()
    }

    /// Removes and returns the soonest queued message equal to the given
    /// one, if any.
    pub fn take_equal_message(&self, message: &SessionMessage) -> Option<SessionMessage> {
        let mut queue = self.queue.write().unwrap();
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.message == *message)
            .min_by_key(|(_, queued)| (queued.due, queued.seq))
            .map(|(index, _)| index)?;
        Some(queue.remove(index).message)
    }

    pub fn take_message_of_kind(&self, kind: MessageKind) -> Option<SessionMessage> {
        let mut queue = self.queue.write().unwrap();
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.message.kind() == kind)
            .min_by_key(|(_, queued)| (queued.due, queued.seq))
            .map(|(index, _)| index)?;
        Some(queue.remove(index).message)
    }

    pub fn message_kinds(&self) -> HashSet<MessageKind> {
        self.queue
            .read()
            .unwrap()
            .iter()
            .map(|queued| queued.message.kind())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.read().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.queue.write().unwrap().clear();
    }

    /// Pops the next due message, honoring deadline order then post order.
    pub fn take_due_message(&self) -> Option<SessionMessage> {
        let now = Instant::now();
        let mut queue = self.queue.write().unwrap();
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.due <= now)
            .min_by_key(|(_, queued)| (queued.due, queued.seq))
            .map(|(index, _)| index)?;
        Some(queue.remove(index).message)
    }

    /// Deadline of the soonest queued message, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue
            .read()
            .unwrap()
            .iter()
            .map(|queued| queued.due)
            .min()
    }

    pub async fn wait_for_messages(&self) {
        self.notify.notified().await;
    }
}
