use serde::{Deserialize, Serialize};

use crate::api::user_info::UserId;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum SessionError {
    NotReady(UserId),
    MissingInput,
    InvalidInput,
    SenderMissing,
    SendFailure,
    ParseError,
    NoResponse,
    Security(String),
}
