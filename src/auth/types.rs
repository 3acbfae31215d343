#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Claims carried by a participant's signaling credential
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub meeting_id: String,
    pub exp: usize,
}
