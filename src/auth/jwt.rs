#![forbid(unsafe_code)]

use crate::auth::types::Claims;
use crate::error::Result;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// Signs the credentials participants attach to their signaling connection.
///
/// The signing secret is supplied by configuration, never read from process-wide state.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Issue an HS256 token for `participant_name` in `meeting_id`, valid for 24 hours.
    pub fn issue(&self, meeting_id: &str, participant_name: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let claims = Claims {
            user_id: Uuid::new_v4().to_string(),
            username: participant_name.to_string(),
            meeting_id: meeting_id.to_string(),
            exp: (now.as_secs() + TOKEN_LIFETIME_SECS) as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn validate(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}
