use jwt_simple::prelude::Claims;
use jwt_simple::prelude::Duration;
use jwt_simple::prelude::HS256Key;
use jwt_simple::prelude::MACLike;
use jwt_simple::prelude::VerificationOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Signs and verifies session tokens with a single shared secret. Rotating the
/// secret invalidates every token issued before.
#[derive(Clone)]
pub struct JwtTokenImpl {
    key: HS256Key,
}

#[derive(Debug, Error)]
pub enum TokenImplError {
    #[error(transparent)]
    JwtImplError(#[from] jwt_simple::Error),
    #[error("empty signing secret")]
    EmptySecret,
}

impl JwtTokenImpl {
    pub fn new(secret: &str) -> Result<Self, TokenImplError> {
        if secret.is_empty() {
            return Err(TokenImplError::EmptySecret);
        }

        Ok(Self {
            key: HS256Key::from_bytes(secret.as_bytes()),
        })
    }
}

impl JwtTokenImpl {
    pub fn produce_token<T: Serialize + DeserializeOwned>(
        &self,
        expires_in: u64,
        custom_claims: T,
    ) -> Result<String, TokenImplError> {
        let claims = Claims::with_custom_claims::<T>(custom_claims, Duration::from_secs(expires_in));
        let token = self.key.authenticate(claims)?;
        Ok(token)
    }
}

impl JwtTokenImpl {
    pub fn validate_token<T: Serialize + DeserializeOwned>(
        &self,
        raw_token: &str,
    ) -> Result<T, TokenImplError> {
        let claims = self.key.verify_token::<T>(
            raw_token,
            Some(VerificationOptions {
                time_tolerance: None,
                ..VerificationOptions::default()
            }),
        )?;

        Ok(claims.custom)
    }
}
