use crate::domain::token_model::Caller;
use crate::domain::token_model::CredentialsInput;
use crate::domain::token_model::SessionClaims;
use crate::domain::token_model::SESSION_EXPIRES_IN_SECONDS;
use crate::domain::user_model::UserTable;
use crate::providers::hash::HashImpl;
use crate::providers::snapshot::Snapshot;
use crate::providers::token::JwtTokenImpl;
use crate::providers::token::TokenImplError;
use log::debug;
use log::info;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenCommanderError {
    #[error(transparent)]
    TokenImplError(#[from] TokenImplError),
    #[error("bad credentials")]
    BadCredentials,
}

#[derive(Clone)]
pub struct TokenCommander {
    token: Arc<JwtTokenImpl>,
    users: Arc<Snapshot<UserTable>>,
    single_user: Option<String>,
}

impl TokenCommander {
    pub fn new(token: Arc<JwtTokenImpl>, users: Arc<Snapshot<UserTable>>) -> Self {
        Self {
            token,
            users,
            single_user: None,
        }
    }

    /// Single-operator installs skip tokens entirely and treat every request
    /// as coming from `user`. Only ever enabled from explicit configuration.
    pub fn with_single_user(mut self, user: &str) -> Self {
        self.single_user = Some(user.to_string());
        self
    }
}

impl TokenCommander {
    pub async fn exchange_credentials_for_token(
        &self,
        input: CredentialsInput,
    ) -> Result<String, TokenCommanderError> {
        let users = self.users.load();
        let user = users.find(&input.username);

        // unknown users still pay for a hash verification
        if let Err(err) = HashImpl::verify(
            &input.password,
            user.and_then(|u| u.password_hash.as_deref()),
        ) {
            info!("login failed for {:?}: {}", input.username, err);
            return Err(TokenCommanderError::BadCredentials);
        }

        let Some(user) = user else {
            return Err(TokenCommanderError::BadCredentials);
        };

        let claims = SessionClaims {
            user: user.name.clone(),
            groups: user.groups.clone(),
        };
        let token = self.token.produce_token(SESSION_EXPIRES_IN_SECONDS, claims)?;

        info!("{} logged in", user.name);
        Ok(token)
    }
}

impl TokenCommander {
    /// Signature and expiry check. Anything malformed, forged or expired is
    /// simply no identity.
    pub fn validate(&self, raw_token: &str) -> Option<SessionClaims> {
        match self.token.validate_token::<SessionClaims>(raw_token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                debug!("ignoring invalid session token: {}", err);
                None
            }
        }
    }

    pub fn caller_from_token(&self, raw_token: Option<&str>) -> Caller {
        if let Some(user) = &self.single_user {
            return Caller {
                user: Some(user.clone()),
                groups: vec![],
            };
        }

        raw_token
            .and_then(|raw| self.validate(raw))
            .map(Caller::from)
            .unwrap_or_else(Caller::anonymous)
    }
}
