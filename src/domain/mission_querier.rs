use crate::domain::mission_model::MissionList;
use crate::domain::mission_model::MissionRecord;
use crate::domain::mission_model::MissionSummary;
use crate::domain::mission_model::Registry;
use crate::domain::permission_resolver::authorized_missions;
use crate::domain::token_model::Caller;
use crate::providers::snapshot::Snapshot;
use crate::providers::state::database_path;
use crate::providers::state::SqliteStateImpl;
use crate::providers::state::StateImplError;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on chat rows returned in one reply.
pub const CHAT_HISTORY_LIMIT: u32 = 500;

#[derive(Debug, Error)]
pub enum MissionQuerierError {
    #[error(transparent)]
    StateImplError(#[from] StateImplError),
    #[error("not allowed")]
    ChatDisabled,
    #[error("authorization failed")]
    Unidentified,
}

#[derive(Clone)]
pub struct MissionQuerier {
    registry: Arc<Snapshot<Registry>>,
    state: Arc<SqliteStateImpl>,
    no_chat: bool,
}

impl MissionQuerier {
    pub fn new(registry: Arc<Snapshot<Registry>>, state: Arc<SqliteStateImpl>, no_chat: bool) -> Self {
        Self {
            registry,
            state,
            no_chat,
        }
    }
}

impl MissionQuerier {
    /// Every mission the caller may view, with the organization block.
    pub fn get_missions(&self, caller: &Caller) -> MissionList {
        let registry = self.registry.load();

        MissionList {
            missions: authorized_missions(&registry, caller)
                .into_iter()
                .map(MissionSummary::from)
                .collect(),
            organization: registry.organization.clone(),
        }
    }
}

impl MissionQuerier {
    pub async fn get_chat_history(
        &self,
        caller: &Caller,
        mission: &MissionRecord,
    ) -> Result<Vec<Value>, MissionQuerierError> {
        if self.no_chat {
            return Err(MissionQuerierError::ChatDisabled);
        }
        if !caller.is_identified() {
            return Err(MissionQuerierError::Unidentified);
        }

        let db = database_path(&mission.dir, mission.glider);
        let (rows, _) = self.state.chat_since(&db, 0.0, CHAT_HISTORY_LIMIT).await?;

        Ok(rows)
    }
}
