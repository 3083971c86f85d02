use crate::domain::control_filter::is_forbidden;
use crate::domain::control_querier::CONTROL_FILES;
use crate::domain::mission_model::ControlRules;
use crate::domain::mission_model::MissionRecord;
use crate::providers::random::RandomImpl;
use log::info;
use log::warn;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlCommanderError {
    #[error("not allowed")]
    NotAllowed,
    #[error("oops")]
    FileMismatch,
    #[error("error saving {which}, {source}")]
    WriteError {
        which: String,
        source: std::io::Error,
    },
}

// HTTP input types
#[derive(Clone, Debug, Deserialize)]
pub struct SaveControlInput {
    pub file: Option<String>,
    #[serde(default)]
    pub contents: String,
}

#[derive(Clone)]
pub struct ControlCommander {
    no_save: bool,
}

impl ControlCommander {
    pub fn new(no_save: bool) -> Self {
        Self { no_save }
    }
}

impl ControlCommander {
    /// Writes a control file into the mission directory after the content
    /// filter has passed it. `controls` must come from the same registry
    /// snapshot the request was authorized against. The file is replaced
    /// atomically.
    pub async fn save_control_file(
        &self,
        user: Option<&str>,
        controls: &ControlRules,
        mission: &MissionRecord,
        which: &str,
        input: SaveControlInput,
    ) -> Result<String, ControlCommanderError> {
        if self.no_save {
            return Err(ControlCommanderError::NotAllowed);
        }

        if input.file.as_deref() != Some(which) || !CONTROL_FILES.contains(&which) {
            return Err(ControlCommanderError::FileMismatch);
        }

        if is_forbidden(which, &input.contents, controls) {
            warn!(
                "{:?} tried to save a forbidden {} for {}",
                user,
                which,
                mission.key()
            );
            return Err(ControlCommanderError::NotAllowed);
        }

        let target = mission.dir.join(which);
        let staging = mission
            .dir
            .join(format!(".{}.{}", which, RandomImpl::string(8)));

        let write = async {
            tokio::fs::write(&staging, input.contents.as_bytes()).await?;
            tokio::fs::rename(&staging, &target).await
        };

        if let Err(err) = write.await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(ControlCommanderError::WriteError {
                which: which.to_string(),
                source: err,
            });
        }

        info!("{:?} saved {} for {}", user, which, mission.key());

        Ok(format!("{} saved ok", which))
    }
}
