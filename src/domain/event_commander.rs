use crate::domain::topic::Topic;
use crate::providers::emitter::IpcPusherImpl;
use crate::providers::ipc::IpcError;
use crate::providers::json::JsonSerializerImpl;
use chrono::Utc;
use log::info;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventCommanderError {
    #[error(transparent)]
    EmitterImplError(#[from] IpcError),
    #[error(transparent)]
    JsonSerializerImplError(#[from] serde_json::Error),
    #[error("missing or malformed instrument_name")]
    BadInstrument,
    #[error("nothing to notify")]
    NothingToNotify,
}

// HTTP input types
/// Query string of a basestation `.urls` notification.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UrlNotificationInput {
    pub instrument_name: Option<String>,
    pub dive: Option<i64>,
    pub files: Option<String>,
    pub status: Option<String>,
    pub gpsstr: Option<String>,
}

// Bus payload types
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UrlEvent {
    pub glider: u32,
    pub dive: Option<i64>,
    pub content: String,
    pub time: f64,
}

/// `sg237` (any case) to 237.
fn instrument_id(name: &str) -> Option<u32> {
    name.get(2..)?.parse::<u32>().ok()
}

#[derive(Clone)]
pub struct EventCommander {
    emitter: Arc<IpcPusherImpl>,
}

impl EventCommander {
    pub fn new(emitter: Arc<IpcPusherImpl>) -> Self {
        Self { emitter }
    }
}

impl EventCommander {
    /// Turns a notification into a `NNN-urls-*` event and pushes it to the
    /// notifier. `body` is the request JSON, only used for `gpsstr`.
    pub async fn notify_url(
        &self,
        input: UrlNotificationInput,
        body: Option<Value>,
    ) -> Result<(), EventCommanderError> {
        let glider = input
            .instrument_name
            .as_deref()
            .and_then(instrument_id)
            .ok_or(EventCommanderError::BadInstrument)?;

        let time = Utc::now().timestamp_millis() as f64 / 1000.0;

        let (kind, payload) = if let Some(status) = input.status {
            let event = UrlEvent {
                glider,
                dive: input.dive,
                content: format!("status={}", status),
                time,
            };
            ("status", JsonSerializerImpl::serialize(&event)?)
        } else if input.gpsstr.is_some() {
            let body = body.unwrap_or_else(|| Value::Object(Default::default()));
            ("gpsstr", JsonSerializerImpl::serialize(&body)?)
        } else if let Some(files) = input.files {
            let event = UrlEvent {
                glider,
                dive: input.dive,
                content: format!("files={}", files),
                time,
            };
            ("files", JsonSerializerImpl::serialize(&event)?)
        } else {
            return Err(EventCommanderError::NothingToNotify);
        };

        let topic = Topic::urls(glider, kind).to_string();
        info!("sending {}", topic);
        self.emitter.emit(&topic, &payload).await?;

        Ok(())
    }
}
