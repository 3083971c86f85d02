use crate::domain::control_querier::cmdfile_directive;
use crate::domain::mission_model::MissionRecord;
use crate::domain::mission_model::Registry;
use crate::domain::notifier::WatchedFile;
use crate::domain::permission_model::RunMode;
use crate::domain::permission_resolver::authorized_missions;
use crate::domain::token_model::Caller;
use crate::domain::topic::Category;
use crate::domain::topic::Topic;
use crate::providers::ipc::Envelope;
use crate::providers::ipc::IpcError;
use crate::providers::json::JsonSerializerImpl;
use crate::providers::listener::IpcSubscriberImpl;
use crate::providers::snapshot::Snapshot;
use crate::providers::state::database_path;
use crate::providers::state::SqliteStateImpl;
use log::debug;
use log::error;
use log::info;
use serde::Serialize;
use serde_json::Value;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_stream::StreamExt;

/// Bytes of `comm.log` replayed to a session that asks for `init`.
pub const COMM_LOG_TAIL: u64 = 10000;
/// Calls replayed at connection time.
pub const RECENT_CALLS: u32 = 3;
const CHAT_FRAME_LIMIT: u32 = 200;
const FRAME_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum StreamQuerierError {
    #[error(transparent)]
    ListenerImplError(#[from] IpcError),
}

/// What a session replays before going live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum History {
    /// comm.log tail, recent calls and chat.
    Init,
    /// Recent calls and chat.
    History,
    /// Recent calls only.
    Live,
}

impl History {
    pub fn from_variant(which: &str) -> Self {
        match which {
            "init" => History::Init,
            "history" => History::History,
            _ => History::Live,
        }
    }
}

// HTTP output types
#[derive(Clone, Debug, Serialize)]
pub struct FileFrame {
    pub glider: u32,
    pub file: String,
    pub full: PathBuf,
    pub mtime: f64,
    pub body: String,
}

/// Runs `session` on its own task and hands back its frames. Dropping the
/// returned stream aborts the task, which releases its bus subscription.
fn spawn_session<F, Fut>(session: F) -> ReceiverStream<String>
where
    F: FnOnce(mpsc::Sender<String>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let tx2 = tx.clone();

    let mut task = tokio::spawn(session(tx));

    tokio::spawn(async move {
        tokio::select! {
            _ = tx2.closed() => {
                task.abort();
            }
            _ = &mut task => {}
        }
    });

    ReceiverStream::new(rx)
}

fn frame<T: Serialize>(tag: &str, value: &T) -> Option<String> {
    match JsonSerializerImpl::serialize(value) {
        Ok(json) => Some(format!("{}{}", tag, json)),
        Err(err) => {
            error!("error serializing {} frame: {}", tag, err);
            None
        }
    }
}

/// Per-connection state of a mission stream.
struct MissionSession {
    mission: MissionRecord,
    caller: Caller,
    mode: RunMode,
    no_chat: bool,
    state: Arc<SqliteStateImpl>,
    comm_log: PathBuf,
    comm_offset: u64,
    chat_since: f64,
}

impl MissionSession {
    fn chat_enabled(&self) -> bool {
        !self.no_chat && self.caller.is_identified() && self.mode > RunMode::Public
    }

    fn db(&self) -> PathBuf {
        database_path(&self.mission.dir, self.mission.glider)
    }

    /// Bytes of comm.log from `from` to the end, moving the session offset.
    async fn read_comm_log(&mut self, from: u64) -> Option<String> {
        let mut file = tokio::fs::File::open(&self.comm_log).await.ok()?;
        let len = file.metadata().await.ok()?.len();
        let from = if from > len { 0 } else { from };

        file.seek(SeekFrom::Start(from)).await.ok()?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await.ok()?;
        self.comm_offset = from + data.len() as u64;

        (!data.is_empty()).then(|| String::from_utf8_lossy(&data).to_string())
    }

    fn comm_log_frame(&self, body: String, mtime: f64) -> Option<String> {
        frame(
            "FILE=",
            &FileFrame {
                glider: self.mission.glider,
                file: "comm.log".to_string(),
                full: self.comm_log.clone(),
                mtime,
                body,
            },
        )
    }

    async fn replay(&mut self, history: History, tx: &mpsc::Sender<String>) -> bool {
        if self.mode > RunMode::Public {
            let len = tokio::fs::metadata(&self.comm_log)
                .await
                .map(|m| m.len())
                .unwrap_or(0);

            if history == History::Init {
                if let Some(body) = self.read_comm_log(len.saturating_sub(COMM_LOG_TAIL)).await {
                    if let Some(frame) = self.comm_log_frame(body, 0.0) {
                        if tx.send(frame).await.is_err() {
                            return false;
                        }
                    }
                }
            } else {
                self.comm_offset = len;
            }

            match self.state.latest_calls(&self.db(), RECENT_CALLS).await {
                Ok(calls) => {
                    for call in calls.iter().rev() {
                        let Some(frame) = frame("NEW=", call) else {
                            continue;
                        };
                        if tx.send(frame).await.is_err() {
                            return false;
                        }
                    }
                }
                Err(err) => debug!("no call history for {}: {}", self.mission.key(), err),
            }
        }

        if self.chat_enabled() && history != History::Live {
            match self.state.chat_since(&self.db(), 0.0, CHAT_FRAME_LIMIT).await {
                Ok((rows, last)) => {
                    if let Some(last) = last {
                        self.chat_since = last;
                    }
                    if !rows.is_empty() {
                        if let Some(frame) = frame("CHAT=", &rows) {
                            if tx.send(frame).await.is_err() {
                                return false;
                            }
                        }
                    }
                }
                Err(err) => debug!("no chat history for {}: {}", self.mission.key(), err),
            }
        }

        true
    }

    /// Frame for one bus message, if this session forwards it.
    async fn translate(&mut self, envelope: Envelope) -> Option<String> {
        let topic = match envelope.topic.parse::<Topic>() {
            Ok(topic) => topic,
            Err(err) => {
                info!("unhandled topic: {}", err);
                return None;
            }
        };

        match topic.category {
            Category::Urls => Some(format!("NEW={}", envelope.payload)),
            Category::Chat if self.chat_enabled() => {
                let (rows, last) = match self
                    .state
                    .chat_since(&self.db(), self.chat_since, CHAT_FRAME_LIMIT)
                    .await
                {
                    Ok(found) => found,
                    Err(err) => {
                        error!("chat query failed for {}: {}", self.mission.key(), err);
                        return None;
                    }
                };
                if let Some(last) = last {
                    self.chat_since = last;
                }
                if rows.is_empty() {
                    return None;
                }
                frame("CHAT=", &rows)
            }
            Category::Chat => None,
            Category::Cmdfile => Some(format!(
                "CMDFILE={}",
                cmdfile_directive(&self.mission.dir.join("cmdfile")).await
            )),
            Category::File if self.mode == RunMode::Public => {
                if topic.sub.as_deref() != Some("cmdfile") {
                    return None;
                }
                Some(format!(
                    "CMDFILE={}",
                    cmdfile_directive(&self.mission.dir.join("cmdfile")).await
                ))
            }
            Category::File => {
                let change = match JsonSerializerImpl::deserialize::<WatchedFile>(&envelope.payload)
                {
                    Ok(change) => change,
                    Err(err) => {
                        error!("error deserializing file change: {}", err);
                        return None;
                    }
                };

                if change.file == "comm.log" {
                    let body = self.read_comm_log(self.comm_offset).await?;
                    return self.comm_log_frame(body, change.mtime);
                }

                let body = match tokio::fs::read(&change.full).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                    Err(err) => {
                        debug!("cannot read {}: {}", change.full.display(), err);
                        return None;
                    }
                };
                frame(
                    "FILE=",
                    &FileFrame {
                        glider: change.glider,
                        file: change.file,
                        full: change.full,
                        mtime: change.mtime,
                        body,
                    },
                )
            }
        }
    }
}

#[derive(Clone)]
pub struct StreamQuerier {
    watch_ipc: PathBuf,
    registry: Arc<Snapshot<Registry>>,
    state: Arc<SqliteStateImpl>,
    no_chat: bool,
}

impl StreamQuerier {
    pub fn new(
        watch_ipc: &Path,
        registry: Arc<Snapshot<Registry>>,
        state: Arc<SqliteStateImpl>,
        no_chat: bool,
    ) -> Self {
        Self {
            watch_ipc: watch_ipc.to_path_buf(),
            registry,
            state,
            no_chat,
        }
    }
}

impl StreamQuerier {
    /// Prefixes a mission stream subscribes to. Public deployments only see
    /// topics that carry nothing identity-bound.
    pub fn mission_prefixes(glider: u32, mode: RunMode) -> Vec<String> {
        if mode == RunMode::Public {
            vec![
                format!("{}-", Topic::category_prefix(glider, Category::Urls)),
                Topic::file(glider, "cmdfile").to_string(),
                Topic::category_prefix(glider, Category::Cmdfile),
            ]
        } else {
            vec![Topic::instrument_prefix(glider)]
        }
    }

    /// `START`, the requested history, then live frames until the client
    /// goes away or the bus does.
    pub async fn mission_stream(
        &self,
        caller: Caller,
        mission: MissionRecord,
        history: History,
    ) -> Result<impl Stream<Item = String>, StreamQuerierError> {
        let mode = self.registry.load().mode;
        let mut subscriber = IpcSubscriberImpl::connect(
            &self.watch_ipc,
            Self::mission_prefixes(mission.glider, mode),
        )
        .await?;

        let mut session = MissionSession {
            comm_log: mission.dir.join("comm.log"),
            mission,
            caller,
            mode,
            no_chat: self.no_chat,
            state: self.state.clone(),
            comm_offset: 0,
            chat_since: 0.0,
        };

        Ok(spawn_session(move |tx| async move {
            if tx.send("START".to_string()).await.is_err() {
                return;
            }
            if !session.replay(history, &tx).await {
                return;
            }

            loop {
                let envelope = match subscriber.recv().await {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        info!("stream for {} closed: {}", session.mission.key(), err);
                        return;
                    }
                };

                let Some(frame) = session.translate(envelope).await else {
                    continue;
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        }))
    }
}

impl StreamQuerier {
    /// Latest call as JSON, then every raw position fix.
    pub async fn position_stream(
        &self,
        mission: MissionRecord,
    ) -> Result<impl Stream<Item = String>, StreamQuerierError> {
        let topic = Topic::urls(mission.glider, "gpsstr").to_string();
        let subscriber = IpcSubscriberImpl::connect(&self.watch_ipc, vec![topic]).await?;
        let state = self.state.clone();

        Ok(spawn_session(move |tx| async move {
            let db = database_path(&mission.dir, mission.glider);
            match state.latest_calls(&db, 1).await {
                Ok(calls) => {
                    if let Some(call) = calls.first() {
                        if let Ok(json) = JsonSerializerImpl::serialize(call) {
                            if tx.send(json).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(err) => debug!("no latest call for {}: {}", mission.key(), err),
            }

            let envelopes = subscriber.into_stream();
            tokio::pin!(envelopes);
            while let Some(Ok(envelope)) = envelopes.next().await {
                if tx.send(envelope.payload).await.is_err() {
                    return;
                }
            }
        }))
    }
}

/// `NEW=` payload of the watch stream, which must always name its glider.
fn with_glider(payload: &str, glider: u32) -> Option<Value> {
    let mut value = JsonSerializerImpl::deserialize::<Value>(payload).ok()?;
    let object = value.as_object_mut()?;
    object.entry("glider").or_insert_with(|| Value::from(glider));
    Some(value)
}

impl StreamQuerier {
    /// Call and cmdfile activity across every top-level mission the caller
    /// may see. Visibility is re-evaluated against the live registry on each
    /// message.
    pub async fn watch_stream(
        &self,
        caller: Caller,
    ) -> Result<impl Stream<Item = String>, StreamQuerierError> {
        let mut subscriber = IpcSubscriberImpl::connect(&self.watch_ipc, vec![String::new()]).await?;
        let registry = self.registry.clone();

        Ok(spawn_session(move |tx| async move {
            if tx.send("START".to_string()).await.is_err() {
                return;
            }

            while let Ok(envelope) = subscriber.recv().await {
                let Ok(topic) = envelope.topic.parse::<Topic>() else {
                    continue;
                };

                let dir = {
                    let registry = registry.load();
                    authorized_missions(&registry, &caller)
                        .into_iter()
                        .find(|m| m.glider == topic.instrument && m.path.is_none())
                        .map(|m| m.dir.clone())
                };
                let Some(dir) = dir else {
                    continue;
                };

                let frame = match topic.category {
                    Category::Cmdfile => Some(format!(
                        "CMDFILE={:03},{}",
                        topic.instrument,
                        cmdfile_directive(&dir.join("cmdfile")).await
                    )),
                    Category::File if topic.sub.as_deref() == Some("cmdfile") => Some(format!(
                        "CMDFILE={:03},{}",
                        topic.instrument,
                        cmdfile_directive(&dir.join("cmdfile")).await
                    )),
                    Category::Urls => with_glider(&envelope.payload, topic.instrument)
                        .and_then(|value| frame("NEW=", &value)),
                    _ => None,
                };

                let Some(frame) = frame else {
                    continue;
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mission_registry::parse_registry;
    use crate::providers::emitter::IpcPublisherImpl;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    const MISSIONS: &str = r#"
missions:
  sg012: {}
  sg237:
    pilotusers: [alice]
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        publisher: IpcPublisherImpl,
        querier: StreamQuerier,
    }

    fn fixture(mode: RunMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = parse_registry(MISSIONS, mode, dir.path(), dir.path()).unwrap();
        for mission in &registry.missions {
            std::fs::create_dir_all(&mission.dir).unwrap();
        }
        let socket = dir.path().join("watch.ipc");
        let publisher = IpcPublisherImpl::bind(&socket).unwrap();
        let querier = StreamQuerier::new(
            &socket,
            Arc::new(Snapshot::new(registry)),
            Arc::new(SqliteStateImpl::new()),
            false,
        );
        Fixture {
            dir,
            publisher,
            querier,
        }
    }

    impl Fixture {
        fn mission(&self, glider: u32) -> MissionRecord {
            self.querier
                .registry
                .load()
                .find_mission(glider, None)
                .unwrap()
                .clone()
        }

        fn file_change(&self, glider: u32, name: &str) -> Envelope {
            let change = WatchedFile {
                glider,
                full: self.dir.path().join(format!("sg{:03}", glider)).join(name),
                file: name.to_string(),
                mtime: 1.0,
            };
            Envelope::new(
                Topic::file(glider, name).to_string(),
                serde_json::to_string(&change).unwrap(),
            )
        }
    }

    async fn next<S: Stream<Item = String> + Unpin>(stream: &mut S) -> String {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("no frame in time")
            .expect("stream ended")
    }

    #[test]
    fn public_streams_subscribe_to_a_subset() {
        assert_eq!(StreamQuerier::mission_prefixes(12, RunMode::Pilot), vec!["012-"]);
        assert_eq!(
            StreamQuerier::mission_prefixes(12, RunMode::Public),
            vec!["012-urls-", "012-file-cmdfile", "012-cmdfile"]
        );
    }

    #[test]
    fn watch_payloads_gain_a_glider() {
        assert_eq!(
            with_glider(r#"{"dive":3}"#, 12).unwrap(),
            serde_json::json!({"dive": 3, "glider": 12})
        );
        assert_eq!(
            with_glider(r#"{"glider":5}"#, 12).unwrap(),
            serde_json::json!({"glider": 5})
        );
        assert!(with_glider("[1]", 12).is_none());
    }

    #[tokio::test]
    async fn comm_log_changes_carry_only_new_bytes() {
        let fx = fixture(RunMode::Pilot);
        let mission = fx.mission(12);
        std::fs::write(mission.dir.join("comm.log"), "boot\n").unwrap();

        let mut stream = Box::pin(
            fx.querier
                .mission_stream(Caller::anonymous(), mission.clone(), History::Init)
                .await
                .unwrap(),
        );

        assert_eq!(next(&mut stream).await, "START");
        let tail = next(&mut stream).await;
        assert!(tail.starts_with("FILE="));
        assert!(tail.contains("boot"));

        std::fs::write(mission.dir.join("comm.log"), "boot\ncall 1\n").unwrap();
        fx.publisher.publish(fx.file_change(12, "comm.log"));
        fx.publisher
            .publish(Envelope::new("012-urls-status", r#"{"dive":1}"#));

        let frame = next(&mut stream).await;
        let body: Value = serde_json::from_str(frame.strip_prefix("FILE=").unwrap()).unwrap();
        assert_eq!(body["file"], "comm.log");
        assert_eq!(body["body"], "call 1\n");

        assert_eq!(next(&mut stream).await, r#"NEW={"dive":1}"#);
    }

    #[tokio::test]
    async fn public_streams_reduce_cmdfile_changes_to_a_directive() {
        let fx = fixture(RunMode::Public);
        let mission = fx.mission(12);
        std::fs::write(mission.dir.join("cmdfile"), "$D_TGT,200\n$RESUME\n").unwrap();

        let mut stream = Box::pin(
            fx.querier
                .mission_stream(Caller::anonymous(), mission, History::Init)
                .await
                .unwrap(),
        );
        assert_eq!(next(&mut stream).await, "START");

        fx.publisher.publish(fx.file_change(12, "cmdfile"));
        assert_eq!(next(&mut stream).await, "CMDFILE=RESUME");
    }

    #[tokio::test]
    async fn watch_only_reports_visible_missions() {
        let fx = fixture(RunMode::Pilot);
        std::fs::write(fx.mission(12).dir.join("cmdfile"), "$GO\n").unwrap();

        let mut stream = Box::pin(fx.querier.watch_stream(Caller::anonymous()).await.unwrap());
        assert_eq!(next(&mut stream).await, "START");

        fx.publisher.publish(fx.file_change(237, "cmdfile"));
        fx.publisher.publish(fx.file_change(12, "cmdfile"));
        fx.publisher
            .publish(Envelope::new("012-urls-files", r#"{"dive":4}"#));

        assert_eq!(next(&mut stream).await, "CMDFILE=012,GO");
        assert_eq!(
            next(&mut stream).await,
            r#"NEW={"dive":4,"glider":12}"#
        );
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_subscription() {
        let fx = fixture(RunMode::Pilot);
        let stream = fx
            .querier
            .position_stream(fx.mission(12))
            .await
            .unwrap();
        assert_eq!(fx.publisher.subscriber_count(), 1);

        drop(stream);

        let mut released = false;
        for _ in 0..50 {
            fx.publisher.publish(Envelope::new("012-urls-gpsstr", "{}"));
            if fx.publisher.subscriber_count() == 0 {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released);
    }
}
