use crate::domain::mission_model::Registry;
use crate::domain::mission_registry::RegistrySource;
use crate::domain::topic::Topic;
use crate::domain::topic::CONFIG_INSTRUMENT;
use crate::providers::emitter::IpcPublisherImpl;
use crate::providers::ipc::Envelope;
use crate::providers::json::JsonSerializerImpl;
use crate::providers::listener::IpcCollectorImpl;
use log::debug;
use log::error;
use log::info;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::UNIX_EPOCH;

/// Per-mission files whose changes are published.
pub const WATCHED_FILES: [&str; 8] = [
    "comm.log",
    "cmdfile",
    "science",
    "targets",
    "scicon.sch",
    "tcm2mat.cal",
    "sg_calib_constants.m",
    "pdoscmds.bat",
];

const STAT_TIMEOUT: Duration = Duration::from_millis(500);

/// One polled file. `mtime` is seconds since the epoch, 0 until first seen.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct WatchedFile {
    pub glider: u32,
    pub full: PathBuf,
    pub file: String,
    pub mtime: f64,
}

impl WatchedFile {
    fn new(glider: u32, full: PathBuf, file: &str) -> Self {
        Self {
            glider,
            full,
            file: file.to_string(),
            mtime: 0.0,
        }
    }

    pub fn topic(&self) -> Topic {
        Topic::file(self.glider, &self.file)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

async fn stat_mtime(path: &Path) -> Option<f64> {
    let metadata = match tokio::time::timeout(STAT_TIMEOUT, tokio::fs::metadata(path)).await {
        Ok(Ok(metadata)) => metadata,
        Ok(Err(_)) => return None,
        Err(_) => {
            debug!("stat of {} timed out", path.display());
            return None;
        }
    };

    let modified = metadata.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_secs_f64())
}

#[derive(Clone, Debug, Default)]
pub struct FileWatchSet {
    files: Vec<WatchedFile>,
}

impl FileWatchSet {
    /// The two config files under the reserved instrument id, plus the fixed
    /// file list of every mission that has no sub-path.
    pub fn for_registry(registry: &Registry, config_files: &[&Path]) -> Self {
        let mut files: Vec<WatchedFile> = config_files
            .iter()
            .map(|path| WatchedFile::new(CONFIG_INSTRUMENT, path.to_path_buf(), &file_name(path)))
            .collect();

        for mission in registry.missions.iter().filter(|m| m.path.is_none()) {
            for name in WATCHED_FILES {
                files.push(WatchedFile::new(mission.glider, mission.dir.join(name), name));
            }
        }

        Self { files }
    }

    /// Keeps the last seen mtime of every file also present in `previous`.
    /// Returns the paths that are new to this set.
    pub fn carry_over(&mut self, previous: &FileWatchSet) -> Vec<PathBuf> {
        let known: HashMap<&Path, f64> = previous
            .files
            .iter()
            .map(|f| (f.full.as_path(), f.mtime))
            .collect();

        let mut added = vec![];
        for file in &mut self.files {
            match known.get(file.full.as_path()) {
                Some(mtime) => file.mtime = *mtime,
                None => added.push(file.full.clone()),
            }
        }
        added
    }

    /// Records current mtimes without reporting anything, so the first real
    /// change after this is measured against the true state.
    pub async fn prime(&mut self) {
        self.check_changes().await;
    }

    async fn prime_only(&mut self, paths: &[PathBuf]) {
        for file in self.files.iter_mut().filter(|f| paths.contains(&f.full)) {
            if let Some(mtime) = stat_mtime(&file.full).await {
                file.mtime = mtime;
            }
        }
    }

    /// Stats every file and returns the ones whose mtime differs from the
    /// stored one. A file that cannot be stat'ed is skipped this round.
    pub async fn check_changes(&mut self) -> Vec<WatchedFile> {
        let mut changed = vec![];

        for file in &mut self.files {
            let Some(mtime) = stat_mtime(&file.full).await else {
                continue;
            };

            if mtime != file.mtime {
                file.mtime = mtime;
                changed.push(file.clone());
            }
        }

        changed
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The single background process: republishes pushed events and filesystem
/// changes to every subscribed worker.
pub struct Notifier {
    collector: IpcCollectorImpl,
    publisher: IpcPublisherImpl,
    source: RegistrySource,
    users_file: PathBuf,
    watch: FileWatchSet,
    poll: Duration,
}

impl Notifier {
    pub fn new(
        collector: IpcCollectorImpl,
        publisher: IpcPublisherImpl,
        source: RegistrySource,
        users_file: PathBuf,
        registry: &Registry,
        poll: Duration,
    ) -> Self {
        let watch = FileWatchSet::for_registry(
            registry,
            &[source.missions_file.as_path(), users_file.as_path()],
        );

        Self {
            collector,
            publisher,
            source,
            users_file,
            watch,
            poll,
        }
    }
}

impl Notifier {
    pub async fn run(mut self) {
        self.watch.prime().await;
        info!("notifier watching {} files", self.watch.len());

        loop {
            self.cycle().await;
        }
    }

    /// One pass: forward pushed events (waiting at most one poll interval),
    /// then publish file changes. Returns how many messages went out.
    pub async fn cycle(&mut self) -> usize {
        let mut published = 0;

        for envelope in self.collector.drain(self.poll).await {
            debug!("forwarding {}", envelope.topic);
            self.publisher.publish(envelope);
            published += 1;
        }

        let changes = self.watch.check_changes().await;
        let mut registry_changed = false;

        for change in changes {
            let payload = match JsonSerializerImpl::serialize(&change) {
                Ok(payload) => payload,
                Err(err) => {
                    error!("error serializing file change: {}", err);
                    continue;
                }
            };

            if change.glider == CONFIG_INSTRUMENT && change.full == self.source.missions_file {
                registry_changed = true;
            }

            info!("{} changed", change.full.display());
            self.publisher
                .publish(Envelope::new(change.topic().to_string(), payload));
            published += 1;
        }

        if registry_changed {
            self.rebuild_watch_set().await;
        }

        published
    }

    async fn rebuild_watch_set(&mut self) {
        let source = self.source.clone();
        let registry = match tokio::task::spawn_blocking(move || source.load()).await {
            Ok(Ok(registry)) => registry,
            Ok(Err(err)) => {
                error!("keeping previous watch set, registry reload failed: {}", err);
                return;
            }
            Err(err) => {
                error!("keeping previous watch set, reload task failed: {}", err);
                return;
            }
        };

        let mut watch = FileWatchSet::for_registry(
            &registry,
            &[self.source.missions_file.as_path(), self.users_file.as_path()],
        );
        let added = watch.carry_over(&self.watch);
        watch.prime_only(&added).await;

        info!("watch set rebuilt, {} files ({} new)", watch.len(), added.len());
        self.watch = watch;
    }
}
