use crate::domain::mission_model::Registry;
use crate::domain::mission_registry::RegistrySource;
use crate::domain::topic::Category;
use crate::domain::topic::Topic;
use crate::domain::topic::CONFIG_INSTRUMENT;
use crate::domain::user_model::UserTable;
use crate::providers::ipc::Envelope;
use crate::providers::listener::IpcSubscriberImpl;
use crate::providers::snapshot::Snapshot;
use log::error;
use log::info;
use log::warn;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reloaded {
    Registry,
    Users,
    Nothing,
}

/// Keeps this worker's registry and user table in step with the config
/// files, driven by the reserved `000-file-` topics.
#[derive(Clone)]
pub struct ConfigSynchronizer {
    watch_ipc: PathBuf,
    source: RegistrySource,
    users_file: PathBuf,
    registry: Arc<Snapshot<Registry>>,
    users: Arc<Snapshot<UserTable>>,
}

/// Topic the notifier publishes when `path` changes.
fn config_topic(path: &Path) -> Option<Topic> {
    path.file_name()
        .map(|name| Topic::config_file(&name.to_string_lossy()))
}

impl ConfigSynchronizer {
    pub fn new(
        watch_ipc: &Path,
        source: RegistrySource,
        users_file: &Path,
        registry: Arc<Snapshot<Registry>>,
        users: Arc<Snapshot<UserTable>>,
    ) -> Self {
        Self {
            watch_ipc: watch_ipc.to_path_buf(),
            source,
            users_file: users_file.to_path_buf(),
            registry,
            users,
        }
    }
}

impl ConfigSynchronizer {
    pub async fn sync_events_to_state(&self) {
        let prefix = Topic::category_prefix(CONFIG_INSTRUMENT, Category::File);

        loop {
            let mut subscriber =
                match IpcSubscriberImpl::connect(&self.watch_ipc, vec![format!("{}-", prefix)]).await
                {
                    Ok(subscriber) => subscriber,
                    Err(err) => {
                        warn!("config watcher cannot subscribe yet: {}", err);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
            info!("config watcher subscribed on {}", self.watch_ipc.display());

            loop {
                match subscriber.recv().await {
                    Ok(envelope) => {
                        self.apply(&envelope).await;
                    }
                    Err(err) => {
                        error!("config watcher lost the bus: {}", err);
                        break;
                    }
                }
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Reloads whichever table the event names. A failed reload keeps the
    /// last good snapshot.
    pub async fn apply(&self, envelope: &Envelope) -> Reloaded {
        let Ok(topic) = envelope.topic.parse::<Topic>() else {
            return Reloaded::Nothing;
        };

        if config_topic(&self.source.missions_file).as_ref() == Some(&topic) {
            let source = self.source.clone();
            match tokio::task::spawn_blocking(move || source.load()).await {
                Ok(Ok(registry)) => {
                    info!("registry reloaded, {} missions", registry.missions.len());
                    self.registry.store(registry);
                    Reloaded::Registry
                }
                Ok(Err(err)) => {
                    error!("registry reload failed, keeping previous: {}", err);
                    Reloaded::Nothing
                }
                Err(err) => {
                    error!("registry reload task failed: {}", err);
                    Reloaded::Nothing
                }
            }
        } else if config_topic(&self.users_file).as_ref() == Some(&topic) {
            let path = self.users_file.clone();
            match tokio::task::spawn_blocking(move || UserTable::load(&path)).await {
                Ok(Ok(users)) => {
                    info!("user table reloaded, {} users", users.len());
                    self.users.store(users);
                    Reloaded::Users
                }
                Ok(Err(err)) => {
                    error!("user table reload failed, keeping previous: {}", err);
                    Reloaded::Nothing
                }
                Err(err) => {
                    error!("user table reload task failed: {}", err);
                    Reloaded::Nothing
                }
            }
        } else {
            Reloaded::Nothing
        }
    }
}
