use crate::config::ServerConfig;
use crate::domain::config_synchronizer::ConfigSynchronizer;
use crate::domain::control_commander::ControlCommander;
use crate::domain::control_querier::ControlQuerier;
use crate::domain::event_commander::EventCommander;
use crate::domain::mission_querier::MissionQuerier;
use crate::domain::mission_registry::RegistryError;
use crate::domain::notifier::Notifier;
use crate::domain::stream_querier::StreamQuerier;
use crate::domain::token_commander::TokenCommander;
use crate::domain::user_model::UserTable;
use crate::domain::user_model::UserTableError;
use crate::http::vis_route;
use crate::providers::emitter::IpcPublisherImpl;
use crate::providers::emitter::IpcPusherImpl;
use crate::providers::ipc::IpcError;
use crate::providers::listener::IpcCollectorImpl;
use crate::providers::snapshot::Snapshot;
use crate::providers::state::SqliteStateImpl;
use crate::providers::token::JwtTokenImpl;
use crate::providers::token::TokenImplError;
use axum::Router;
use log::info;
use log::warn;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    RegistryError(#[from] RegistryError),
    #[error(transparent)]
    UserTableError(#[from] UserTableError),
    #[error(transparent)]
    TokenImplError(#[from] TokenImplError),
    #[error(transparent)]
    IpcError(#[from] IpcError),
}

/// One HTTP worker: its router plus the synchronizer keeping its tables
/// current. The caller decides where both run.
pub struct Worker {
    pub router: Router,
    pub synchronizer: ConfigSynchronizer,
}

impl Worker {
    pub fn new(config: &ServerConfig) -> Result<Self, StartupError> {
        let source = config.registry_source();
        let registry = Arc::new(Snapshot::new(source.load()?));
        let users = Arc::new(Snapshot::new(UserTable::load(&config.users_file)?));

        let token_impl = Arc::new(JwtTokenImpl::new(&config.secret)?);
        let state_impl = Arc::new(SqliteStateImpl::new());
        let pusher_impl = Arc::new(IpcPusherImpl::new(&config.notify_ipc));

        let mut token_commander = TokenCommander::new(token_impl, users.clone());
        if config.single_mission.is_some() {
            warn!("single mission mode, every request runs as {}", config.user);
            token_commander = token_commander.with_single_user(&config.user);
        }

        let mission_querier = Arc::new(MissionQuerier::new(
            registry.clone(),
            state_impl.clone(),
            config.no_chat,
        ));
        let control_querier = Arc::new(ControlQuerier::new());
        let control_commander = Arc::new(ControlCommander::new(config.no_save));
        let event_commander = Arc::new(EventCommander::new(pusher_impl));
        let stream_querier = Arc::new(StreamQuerier::new(
            &config.watch_ipc,
            registry.clone(),
            state_impl,
            config.no_chat,
        ));

        let synchronizer = ConfigSynchronizer::new(
            &config.watch_ipc,
            source,
            &config.users_file,
            registry.clone(),
            users,
        );

        let router = vis_route(
            registry,
            Arc::new(token_commander),
            mission_querier,
            control_querier,
            control_commander,
            event_commander,
            stream_querier,
        );

        info!("worker ready in {} mode", config.mode);

        Ok(Self {
            router,
            synchronizer,
        })
    }
}

/// Binds both bus sockets and loads the registry the first watch set is
/// built from. Must be called inside the runtime.
pub fn notifier(config: &ServerConfig) -> Result<Notifier, StartupError> {
    let source = config.registry_source();
    let registry = source.load()?;

    let collector = IpcCollectorImpl::bind(&config.notify_ipc)?;
    let publisher = IpcPublisherImpl::bind(&config.watch_ipc)?;

    Ok(Notifier::new(
        collector,
        publisher,
        source,
        config.users_file.clone(),
        &registry,
        config.poll,
    ))
}
