use crate::domain::mission_registry::RegistrySource;
use crate::domain::permission_model::RunMode;
use crate::providers::random::RandomImpl;
use log::warn;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Spawns the notifier as a child process, then serves HTTP.
    Server,
    /// Serves HTTP against an already running bus.
    Worker,
    /// Runs the bus only.
    Notifier,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub role: Role,
    pub mode: RunMode,
    pub root: PathBuf,
    pub bind: SocketAddr,
    pub missions_file: PathBuf,
    pub users_file: PathBuf,
    pub secret: String,
    pub single_mission: Option<String>,
    pub user: String,
    pub notify_ipc: PathBuf,
    pub watch_ipc: PathBuf,
    pub no_save: bool,
    pub no_chat: bool,
    pub poll: Duration,
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_flag(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "0" | "false" | "no" => Ok(false),
            "1" | "true" | "yes" => Ok(true),
            _ => Err(invalid(key, &v, "expected a boolean")),
        },
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let role = match lookup("VIS_ROLE").as_deref() {
            None | Some("server") => Role::Server,
            Some("worker") => Role::Worker,
            Some("notifier") => Role::Notifier,
            Some(other) => return Err(invalid("VIS_ROLE", other, "expected server, worker or notifier")),
        };

        let mode = match lookup("VIS_MODE") {
            None => RunMode::Private,
            Some(value) => value
                .parse::<RunMode>()
                .map_err(|e| invalid("VIS_MODE", &value, e))?,
        };

        let root = PathBuf::from(lookup("VIS_ROOT").unwrap_or_else(|| "/home/seaglider".to_string()));

        let bind_value = lookup("VIS_BIND").unwrap_or_else(|| "0.0.0.0:20001".to_string());
        let bind = bind_value
            .parse::<SocketAddr>()
            .map_err(|e| invalid("VIS_BIND", &bind_value, e))?;

        let missions_file = lookup("VIS_MISSIONS_FILE")
            .map(|f| root.join(f))
            .unwrap_or_else(|| root.join("missions.yml"));
        let users_file = lookup("VIS_USERS_FILE")
            .map(|f| root.join(f))
            .unwrap_or_else(|| root.join("users.yml"));

        let secret = match lookup("VIS_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                if role == Role::Worker {
                    warn!("VIS_SECRET not set, sessions will not be shared with other workers");
                }
                RandomImpl::string(64)
            }
        };

        let single_mission = lookup("VIS_SINGLE_MISSION").filter(|s| !s.is_empty());
        let user = lookup("VIS_USER")
            .or_else(|| lookup("USER"))
            .unwrap_or_else(|| "pilot".to_string());

        let pid = std::process::id();
        let notify_ipc = lookup("VIS_NOTIFY_IPC")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/mission-vis-{}-notify.ipc", pid)));
        let watch_ipc = lookup("VIS_WATCH_IPC")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/mission-vis-{}-watch.ipc", pid)));

        let poll = match lookup("VIS_POLL_MS") {
            None => Duration::from_millis(2000),
            Some(value) => match value.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                Ok(_) => return Err(invalid("VIS_POLL_MS", &value, "must be positive")),
                Err(e) => return Err(invalid("VIS_POLL_MS", &value, e)),
            },
        };

        Ok(Self {
            role,
            mode,
            root,
            bind,
            missions_file,
            users_file,
            secret,
            single_mission,
            user,
            notify_ipc,
            watch_ipc,
            no_save: parse_flag("VIS_NO_SAVE", lookup("VIS_NO_SAVE"))?,
            no_chat: parse_flag("VIS_NO_CHAT", lookup("VIS_NO_CHAT"))?,
            poll,
        })
    }
}

impl ServerConfig {
    pub fn registry_source(&self) -> RegistrySource {
        RegistrySource {
            missions_file: self.missions_file.clone(),
            root: self.root.clone(),
            mode: self.mode,
            single_mission: self.single_mission.clone(),
        }
    }

    /// Environment handed to child processes so they join this instance's
    /// bus and verify this instance's tokens.
    pub fn child_env(&self, role: &str) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("VIS_ROLE", role.to_string()),
            ("VIS_MODE", self.mode.to_string()),
            ("VIS_ROOT", self.root.display().to_string()),
            ("VIS_BIND", self.bind.to_string()),
            ("VIS_MISSIONS_FILE", self.missions_file.display().to_string()),
            ("VIS_USERS_FILE", self.users_file.display().to_string()),
            ("VIS_SECRET", self.secret.clone()),
            ("VIS_USER", self.user.clone()),
            ("VIS_NOTIFY_IPC", self.notify_ipc.display().to_string()),
            ("VIS_WATCH_IPC", self.watch_ipc.display().to_string()),
            ("VIS_POLL_MS", self.poll.as_millis().to_string()),
        ];
        if let Some(single) = &self.single_mission {
            env.push(("VIS_SINGLE_MISSION", single.clone()));
        }
        if self.no_save {
            env.push(("VIS_NO_SAVE", "1".to_string()));
        }
        if self.no_chat {
            env.push(("VIS_NO_CHAT", "1".to_string()));
        }
        env
    }
}
