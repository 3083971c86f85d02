use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Outcome of permission resolution, ordered so that comparisons read the
/// way the rules are written (`level > Reject`, `level >= Pilot`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// No mission matches, or the route does not exist in this run mode.
    Invalid,
    /// The mission exists but the caller is not allowed.
    Reject,
    View,
    Pilot,
}

impl PermissionLevel {
    pub fn is_granted(self) -> bool {
        self > PermissionLevel::Reject
    }
}

/// Process-wide trust posture, fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Public,
    Pilot,
    Private,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Public => "public",
            RunMode::Pilot => "pilot",
            RunMode::Private => "private",
        }
    }

    /// Name of the mission-list key holding defaults for this mode only.
    pub fn defaults_key(self) -> String {
        format!("{}defaults", self.as_str())
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
#[error("unknown run mode {0:?}")]
pub struct UnknownRunMode(pub String);

impl FromStr for RunMode {
    type Err = UnknownRunMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(RunMode::Public),
            "pilot" => Ok(RunMode::Pilot),
            "private" => Ok(RunMode::Private),
            _ => Err(UnknownRunMode(s.to_string())),
        }
    }
}

macro_rules! routes {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Protectable route names. Endpoint records in the registry are keyed
        /// by these names.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Route {
            $($variant,)+
            User,
            Pos,
        }

        pub const PROTECTABLE_ROUTES: &[Route] = &[$(Route::$variant,)+];

        impl Route {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Route::$variant => $name,)+
                    Route::User => "user",
                    Route::Pos => "pos",
                }
            }
        }
    };
}

routes! {
    Plot => "plot",
    Map => "map",
    Kml => "kml",
    Data => "data",
    Proxy => "proxy",
    Plots => "plots",
    Log => "log",
    File => "file",
    Alerts => "alerts",
    Deltas => "deltas",
    Changes => "changes",
    Summary => "summary",
    Status => "status",
    Control => "control",
    Db => "db",
    DbVars => "dbvars",
    Pro => "pro",
    ProVars => "provars",
    Time => "time",
    TimeVars => "timevars",
    Query => "query",
    SelfTest => "selftest",
    Save => "save",
    Stream => "stream",
    Watch => "watch",
    Chat => "chat",
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScope {
    /// Only the endpoint gate and the mode check apply.
    Endpoint,
    /// Endpoint gate followed by the mission check.
    Full,
}

/// What a route demands before its handler runs. Endpoint records from the
/// registry may override `modes` and `require_pilot`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub modes: Option<Vec<RunMode>>,
    pub require_pilot: bool,
    pub scope: AuthScope,
}

impl Requirement {
    pub fn mission() -> Self {
        Self {
            modes: None,
            require_pilot: false,
            scope: AuthScope::Full,
        }
    }

    pub fn endpoint_only() -> Self {
        Self {
            scope: AuthScope::Endpoint,
            ..Self::mission()
        }
    }

    pub fn in_modes(mut self, modes: &[RunMode]) -> Self {
        self.modes = Some(modes.to_vec());
        self
    }

    pub fn pilot(mut self) -> Self {
        self.require_pilot = true;
        self
    }
}
