use crate::domain::permission_model::Route;
use crate::domain::permission_model::RunMode;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Descriptive fields that may be inherited from the `organization` section.
pub const ORGANIZATION_FIELDS: [&str; 4] = ["orgname", "orglink", "contact", "email"];

/// Descriptive fields safe to show to anyone allowed to see the mission.
pub const PUBLIC_FIELDS: [&str; 11] = [
    "started", "ended", "planned", "orgname", "orglink", "contact", "email", "project", "link",
    "comment", "reason",
];

// YAML types
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistryDocument {
    pub organization: OrganizationEntry,
    pub missions: BTreeMap<String, Option<MissionEntry>>,
    pub endpoints: BTreeMap<String, Option<EndpointRecord>>,
    pub controls: BTreeMap<String, ControlEntry>,
    pub includes: Option<BTreeMap<String, IncludeEntry>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrganizationEntry {
    pub orgname: Option<String>,
    pub orglink: Option<String>,
    pub text: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
}

impl OrganizationEntry {
    pub fn field(&self, name: &str) -> Option<&String> {
        match name {
            "orgname" => self.orgname.as_ref(),
            "orglink" => self.orglink.as_ref(),
            "contact" => self.contact.as_ref(),
            "email" => self.email.as_ref(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MissionEntry {
    pub users: Option<Vec<String>>,
    pub groups: Option<Vec<String>>,
    pub pilotusers: Option<Vec<String>>,
    pub pilotgroups: Option<Vec<String>>,
    pub endpoints: Option<BTreeMap<String, EndpointRecord>>,
    pub default: Option<bool>,
    pub mission: Option<String>,
    pub abs: Option<String>,
    #[serde(flatten)]
    pub info: BTreeMap<String, Value>,
}

impl MissionEntry {
    /// Fills every inheritable field this entry leaves unset from `fallback`.
    /// `mission`, `abs` and `default` always belong to the concrete entry.
    pub fn layered_over(mut self, fallback: &MissionEntry) -> Self {
        self.users = self.users.or_else(|| fallback.users.clone());
        self.groups = self.groups.or_else(|| fallback.groups.clone());
        self.pilotusers = self.pilotusers.or_else(|| fallback.pilotusers.clone());
        self.pilotgroups = self.pilotgroups.or_else(|| fallback.pilotgroups.clone());
        self.endpoints = self.endpoints.or_else(|| fallback.endpoints.clone());
        for (key, value) in &fallback.info {
            self.info.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointRecord {
    pub modes: Option<Vec<RunMode>>,
    pub users: Option<Vec<String>>,
    pub groups: Option<Vec<String>>,
    pub requirepilot: Option<bool>,
}

impl EndpointRecord {
    pub fn layered_over(self, fallback: &EndpointRecord) -> Self {
        Self {
            modes: self.modes.or_else(|| fallback.modes.clone()),
            users: self.users.or_else(|| fallback.users.clone()),
            groups: self.groups.or_else(|| fallback.groups.clone()),
            requirepilot: self.requirepilot.or(fallback.requirepilot),
        }
    }

    pub fn is_gated(&self) -> bool {
        self.users.is_some() || self.groups.is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ControlEntry {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IncludeEntry {
    pub missions: PathBuf,
    pub root: PathBuf,
}

// Pure types for domain use
#[derive(Clone, Debug, PartialEq)]
pub struct MissionRecord {
    pub glider: u32,
    pub path: Option<String>,
    pub mission: Option<String>,
    pub default: bool,
    pub dir: PathBuf,
    pub users: Option<Vec<String>>,
    pub groups: Option<Vec<String>>,
    pub pilotusers: Option<Vec<String>>,
    pub pilotgroups: Option<Vec<String>>,
    pub endpoints: BTreeMap<String, EndpointRecord>,
    pub info: BTreeMap<String, Value>,
}

impl MissionRecord {
    pub fn has_acl(&self) -> bool {
        self.users.is_some()
            || self.groups.is_some()
            || self.pilotusers.is_some()
            || self.pilotgroups.is_some()
    }

    pub fn has_pilot_acl(&self) -> bool {
        self.pilotusers.is_some() || self.pilotgroups.is_some()
    }

    pub fn endpoint(&self, route: Route) -> Option<&EndpointRecord> {
        self.endpoints.get(route.as_str())
    }

    pub fn key(&self) -> String {
        match &self.path {
            Some(path) => format!("sg{:03}/{}", self.glider, path),
            None => format!("sg{:03}", self.glider),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PatternSet {
    pub allow: Vec<Regex>,
    pub deny: Vec<Regex>,
}

#[derive(Clone, Debug, Default)]
pub struct ControlRules {
    pub global: PatternSet,
    pub files: BTreeMap<String, PatternSet>,
}

/// Immutable view of the whole registry. A reload builds a new one.
#[derive(Clone, Debug)]
pub struct Registry {
    pub mode: RunMode,
    pub missions: Vec<MissionRecord>,
    pub endpoints: BTreeMap<String, EndpointRecord>,
    pub controls: ControlRules,
    pub organization: OrganizationEntry,
}

impl Registry {
    pub fn empty(mode: RunMode) -> Self {
        Self {
            mode,
            missions: vec![],
            endpoints: BTreeMap::new(),
            controls: ControlRules::default(),
            organization: OrganizationEntry::default(),
        }
    }

    pub fn endpoint(&self, route: Route) -> Option<&EndpointRecord> {
        self.endpoints.get(route.as_str())
    }

    /// Without a selector the instrument's default record is returned; with
    /// one, the record whose mission name (or sub-path) equals it.
    pub fn find_mission(&self, glider: u32, selector: Option<&str>) -> Option<&MissionRecord> {
        let mut candidates = self.missions.iter().filter(|m| m.glider == glider);
        match selector {
            None => candidates.find(|m| m.default),
            Some(name) => candidates.find(|m| {
                m.mission.as_deref() == Some(name) || m.path.as_deref() == Some(name)
            }),
        }
    }
}

/// `?mission=` query value. Empty and `current` mean the default mission.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MissionSelector {
    pub mission: Option<String>,
}

impl MissionSelector {
    pub fn named(name: &str) -> Self {
        Self {
            mission: Some(name.to_string()),
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self.mission.as_deref() {
            None | Some("") | Some("current") => None,
            Some(name) => Some(name),
        }
    }
}

// HTTP output types
#[derive(Clone, Debug, Serialize)]
pub struct MissionSummary {
    pub glider: u32,
    pub mission: String,
    pub path: String,
    #[serde(flatten)]
    pub info: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MissionList {
    pub missions: Vec<MissionSummary>,
    pub organization: OrganizationEntry,
}

// Transformation between types
impl From<&MissionRecord> for MissionSummary {
    fn from(record: &MissionRecord) -> Self {
        Self {
            glider: record.glider,
            mission: record.mission.clone().unwrap_or_default(),
            path: record.path.clone().unwrap_or_default(),
            info: record
                .info
                .iter()
                .filter(|(key, _)| PUBLIC_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}
