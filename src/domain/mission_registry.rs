use crate::domain::mission_model::ControlEntry;
use crate::domain::mission_model::ControlRules;
use crate::domain::mission_model::EndpointRecord;
use crate::domain::mission_model::MissionEntry;
use crate::domain::mission_model::MissionRecord;
use crate::domain::mission_model::OrganizationEntry;
use crate::domain::mission_model::PatternSet;
use crate::domain::mission_model::Registry;
use crate::domain::mission_model::RegistryDocument;
use crate::domain::mission_model::ORGANIZATION_FIELDS;
use crate::domain::permission_model::RunMode;
use crate::domain::permission_model::PROTECTABLE_ROUTES;
use log::info;
use log::warn;
use regex::Regex;
use regex::RegexBuilder;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read missions file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed missions document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("cannot compile control pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("includes nested too deep at {0}")]
    IncludeDepth(String),
    #[error("single mission must look like sgNNN:/abs/path, got {0:?}")]
    SingleMission(String),
}

/// Everything needed to (re)build the registry: either a missions file or
/// the single-mission carve-out.
#[derive(Clone, Debug)]
pub struct RegistrySource {
    pub missions_file: PathBuf,
    pub root: PathBuf,
    pub mode: RunMode,
    pub single_mission: Option<String>,
}

impl RegistrySource {
    pub fn load(&self) -> Result<Registry, RegistryError> {
        match &self.single_mission {
            Some(spec) => single_mission_registry(spec, self.mode),
            None => load_registry(&self.missions_file, self.mode, &self.root),
        }
    }
}

/// Reads and normalizes a missions file. A missing file yields an empty
/// registry, so a fresh install serves nothing rather than failing to start.
pub fn load_registry(path: &Path, mode: RunMode, root: &Path) -> Result<Registry, RegistryError> {
    load_at_depth(path, mode, root, 0)
}

pub fn parse_registry(
    text: &str,
    mode: RunMode,
    root: &Path,
    base_dir: &Path,
) -> Result<Registry, RegistryError> {
    parse_at_depth(text, mode, root, base_dir, 0)
}

/// Registry for the single-operator carve-out: exactly one open mission
/// whose data lives at an absolute path.
pub fn single_mission_registry(spec: &str, mode: RunMode) -> Result<Registry, RegistryError> {
    let invalid = || RegistryError::SingleMission(spec.to_string());

    let (key, dir) = spec.split_once(':').ok_or_else(invalid)?;
    let (glider, path) = parse_mission_key(key).ok_or_else(invalid)?;
    if dir.is_empty() {
        return Err(invalid());
    }

    let mut registry = Registry::empty(mode);
    registry.missions.push(MissionRecord {
        glider,
        mission: path.clone(),
        path,
        default: true,
        dir: PathBuf::from(dir),
        users: None,
        groups: None,
        pilotusers: None,
        pilotgroups: None,
        endpoints: BTreeMap::new(),
        info: BTreeMap::new(),
    });

    info!("single mission registry for {}", key);
    Ok(registry)
}

fn load_at_depth(
    path: &Path,
    mode: RunMode,
    root: &Path,
    depth: usize,
) -> Result<Registry, RegistryError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("no missions file at {}", path.display());
            String::new()
        }
        Err(err) => {
            return Err(RegistryError::Read {
                path: path.display().to_string(),
                source: err,
            })
        }
    };

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_at_depth(&text, mode, root, base_dir, depth)
}

fn parse_at_depth(
    text: &str,
    mode: RunMode,
    root: &Path,
    base_dir: &Path,
    depth: usize,
) -> Result<Registry, RegistryError> {
    let doc: RegistryDocument = if text.trim().is_empty() {
        RegistryDocument::default()
    } else {
        serde_yaml::from_str(text)?
    };

    let missions = match &doc.includes {
        Some(includes) => {
            if depth >= MAX_INCLUDE_DEPTH {
                return Err(RegistryError::IncludeDepth(base_dir.display().to_string()));
            }

            let mut merged = vec![];
            for (name, include) in includes {
                let child_path = base_dir.join(&include.missions);
                let child_root = base_dir.join(&include.root);
                let child = load_at_depth(&child_path, mode, &child_root, depth + 1)?;
                info!(
                    "included {} missions from {} ({})",
                    child.missions.len(),
                    child_path.display(),
                    name
                );
                merged.extend(child.missions);
            }
            merged
        }
        None => resolve_missions(doc.missions, mode, root, &doc.organization),
    };

    let registry = Registry {
        mode,
        missions,
        endpoints: resolve_endpoints(doc.endpoints),
        controls: compile_controls(&doc.controls)?,
        organization: doc.organization,
    };

    if depth == 0 {
        warn_public_exposure(&registry);
    }

    Ok(registry)
}

/// `sgNNN` or `sgNNN/subpath`.
pub fn parse_mission_key(key: &str) -> Option<(u32, Option<String>)> {
    let (head, path) = match key.split_once('/') {
        Some((head, path)) if !path.is_empty() => (head, Some(path.to_string())),
        Some(_) => return None,
        None => (key, None),
    };

    let digits = head.get(2..)?;
    if !head[..2].eq_ignore_ascii_case("sg") || digits.is_empty() {
        return None;
    }

    let glider = digits.parse::<u32>().ok()?;
    Some((glider, path))
}

/// Applies the three default tiers to every concrete mission entry:
/// explicit value, then `<mode>defaults`, then `defaults`, then the
/// organization section for the organization fields.
pub fn resolve_missions(
    mut entries: BTreeMap<String, Option<MissionEntry>>,
    mode: RunMode,
    root: &Path,
    organization: &OrganizationEntry,
) -> Vec<MissionRecord> {
    let defaults = entries.remove("defaults").flatten().unwrap_or_default();
    let mode_defaults = entries
        .remove(&mode.defaults_key())
        .flatten()
        .unwrap_or_default();
    entries.retain(|key, _| !key.ends_with("defaults"));

    let mut organization_fallback = MissionEntry::default();
    for field in ORGANIZATION_FIELDS {
        if let Some(value) = organization.field(field) {
            organization_fallback
                .info
                .insert(field.to_string(), Value::String(value.clone()));
        }
    }

    let mut records = vec![];
    for (key, entry) in entries {
        let Some((glider, path)) = parse_mission_key(&key) else {
            info!("skipping mission entry with unparseable key {:?}", key);
            continue;
        };

        let entry = entry
            .unwrap_or_default()
            .layered_over(&mode_defaults)
            .layered_over(&defaults)
            .layered_over(&organization_fallback);

        let dir = match &entry.abs {
            Some(abs) => root.join(abs),
            None => {
                let mut dir = root.join(format!("sg{:03}", glider));
                if let Some(path) = &path {
                    dir.push(path);
                }
                dir
            }
        };

        records.push(MissionRecord {
            glider,
            mission: entry.mission.or_else(|| path.clone()),
            path,
            default: entry.default.unwrap_or(false),
            dir,
            users: entry.users,
            groups: entry.groups,
            pilotusers: entry.pilotusers,
            pilotgroups: entry.pilotgroups,
            endpoints: entry.endpoints.unwrap_or_default(),
            info: entry.info,
        });
    }

    pick_defaults(&mut records);
    records
}

/// Leaves exactly one default record per instrument: the first explicitly
/// marked one, else the one without a sub-path, else the first listed.
fn pick_defaults(records: &mut [MissionRecord]) {
    let gliders: Vec<u32> = {
        let mut seen = HashSet::new();
        records
            .iter()
            .map(|r| r.glider)
            .filter(|g| seen.insert(*g))
            .collect()
    };

    for glider in gliders {
        let indices: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.glider == glider)
            .map(|(i, _)| i)
            .collect();

        let chosen = indices
            .iter()
            .copied()
            .find(|&i| records[i].default)
            .or_else(|| indices.iter().copied().find(|&i| records[i].path.is_none()))
            .or_else(|| indices.first().copied());

        for i in indices {
            records[i].default = Some(i) == chosen;
        }
    }
}

/// Explicit endpoint records inherit missing fields from `defaults`; when a
/// `defaults` record exists every route in the vocabulary gets one.
pub fn resolve_endpoints(
    mut entries: BTreeMap<String, Option<EndpointRecord>>,
) -> BTreeMap<String, EndpointRecord> {
    let defaults = entries.remove("defaults").flatten();

    let mut endpoints: BTreeMap<String, EndpointRecord> = entries
        .into_iter()
        .map(|(route, record)| {
            let record = record.unwrap_or_default();
            let record = match &defaults {
                Some(defaults) => record.layered_over(defaults),
                None => record,
            };
            (route, record)
        })
        .collect();

    if let Some(defaults) = defaults {
        for route in PROTECTABLE_ROUTES {
            endpoints
                .entry(route.as_str().to_string())
                .or_insert_with(|| defaults.clone());
        }
    }

    endpoints
}

pub fn compile_controls(
    entries: &BTreeMap<String, ControlEntry>,
) -> Result<ControlRules, RegistryError> {
    let mut rules = ControlRules::default();

    for (name, entry) in entries {
        let set = PatternSet {
            allow: compile_patterns(&entry.allow)?,
            deny: compile_patterns(&entry.deny)?,
        };

        if name == "global" {
            rules.global = set;
        } else {
            rules.files.insert(name.clone(), set);
        }
    }

    Ok(rules)
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, RegistryError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| RegistryError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// Missions with no access lists are open to anyone; in public mode that
/// means the internet, which is worth shouting about at load time.
fn warn_public_exposure(registry: &Registry) {
    if registry.mode != RunMode::Public {
        return;
    }

    for mission in registry.missions.iter().filter(|m| !m.has_acl()) {
        warn!(
            "{} declares no users, groups, pilotusers or pilotgroups and is visible to anyone",
            mission.key()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permission_model::Route;

    const MISSIONS: &str = r#"
organization:
  orgname: Ocean Lab
  contact: ops@example.org
missions:
  defaults:
    users: [viewer]
    project: default-project
  pilotdefaults:
    pilotusers: [alice]
  publicdefaults:
    users: [nobody]
  sg237:
    project: deployment
  sg012/spring:
    mission: Spring Survey
  sg012/fall:
    abs: /data/fall
    orgname: Other Lab
  nonsense:
    users: [x]
endpoints:
  defaults:
    modes: [pilot, private]
  save:
    requirepilot: true
  plot:
    modes: [public, pilot, private]
controls:
  global:
    deny: ['\$D_GRID']
  cmdfile:
    deny: ['^\$GO']
    allow: ['^\$GO$']
"#;

    fn registry(mode: RunMode) -> Registry {
        parse_registry(MISSIONS, mode, Path::new("/home/seaglider"), Path::new("/etc")).unwrap()
    }

    #[test]
    fn explicit_then_mode_then_global_defaults() {
        let registry = registry(RunMode::Pilot);
        let sg237 = registry.find_mission(237, None).unwrap();

        assert_eq!(sg237.users, Some(vec!["viewer".to_string()]));
        assert_eq!(sg237.pilotusers, Some(vec!["alice".to_string()]));
        assert_eq!(sg237.info["project"], "deployment");
        assert_eq!(sg237.info["orgname"], "Ocean Lab");
        assert_eq!(sg237.dir, PathBuf::from("/home/seaglider/sg237"));

        let public = self::registry(RunMode::Public);
        assert_eq!(
            public.find_mission(237, None).unwrap().users,
            Some(vec!["nobody".to_string()])
        );
        assert_eq!(public.find_mission(237, None).unwrap().pilotusers, None);
    }

    #[test]
    fn sub_missions_need_a_selector_unless_they_are_the_only_one() {
        let registry = registry(RunMode::Private);

        let fall = registry.find_mission(12, Some("fall")).unwrap();
        assert_eq!(fall.dir, PathBuf::from("/data/fall"));
        assert_eq!(fall.info["orgname"], "Other Lab");
        assert_eq!(fall.mission.as_deref(), Some("fall"));

        let spring = registry.find_mission(12, Some("Spring Survey")).unwrap();
        assert_eq!(spring.dir, PathBuf::from("/home/seaglider/sg012/spring"));

        // no path-less entry for 12, so the first listed one is the default
        assert_eq!(registry.find_mission(12, None).unwrap().path.as_deref(), Some("fall"));
        assert!(registry.find_mission(12, Some("winter")).is_none());
        assert!(registry.find_mission(99, None).is_none());
    }

    #[test]
    fn unparseable_keys_are_skipped() {
        let registry = registry(RunMode::Private);
        assert_eq!(registry.missions.len(), 3);
    }

    #[test]
    fn endpoint_defaults_cover_the_whole_vocabulary() {
        let registry = registry(RunMode::Private);

        let save = registry.endpoint(Route::Save).unwrap();
        assert_eq!(save.requirepilot, Some(true));
        assert_eq!(save.modes, Some(vec![RunMode::Pilot, RunMode::Private]));

        assert_eq!(
            registry.endpoint(Route::Plot).unwrap().modes.as_ref().unwrap().len(),
            3
        );
        assert!(registry.endpoint(Route::Chat).is_some());
        assert!(registry.endpoint(Route::User).is_none());
    }

    #[test]
    fn explicit_default_wins_over_pathless_entry() {
        let text = r#"
missions:
  sg100: {}
  sg100/b:
    default: true
"#;
        let registry = parse_registry(text, RunMode::Private, Path::new("/r"), Path::new("/r")).unwrap();
        assert_eq!(registry.find_mission(100, None).unwrap().path.as_deref(), Some("b"));
        assert_eq!(registry.missions.iter().filter(|m| m.default).count(), 1);
    }

    #[test]
    fn control_patterns_compile_case_insensitively() {
        let registry = registry(RunMode::Private);
        assert!(registry.controls.global.deny[0].is_match("$d_grid,1"));
        assert_eq!(registry.controls.files["cmdfile"].allow.len(), 1);
    }

    #[test]
    fn bad_control_pattern_is_fatal() {
        let text = "controls:\n  global:\n    deny: ['(unclosed']\n";
        assert!(matches!(
            parse_registry(text, RunMode::Private, Path::new("/r"), Path::new("/r")),
            Err(RegistryError::Pattern { .. })
        ));
    }

    #[test]
    fn includes_concatenate_children_under_their_roots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("east.yml"),
            "missions:\n  sg001:\n    pilotusers: [alice]\n  sg002/x: {}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("west.yml"),
            "missions:\n  sg003:\n    abs: elsewhere\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("missions.yml"),
            r#"
organization:
  orgname: Federated
includes:
  east:
    missions: east.yml
    root: /data/east
  west:
    missions: west.yml
    root: /data/west
endpoints:
  save:
    modes: [private]
"#,
        )
        .unwrap();

        let registry = load_registry(
            &dir.path().join("missions.yml"),
            RunMode::Private,
            Path::new("/unused"),
        )
        .unwrap();

        assert_eq!(registry.missions.len(), 3);
        assert_eq!(
            registry.find_mission(1, None).unwrap().dir,
            PathBuf::from("/data/east/sg001")
        );
        assert_eq!(
            registry.find_mission(2, Some("x")).unwrap().dir,
            PathBuf::from("/data/east/sg002/x")
        );
        assert_eq!(
            registry.find_mission(3, None).unwrap().dir,
            PathBuf::from("/data/west/elsewhere")
        );
        assert_eq!(registry.organization.orgname.as_deref(), Some("Federated"));
        assert!(registry.endpoint(Route::Save).is_some());
    }

    #[test]
    fn self_including_registry_stops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("missions.yml"),
            "includes:\n  me:\n    missions: missions.yml\n    root: /r\n",
        )
        .unwrap();

        assert!(matches!(
            load_registry(&dir.path().join("missions.yml"), RunMode::Private, Path::new("/r")),
            Err(RegistryError::IncludeDepth(_))
        ));
    }

    #[test]
    fn missing_file_is_an_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            load_registry(&dir.path().join("missions.yml"), RunMode::Private, dir.path()).unwrap();
        assert!(registry.missions.is_empty());
    }

    #[test]
    fn single_mission_spec() {
        let registry = single_mission_registry("sg237:/srv/sg237", RunMode::Private).unwrap();
        let m = registry.find_mission(237, None).unwrap();
        assert_eq!(m.dir, PathBuf::from("/srv/sg237"));
        assert!(!m.has_acl());

        assert!(single_mission_registry("237", RunMode::Private).is_err());
        assert!(single_mission_registry("sgx:/a", RunMode::Private).is_err());
    }

    #[test]
    fn mission_keys() {
        assert_eq!(parse_mission_key("sg012"), Some((12, None)));
        assert_eq!(parse_mission_key("SG5/a"), Some((5, Some("a".to_string()))));
        assert_eq!(parse_mission_key("sg"), None);
        assert_eq!(parse_mission_key("sg12/"), None);
        assert_eq!(parse_mission_key("defaults"), None);
    }
}
