use crate::domain::mission_model::MissionRecord;
use log::debug;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Control files a pilot may read back or save.
pub const CONTROL_FILES: [&str; 7] = [
    "cmdfile",
    "targets",
    "science",
    "scicon.sch",
    "tcm2mat.cal",
    "pdoscmds.bat",
    "sg_calib_constants.m",
];

const DIRECTIVES: [&str; 4] = ["GO", "QUIT", "RESUME", "EXIT_TO_MENU"];

#[derive(Debug, Error)]
pub enum ControlQuerierError {
    #[error("oops")]
    UnknownControlFile,
    #[error("none")]
    NoControlFile,
    #[error(transparent)]
    ReadError(#[from] std::io::Error),
}

// HTTP output types
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControlFile {
    pub file: String,
    pub dive: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<i64>,
    pub contents: String,
}

/// `(dive, call)` encoded in an archived copy name: `which.N.M` or `which.N`
/// (the latter sorts below any call of the same dive).
fn archived_version(which: &str, name: &str) -> Option<(i64, i64)> {
    let rest = name.strip_prefix(which)?.strip_prefix('.')?;
    let mut parts = rest.split('.');
    let dive = parts.next()?.parse::<i64>().ok()?;
    let call = match parts.next() {
        None => -1,
        Some(call) => call.parse::<i64>().ok()?,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((dive, call))
}

/// The last `$GO`, `$QUIT`, `$RESUME` or `$EXIT_TO_MENU` line, without the
/// leading marker and arguments.
pub fn directive_of(text: &str) -> String {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let word = line.get(1..)?.split(',').next()?;
            DIRECTIVES.contains(&word).then(|| word.to_string())
        })
        .last()
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn cmdfile_directive(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => directive_of(&text),
        Err(err) => {
            debug!("cannot read {}: {}", path.display(), err);
            "unknown".to_string()
        }
    }
}

#[derive(Clone, Default)]
pub struct ControlQuerier;

impl ControlQuerier {
    pub fn new() -> Self {
        Self
    }
}

impl ControlQuerier {
    /// The live control file if present, else the archived copy with the
    /// highest dive and call.
    pub async fn latest_control_file(
        &self,
        mission: &MissionRecord,
        which: &str,
    ) -> Result<ControlFile, ControlQuerierError> {
        if !CONTROL_FILES.contains(&which) {
            return Err(ControlQuerierError::UnknownControlFile);
        }

        let live = mission.dir.join(which);
        if tokio::fs::try_exists(&live).await.unwrap_or(false) {
            let contents = tokio::fs::read_to_string(&live).await?;
            return Ok(ControlFile {
                file: which.to_string(),
                dive: -1,
                call: None,
                contents,
            });
        }

        let mut entries = match tokio::fs::read_dir(&mission.dir).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!("cannot list {}: {}", mission.dir.display(), err);
                return Err(ControlQuerierError::NoControlFile);
            }
        };

        let mut latest: Option<(i64, i64)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(version) = archived_version(which, &name.to_string_lossy()) else {
                continue;
            };
            if latest.map(|l| version > l).unwrap_or(true) {
                latest = Some(version);
            }
        }

        let Some((dive, call)) = latest else {
            return Err(ControlQuerierError::NoControlFile);
        };

        let name = if call > -1 {
            format!("{}.{}.{}", which, dive, call)
        } else {
            format!("{}.{}", which, dive)
        };
        let contents = tokio::fs::read_to_string(mission.dir.join(name)).await?;

        Ok(ControlFile {
            file: which.to_string(),
            dive,
            call: Some(call),
            contents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mission(dir: &Path) -> MissionRecord {
        MissionRecord {
            glider: 237,
            path: None,
            mission: None,
            default: true,
            dir: dir.to_path_buf(),
            users: None,
            groups: None,
            pilotusers: None,
            pilotgroups: None,
            endpoints: BTreeMap::new(),
            info: BTreeMap::new(),
        }
    }

    #[test]
    fn directive_is_the_last_matching_line() {
        let text = "$D_TGT,990\n$GO\n$T_DIVE,60\n$QUIT,now\n$COMMENT\n";
        assert_eq!(directive_of(text), "QUIT");
        assert_eq!(directive_of("  $RESUME  \n"), "RESUME");
        assert_eq!(directive_of("$D_TGT,990\n"), "unknown");
        assert_eq!(directive_of(""), "unknown");
    }

    #[test]
    fn archived_names() {
        assert_eq!(archived_version("targets", "targets.12.3"), Some((12, 3)));
        assert_eq!(archived_version("targets", "targets.12"), Some((12, -1)));
        assert_eq!(archived_version("targets", "targets.x"), None);
        assert_eq!(archived_version("targets", "targetsx.12"), None);
        assert_eq!(archived_version("targets", "targets.1.2.3"), None);
        assert!(archived_version("targets", "targets.12.0") > archived_version("targets", "targets.12"));
    }

    #[tokio::test]
    async fn live_file_wins_over_archives() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("targets"), "live").unwrap();
        std::fs::write(dir.path().join("targets.40.1"), "old").unwrap();

        let found = ControlQuerier::new()
            .latest_control_file(&mission(dir.path()), "targets")
            .await
            .unwrap();

        assert_eq!(found.contents, "live");
        assert_eq!(found.dive, -1);
        assert_eq!(found.call, None);
    }

    #[tokio::test]
    async fn newest_archive_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("science.9.2"), "a").unwrap();
        std::fs::write(dir.path().join("science.10"), "b").unwrap();
        std::fs::write(dir.path().join("science.10.1"), "c").unwrap();

        let found = ControlQuerier::new()
            .latest_control_file(&mission(dir.path()), "science")
            .await
            .unwrap();

        assert_eq!(found.contents, "c");
        assert_eq!((found.dive, found.call), (10, Some(1)));
    }

    #[tokio::test]
    async fn unknown_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let querier = ControlQuerier::new();

        assert!(matches!(
            querier.latest_control_file(&mission(dir.path()), "passwd").await,
            Err(ControlQuerierError::UnknownControlFile)
        ));
        assert!(matches!(
            querier.latest_control_file(&mission(dir.path()), "cmdfile").await,
            Err(ControlQuerierError::NoControlFile)
        ));
    }
}
