use crate::domain::mission_model::ControlRules;
use crate::domain::mission_model::PatternSet;
use log::info;

/// Commands never accepted in a saved control file, whatever the rules say.
pub const FORBIDDEN_KEYWORDS: [&str; 5] = ["shutdown", "scuttle", "wipe", "reboot", "pdos"];

/// A deny hit not lifted by an allow at the same level.
fn unresolved_deny<'a>(set: &'a PatternSet, line: &str) -> Option<&'a str> {
    let deny = set.deny.iter().find(|d| d.is_match(line))?;
    if set.allow.iter().any(|a| a.is_match(line)) {
        return None;
    }
    Some(deny.as_str())
}

/// Returns true when `text` must not be saved as `filename`.
pub fn is_forbidden(filename: &str, text: &str, rules: &ControlRules) -> bool {
    let lowered = text.to_lowercase();
    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|k| lowered.contains(*k)) {
        info!("{} rejected, contains {}", filename, keyword);
        return true;
    }

    let file_rules = rules.files.get(filename);

    for line in text.lines() {
        if let Some(pattern) = unresolved_deny(&rules.global, line) {
            info!("{} rejected by global deny {} on {:?}", filename, pattern, line);
            return true;
        }

        if let Some(pattern) = file_rules.and_then(|set| unresolved_deny(set, line)) {
            info!("{} rejected by {} deny {} on {:?}", filename, filename, pattern, line);
            return true;
        }
    }

    false
}
