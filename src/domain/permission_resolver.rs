use crate::domain::mission_model::EndpointRecord;
use crate::domain::mission_model::MissionRecord;
use crate::domain::mission_model::Registry;
use crate::domain::permission_model::AuthScope;
use crate::domain::permission_model::PermissionLevel;
use crate::domain::permission_model::Requirement;
use crate::domain::permission_model::Route;
use crate::domain::permission_model::RunMode;
use crate::domain::token_model::Caller;

/// Reason given when the run mode hides a route altogether.
pub const MODE_EXCLUDED: &str = "route not offered in this run mode";

/// Result of a resolution plus the reason, kept for operator logs only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub level: PermissionLevel,
    pub reason: &'static str,
}

impl Resolution {
    fn new(level: PermissionLevel, reason: &'static str) -> Self {
        Self { level, reason }
    }
}

/// Identity gate of an endpoint record: passes when the record names no
/// users or groups, or when the caller is in one of them.
fn endpoint_admits(record: &EndpointRecord, caller: &Caller) -> bool {
    !record.is_gated()
        || caller.listed_in(record.users.as_deref())
        || caller.shares_group(record.groups.as_deref())
}

fn mode_allowed(modes: &Option<Vec<RunMode>>, mode: RunMode) -> bool {
    match modes {
        Some(modes) => modes.contains(&mode),
        None => true,
    }
}

/// Mission-level grant before the final pilot check.
fn mission_grant(
    mission: &MissionRecord,
    mode: RunMode,
    require_pilot: bool,
    caller: &Caller,
) -> (PermissionLevel, &'static str) {
    let default = if mode == RunMode::Private && require_pilot && !mission.has_pilot_acl() {
        PermissionLevel::Pilot
    } else {
        PermissionLevel::View
    };

    if !mission.has_acl() {
        return (default, "mission declares no access lists");
    }

    if !caller.is_identified() {
        return (PermissionLevel::Reject, "mission requires an identified caller");
    }

    if caller.listed_in(mission.pilotusers.as_deref())
        || caller.shares_group(mission.pilotgroups.as_deref())
    {
        return (PermissionLevel::Pilot, "caller is in the mission pilot lists");
    }

    if caller.listed_in(mission.users.as_deref()) || caller.shares_group(mission.groups.as_deref())
    {
        return (default.max(PermissionLevel::View), "caller is in the mission lists");
    }

    (PermissionLevel::Reject, "caller matches none of the mission lists")
}

/// Decides whether `caller` may use `route` on the mission named by
/// `glider` and `selector`. Pure: the same registry snapshot and inputs
/// always give the same answer.
pub fn resolve(
    registry: &Registry,
    route: Route,
    requirement: &Requirement,
    glider: Option<u32>,
    selector: Option<&str>,
    caller: &Caller,
) -> Resolution {
    let mut modes = requirement.modes.clone();
    let mut require_pilot = requirement.require_pilot;

    if let Some(record) = registry.endpoint(route) {
        if !endpoint_admits(record, caller) {
            return Resolution::new(PermissionLevel::Reject, "endpoint user/group gate");
        }
        if record.modes.is_some() {
            modes = record.modes.clone();
        }
        if let Some(pilot) = record.requirepilot {
            require_pilot = pilot;
        }
    }

    if requirement.scope == AuthScope::Endpoint {
        if !mode_allowed(&modes, registry.mode) {
            return Resolution::new(PermissionLevel::Invalid, MODE_EXCLUDED);
        }
        return Resolution::new(PermissionLevel::View, "endpoint check passed");
    }

    let Some(glider) = glider else {
        return Resolution::new(PermissionLevel::Invalid, "no instrument in request");
    };

    let Some(mission) = registry.find_mission(glider, selector) else {
        return Resolution::new(PermissionLevel::Invalid, "no matching mission");
    };

    if let Some(record) = mission.endpoint(route) {
        if !endpoint_admits(record, caller) {
            return Resolution::new(PermissionLevel::Reject, "mission endpoint user/group gate");
        }
        if record.modes.is_some() {
            modes = record.modes.clone();
        }
        if let Some(pilot) = record.requirepilot {
            require_pilot = pilot;
        }
    }

    if !mode_allowed(&modes, registry.mode) {
        return Resolution::new(PermissionLevel::Invalid, MODE_EXCLUDED);
    }

    let (grant, reason) = mission_grant(mission, registry.mode, require_pilot, caller);

    if grant <= PermissionLevel::Reject {
        return Resolution::new(PermissionLevel::Reject, reason);
    }
    if require_pilot && grant < PermissionLevel::Pilot {
        return Resolution::new(PermissionLevel::Reject, "route requires pilot rights");
    }

    Resolution::new(grant, reason)
}

/// Every mission the caller may at least view, in registry order.
pub fn authorized_missions<'a>(registry: &'a Registry, caller: &Caller) -> Vec<&'a MissionRecord> {
    registry
        .missions
        .iter()
        .filter(|m| mission_grant(m, registry.mode, false, caller).0.is_granted())
        .collect()
}
