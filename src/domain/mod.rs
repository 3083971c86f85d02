pub mod config_synchronizer;
pub mod control_commander;
pub mod control_filter;
pub mod control_querier;
pub mod event_commander;
pub mod mission_model;
pub mod mission_querier;
pub mod mission_registry;
pub mod notifier;
pub mod permission_model;
pub mod permission_resolver;
pub mod stream_querier;
pub mod token_commander;
pub mod token_model;
pub mod topic;
pub mod user_model;
