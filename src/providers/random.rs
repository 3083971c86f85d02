use rand::distributions::{Alphanumeric, DistString};
use uuid::Uuid;

pub struct RandomImpl;

impl RandomImpl {
    pub fn string(size: usize) -> String {
        Alphanumeric.sample_string(&mut rand::thread_rng(), size)
    }

    /// Short id used to tag a websocket session in the logs.
    pub fn session_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}
