pub mod emitter;
pub mod hash;
pub mod ipc;
pub mod json;
pub mod listener;
pub mod random;
pub mod snapshot;
pub mod state;
pub mod token;
