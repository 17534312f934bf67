pub mod args;
pub mod flags;
pub mod probe;
pub mod sequencer;
pub mod session;
pub mod state;
