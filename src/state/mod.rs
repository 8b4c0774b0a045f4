//! Player state machine and the condition-variable-backed waiter every
//! worker suspends on (C2, state-manager half).

pub mod manager;

pub use manager::{PlayerState, StateManager};
