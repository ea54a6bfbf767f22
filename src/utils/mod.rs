//! Various useful things.

pub mod fatal;
pub mod sync;

