// Live view coordinators
//
// A view owns its published state and at most one active session. A
// session is bound to one identity (options, or id + options); changing
// the identity tears the session down and starts a new one. Sessions run
// on a tokio `LocalSet` and check their liveness token before every
// commit, so results for a superseded identity are dropped.

mod document;
mod ranged;

pub use document::{DocumentView, InitialValue};
pub use ranged::RangedView;
