// SPDX-License-Identifier: MIT
//
// scanbridge-session -- The mobile hand-off scan session manager.
//
// A scan session correlates one desktop (viewer) client and one mobile
// (capture) client via a shared identifier. The desktop creates the session
// and polls it; the mobile joins by id and streams captured frames. Sessions
// are held in process memory only: a restart drops them all, which is
// acceptable for the short-lived hand-off use case and is an explicit
// limitation of the single-process design.

pub mod retry;
pub mod store;
pub mod sweep;

pub use retry::{PollConfig, poll_session};
pub use store::SessionStore;
pub use sweep::ExpirySweeper;
