//! Channel sessions for both peers
//!
//! A session is the explicit handle on one end of a channel: created once
//! per UI surface (or per embedded surface on the host), passed around by
//! the code that needs it, and torn down with `close`.

mod endpoint;
mod host;
mod ui;

pub use endpoint::Diagnostics;
pub use host::{HostHandler, HostRequest, HostSession};
pub use ui::UiSession;
