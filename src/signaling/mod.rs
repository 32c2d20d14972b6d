pub mod events;
mod lifecycle;
mod outbound;
pub mod presence;
mod relay;

pub use events::{ClientEvent, EndReason, ServerEvent, SignalKind};
pub use presence::ConnectionId;
pub use relay::{Relay, Scope};
