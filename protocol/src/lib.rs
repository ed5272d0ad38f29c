pub mod payload;
pub mod pump;
pub mod routing;
pub mod topics;

pub use payload::PayloadError;
pub use pump::PumpState;
pub use routing::{HandlerKind, MessageHandler, RoutingTable, Subscription};
pub use topics::Topics;
