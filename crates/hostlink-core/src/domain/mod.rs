//! Domain state shared by every layer of the server.

pub mod request;
pub mod session;
pub mod subscriptions;

pub use request::{BatchExecutionType, Request, RequestResult, RequestStatus};
pub use session::{Session, SessionId, SessionParameters};
pub use subscriptions::{EventSubscription, SubscriptionCounter};
