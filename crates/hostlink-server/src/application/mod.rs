//! Application layer: the protocol processor and the services it drives.
//!
//! Nothing here touches a socket.  The transport in `infrastructure` feeds
//! decoded frames into [`ProtocolProcessor`] and drains each session's
//! outbound queue.

pub mod batch;
pub mod broadcast;
pub mod executor;
pub mod frame_clock;
pub mod input_events;
pub mod processor;
pub mod registry;
pub mod worker_pool;

pub use batch::{BatchEngine, BatchVariables};
pub use broadcast::{BroadcastEngine, DeliveryReport, EventEnvelope, EventSink};
pub use executor::RequestExecutor;
pub use frame_clock::{FrameClock, FrameWaiter};
pub use input_events::InputEvents;
pub use processor::{ProcessOutcome, ProtocolProcessor, SecurityEventSink};
pub use registry::{OutboundMessage, Registration, SendError, SessionHandle, SessionRegistry};
pub use worker_pool::WorkerPool;
