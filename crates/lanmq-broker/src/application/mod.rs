//! Application layer for lanmq-broker.
//!
//! Everything that decides *what* happens to a packet: the session state
//! machine, the subscription and client registries, and publish fan-out.
//! Uses tokio channels and cancellation tokens, but never opens a socket.

pub mod broker;
pub mod client_registry;
pub mod dispatcher;
pub mod handle;
pub mod session;
pub mod subscriptions;

pub use broker::Broker;
pub use client_registry::{ClientInfo, ClientRegistry};
pub use dispatcher::{fan_out, DispatchReport};
pub use handle::{Delivery, SessionHandle};
pub use session::{Session, SessionError, SessionFlow};
pub use subscriptions::{SubscribeOutcome, SubscriptionRegistry};
