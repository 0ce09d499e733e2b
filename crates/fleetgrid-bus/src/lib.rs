//! fleetgrid-bus — message transport for FleetGrid.
//!
//! Robots and this service talk over subject-addressed publish/subscribe
//! channels. The [`Transport`] trait is the seam; [`InMemoryBus`] is the
//! bundled implementation. Realtime observers are served through the
//! best-effort [`Fanout`] side channel.

pub mod error;
pub mod fanout;
pub mod memory;
pub mod subjects;
pub mod transport;

pub use error::{BusError, BusResult};
pub use fanout::{BestEffortFanout, Fanout, NoopFanout};
pub use memory::InMemoryBus;
pub use transport::{BusFuture, BusMessage, Subscription, Transport, publish_json};
