//! Email delivery module: queue consumers, endpoint definitions, transport
//! boundary, and the Postgres audit trail.

pub mod audit;
pub mod consumers;
pub mod endpoints;
pub mod sink;
pub mod transport;

pub use audit::{AuditStore, EmailJobRecord};
pub use consumers::{EmailFaultConsumer, ResendEmailConsumer, SendEmailConsumer};
pub use endpoints::email_endpoints;
pub use sink::{FaultSink, LogFaultSink, PgFaultSink};
pub use transport::{EmailTransport, LogTransport, TransportError};
