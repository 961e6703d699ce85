//! Async RabbitMQ adapter: consumes grading requests, dispatches them onto
//! the synchronous engine via blocking tasks, and publishes responses.

pub mod consumer;
pub mod error;
pub mod object_store;
pub mod schema;

pub use consumer::{Broker, BrokerConfig};
pub use error::{BrokerError, Result};
pub use object_store::{ObjectStore, S3ObjectStore};
