//! Defines the types and traits that device handlers and the core
//! runtime share: the device model, readings, transactions, write
//! requests, tag queries, the handler trait, and the health-check
//! trait. The runtime itself (device manager, scheduler, transaction
//! store, reading cache, health manager, RPC service surface) lives
//! in `devplugd`; this crate only defines the vocabulary they speak.

mod error;
mod handler;
mod health;
mod reading;
mod tag_query;
mod transaction;
mod write;

pub mod device;

pub use error::{Error, MultiError};
pub use handler::{ActionFuture, DeviceHandler, ReadingSink, SetupAction, SetupActionFn};
pub use health::{CheckStatus, CheckType, HealthCheck};
pub use reading::{ReadContext, Reading};
pub use tag_query::TagQuery;
pub use transaction::{Status as TransactionStatus, Transaction};
pub use write::{WriteData, WritePayload};

/// A `Result` type where the error value is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
