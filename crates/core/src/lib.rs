//! Domain types, traits, and pure algorithms shared by the scanner and
//! consumer binaries. Concrete infrastructure (Postgres, AMQP, JSON-RPC)
//! lives in sibling crates that depend on this one, not the other way
//! around.

pub mod config;
pub mod error;
pub mod event;
pub mod finality;
pub mod rules;
pub mod scan;
pub mod traits;
pub mod wire;

pub use error::{ChainError, ConfigError, ConsumerError, DispatchError, QueueError, RepoError, ScanError};
pub use event::{BridgeTask, ChainSide, Event, EventName, EventPayload, TaskStatus};
pub use traits::{ChainRpc, Dispatcher, Queue, RawLog, Repository, TxResult};
