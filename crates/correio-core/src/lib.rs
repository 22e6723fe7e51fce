//! Transactional outbox/inbox reliability engine.
//!
//! Outgoing messages are persisted in the same storage transaction as the
//! business data that produced them, then forwarded to the broker
//! asynchronously; incoming messages are persisted before their handler runs,
//! so failures retry from local state instead of broker redelivery. Delivery
//! is at-least-once, driven entirely by persisted envelope state — the
//! process that dispatches a message need not be the one that created it.

pub mod codec;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod pool;
pub mod publisher;
pub mod server;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod telemetry;
pub mod transport;

pub use codec::{JsonCodec, PayloadCodec};
pub use config::CorreioConfig;
pub use consumer::{
    Ack, ConsumerContext, ConsumerExecutor, ConsumerExecutorDescriptor, ConsumerRegistry,
    ConsumerRegistryBuilder, ExecuteItem,
};
pub use dispatcher::Dispatcher;
pub use message::{headers, MediumMessage, Message, MessageDirection};
pub use publisher::Publisher;
pub use server::ProcessingServer;
pub use state::{StateMachine, StatusName};
pub use storage::{DataStorage, MemoryStorage, StorageTransaction};
pub use sweeper::{RetrySweeper, SweepStats};
pub use transport::{
    ConsumerClient, ConsumerClientFactory, Delivery, ReceiptToken, Transport, TransportFactory,
    TransportMessage,
};
