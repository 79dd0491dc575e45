//! Background workers.

pub mod stream_consumer;

pub use stream_consumer::{
    ConsumerConfig, ConsumerError, ConsumerHandle, ConsumerStats, MessageOutcome, StreamConsumer,
};
