use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("consume error: {0}")]
    Consume(String),

    #[error("ack/nack error: {0}")]
    Ack(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown delivery handle: {0}")]
    UnknownHandle(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
