use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("object store error fetching {name}: {source}")]
    ObjectStore {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("delivery carried no body")]
    EmptyDelivery,
}
