use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum LabError {
    #[error("invalid device address: {0:?}")]
    InvalidAddress(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("connection closed")]
    TransportClosed,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("invalid {0} reading")]
    InvalidReading(&'static str),
    #[error("no {0} data to export")]
    EmptyHistory(&'static str),
    #[error("unknown gate type: {0:?}")]
    UnknownGateType(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
