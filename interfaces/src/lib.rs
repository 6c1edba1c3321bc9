//! External-interface boundary: the ZeroMQ radio driver used by the
//! `basestation` binary to implement `layers::coordinator::RadioDriver`.

pub mod zmq_rf;

use thiserror::Error;

/// Interface errors.
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("ZMQ error: {0}")]
    ZmqError(#[from] zmq::Error),

    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
