use std::io;
use thiserror::Error;

/// Failures that stop the server from starting
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("error starting server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("error reading listener address: {0}")]
    LocalAddr(#[source] io::Error),
}
