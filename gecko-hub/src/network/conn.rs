pub(crate) use client::ClientConnection;
use tokio::io;

mod client;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O: {0}")]
    IO(#[from] io::Error),
    #[error("Connection closed by peer")]
    ConnectionAborted,
}
