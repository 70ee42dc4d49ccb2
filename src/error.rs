//! Startup Error Types
//!
//! Only startup can fail fatally; request errors are handled in
//! [`server`](crate::server).

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("unable to load configuration")]
    Config,
    #[display("unable to initialize logging: {_0}")]
    Logging(#[error(not(source))] String),
    #[display("unable to set up storage backend")]
    Storage,
    #[display("initial refresh failed")]
    Refresh,
    #[display("HTTP server failed")]
    Server,
}
