pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod storage;

pub use api::BookingApi;
pub use config::BookingConfig;
pub use error::{BookingError, ErrorKind, Result};
