//! HTTP surface: the protected edit route, monitoring and health.

mod response;
mod server;
mod service;

pub use response::{iso_timestamp, ErrorBody, ErrorResponse, Rejection, RejectionBody};
pub use server::HttpServer;
pub use service::{router, AppState};
