#![doc = include_str!("../README.md")]

pub mod body;
mod connection;
mod cookie;
mod errors;
mod gzip;
mod post_spool;
mod read_queue;
mod request;
mod response;
pub mod router;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "rustls")]
mod tls;
pub mod upgrade;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use body::Body;
pub use body::HttpBody;
pub use connection::Connection;
pub use cookie::Cookie;
pub use errors::HandlerError;
pub use response::{Gzip, GzipPolicy};
#[doc(hidden)]
pub use http;
#[doc(no_inline)]
pub use http::HeaderMap;
pub use http::{header, Method, Request, Response, StatusCode, Uri, Version};
#[cfg(feature = "server")]
pub use server::{App, Server};
