//! HTTP Server
//!
//! The [`Server`] is responsible to read and parse a [`http::Request`], and then execute a [`App`] to generate
//! a [`http::Response`].
//!
//! The implementation follows a simple thead per connection model, backed by a thread pool.
//!
//! # Example
//! ```no_run
//! use hearthstead::{Response, Server, StatusCode};
//!
//! fn main() -> std::io::Result<()> {
//!     Server::builder()
//!         .max_threads(256)
//!         .bind("0.0.0.0:4444")
//!         .serve(|_req| {
//!             Response::builder()
//!                 .status(StatusCode::OK)
//!                 .body(())
//!         })
//! }
//! ```
use std::{
    error::Error,
    io::{self, BufReader},
    net::{IpAddr, TcpListener, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use http::{Method, Request, Response};
use threadpool::ThreadPool;

use crate::{
    body::{Body, HttpBody},
    errors::HandlerError,
    gzip,
    read_queue::ReadQueue,
    request::{self, ParseError, RequestLimits},
    response::{self, Outcome},
    Connection,
};

/// Executes application logic against a parsed request, producing a response.
///
/// Anything implementing `Fn(Request<Body>) -> Result<Response<B>, Err>` (for `B: HttpBody` and
/// `Err: Into<Box<dyn Error + Send + Sync>>`) implements this automatically, so a plain closure is
/// usually enough — see the module example. [`crate::router::UrlResolver`] also implements it
/// directly, so a whole routing table can be handed to [`Server::serve`] as-is.
pub trait App {
    type Body: HttpBody;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    fn call(&self, req: Request<Body>) -> Result<Response<Self::Body>, Self::Error>;
}

impl<F, B, Err> App for F
where
    F: Fn(Request<Body>) -> Result<Response<B>, Err>,
    B: HttpBody,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    type Body = B;
    type Error = Err;

    fn call(&self, req: Request<Body>) -> Result<Response<Self::Body>, Self::Error> {
        self(req)
    }
}

/// Tuning knobs for how a [`Server`] parses requests and manages idle connections.
///
/// Defaults match the values a production deployment would pick: a generous but bounded header
/// budget, a 1 GiB cap on POST bodies, and spooling anything at or above 1 MiB to a temp file so
/// large uploads don't force the whole body into memory.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// `None` disables idle timeouts entirely. Applied to every connection right after accept.
    pub idle_timeout: Option<Duration>,
    pub max_size_headers: usize,
    pub max_size_post_content: u64,
    pub max_size_uri: usize,
    pub use_file_upload_at_size: u64,
    pub temp_dir: PathBuf,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(10)),
            max_size_headers: 256 * 1024,
            max_size_post_content: 1024 * 1024 * 1024,
            max_size_uri: 8 * 1024,
            use_file_upload_at_size: 1024 * 1024,
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl ServerOptions {
    fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_header_bytes: self.max_size_headers,
            max_post_bytes: self.max_size_post_content,
            max_uri_bytes: self.max_size_uri,
            file_upload_threshold: self.use_file_upload_at_size,
            temp_dir: self.temp_dir.clone(),
        }
    }
}

/// A bind target: an optional address (`None` means all interfaces), a port, and whether it
/// should be served over TLS. Two endpoints are equal iff all three fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub bind_address: Option<IpAddr>,
    pub port: u16,
    pub secure: bool,
}

impl Endpoint {
    pub fn new(port: u16) -> Self {
        Self {
            bind_address: None,
            port,
            secure: false,
        }
    }

    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn socket_addr(&self) -> (IpAddr, u16) {
        (
            self.bind_address.unwrap_or(IpAddr::from([0, 0, 0, 0])),
            self.port,
        )
    }
}

/// A listening HTTP server that accepts HTTP 1 connections.
pub struct Server<'a> {
    thread_pool: ThreadPool,
    incoming: Box<dyn Iterator<Item = Connection> + 'a>,
    options: ServerOptions,
}

impl<'a> Server<'a> {
    /// Starts the [`ServerBuilder`].
    pub fn builder() -> ServerBuilder {
        Default::default()
    }

    /// Binds the [`Server`] to the given `addr`.
    ///
    /// # Panics
    ///
    /// This method will panic if binding to the address fails. For a non panic method to bind the
    /// server, see [`ServerBuilder::try_bind`].
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Server<'static> {
        Self::builder().bind(addr)
    }

    /// Serves an [`App`].
    ///
    /// # Example
    /// ```no_run
    /// # use hearthstead::{Request, Response, Server, StatusCode};
    /// # fn main() -> std::io::Result<()> {
    /// Server::bind("0.0.0.0:4444").serve(|req: Request<_>| {
    ///     Response::builder()
    ///         .status(StatusCode::OK)
    ///         .body(req.into_body())
    /// })
    /// # }
    /// ```
    pub fn serve<A>(self, app: A) -> io::Result<()>
    where
        A: App,
        A: Send + Clone + 'static,
    {
        let options = self.options;
        for conn in self.incoming {
            let app = app.clone();
            let options = options.clone();
            self.thread_pool.execute(move || {
                serve(conn, app, &options).ok();
            });
        }

        Ok(())
    }

    /// Serves an [`Connection`]. This should be used when you need to execute some logic on every
    /// connection.
    ///
    /// # Example
    /// ```no_run
    /// # use std::convert::Infallible;
    /// # use hearthstead::{Connection, Response, Server, StatusCode};
    /// # fn main() -> std::io::Result<()> {
    /// Server::builder()
    ///     .bind("0.0.0.0:4444")
    ///     .serve_connection(|conn: &Connection| {
    ///         println!("New connection arrived: {:?}", conn.peer_addr());
    ///
    ///         Ok::<_, Infallible>(|_req| {
    ///             Response::builder()
    ///                 .status(StatusCode::OK)
    ///                 .body(())
    ///         })
    ///     })
    /// # }
    /// ```
    pub fn serve_connection<C>(self, app: C) -> io::Result<()>
    where
        C: ConnectionHandler,
        C: Send + Clone + 'static,
    {
        let options = self.options;
        for conn in self.incoming {
            let app = app.clone();
            let options = options.clone();
            if let Ok(handler) = app.handle_connection(&conn) {
                self.thread_pool.execute(move || {
                    serve(conn, handler, &options).ok();
                });
            }
        }

        Ok(())
    }
}

pub struct ServerBuilder {
    max_threads: usize,
    options: ServerOptions,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            max_threads: 512,
            options: ServerOptions::default(),
        }
    }
}

impl ServerBuilder {
    /// Define the max number of threads this server may create. Defaults to `512`.
    ///
    /// # Example
    /// ```no_run
    /// # use hearthstead::{Response, Server, StatusCode};
    /// # fn main() -> std::io::Result<()> {
    /// Server::builder()
    ///     .max_threads(12)
    ///     .bind("0.0.0.0:4444")
    ///     .serve(|_req| {
    ///         Response::builder()
    ///             .status(StatusCode::OK)
    ///             .body(())
    ///     })
    /// # }
    /// ```
    pub fn max_threads(self, max_threads: usize) -> Self {
        Self { max_threads, ..self }
    }

    /// Overrides the default [`ServerOptions`] (idle timeout, header/body size limits, upload
    /// spooling threshold).
    pub fn options(self, options: ServerOptions) -> Self {
        Self { options, ..self }
    }

    /// Binds the [`Server`] to the given `addr`.
    ///
    /// # Panics
    ///
    /// This method will panic if binding to the address fails. For a non panic way to bind a
    /// server, see [`ServerBuilder::try_bind`].
    pub fn bind<A: ToSocketAddrs>(self, addr: A) -> Server<'static> {
        self.try_bind(addr).unwrap()
    }

    /// Tries to bind the server to the informed `addr`.
    pub fn try_bind<A: ToSocketAddrs>(self, addr: A) -> io::Result<Server<'static>> {
        let listener = TcpListener::bind(addr)?;
        Ok(self.from_connections(Box::new(TcpAcceptor { listener })))
    }

    /// Tries to bind the server to the given [`Endpoint`]. Binding a `secure` endpoint requires
    /// pairing this with a TLS-terminating [`Connection`] source (see [`Self::from_connections`])
    /// since plain [`TcpListener`] accepts never produce TLS connections on their own.
    pub fn try_bind_endpoint(self, endpoint: &Endpoint) -> io::Result<Server<'static>> {
        self.try_bind(endpoint.socket_addr())
    }

    /// Accepts connections from some [`Iterator`].
    ///
    /// # Example
    /// Running the server on a Unix socket
    /// ```no_run
    /// # use std::os::unix::net::UnixListener;
    /// # use hearthstead::{Request, Response, Server, StatusCode};
    /// # fn main() -> std::io::Result<()> {
    /// let listener = UnixListener::bind("server.socket")?;
    ///
    /// // Converting the Unix socket to a compatible [`Connection`]
    /// let connections = listener
    ///     .incoming()
    ///     .filter_map(|conn| conn.ok())
    ///     .map(|conn| conn.into());
    ///
    /// Server::builder()
    ///     .from_connections(connections)
    ///     .serve(|_req| {
    ///         Response::builder()
    ///             .status(StatusCode::OK)
    ///             .body("Hello from Unix socket!")
    ///     })
    /// # }
    /// ```
    pub fn from_connections<'a, T: IntoIterator<Item = Connection> + 'a>(
        self,
        conns: T,
    ) -> Server<'a> {
        Server {
            thread_pool: ThreadPool::new(self.max_threads),
            incoming: Box::new(conns.into_iter()),
            options: self.options,
        }
    }
}

struct TcpAcceptor {
    listener: TcpListener,
}

impl Iterator for TcpAcceptor {
    type Item = Connection;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.listener.accept().ok()?.into())
    }
}

pub trait ConnectionHandler {
    type App: App + Send;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    fn handle_connection(&self, conn: &Connection) -> Result<Self::App, Self::Error>;
}

impl<F, A, Err> ConnectionHandler for F
where
    F: Fn(&Connection) -> Result<A, Err>,
    F: Sync + Send + Clone,
    Err: Into<Box<dyn Error + Send + Sync>>,
    A: App + Send,
{
    type App = A;
    type Error = Err;

    fn handle_connection(&self, conn: &Connection) -> Result<Self::App, Self::Error> {
        self(conn)
    }
}

/// Drives one accepted connection to completion: parses every pipelined request in turn, calls
/// `app`, writes the response, and keeps the connection alive (or closes it, or hands it off to an
/// [`crate::upgrade::UpgradeHandler`]) per [`Outcome`].
pub(crate) fn serve<A: App>(conn: Connection, app: A, options: &ServerOptions) -> io::Result<()> {
    if let Some(timeout) = options.idle_timeout {
        conn.set_read_timeout(Some(timeout)).ok();
    }

    let limits = options.request_limits();
    let mut read_queue = ReadQueue::new(BufReader::new(conn.clone()));

    loop {
        let reader = read_queue.enqueue();

        let req = match request::parse_request_bounded(reader, &limits) {
            Ok(req) => req,
            Err(ParseError::ConnectionClosed) => break,
            Err(err) => {
                log::debug!("failed to parse request: {err}");
                let res = Response::builder()
                    .status(err.status())
                    .body(Body::empty())
                    .unwrap();
                response::write_response(res, &mut conn.clone(), true, false)?;
                break;
            }
        };

        let client_accepts_gzip = gzip::client_accepts_gzip(req.headers());
        let is_head = req.method() == Method::HEAD;

        let mut writer = conn.clone();

        let outcome = match app.call(req) {
            Ok(res) => response::write_response(res, &mut writer, !is_head, client_accepts_gzip)?,
            Err(err) => {
                let err: Box<dyn Error + Send + Sync> = err.into();
                let err: HandlerError = err.into();
                log::warn!("handler error: {err}");
                let res = Response::builder()
                    .status(err.status)
                    .body(Body::from(err.message.unwrap_or_default()))
                    .unwrap();
                response::write_response(res, &mut writer, true, client_accepts_gzip)?
            }
        };

        match outcome {
            Outcome::KeepAlive => continue,
            Outcome::Close => break,
            Outcome::Upgrade(upgrade) => {
                upgrade.handler.handle(conn.clone());
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_with_identical_fields_are_equal() {
        let a = Endpoint::new(8080).secure(true);
        let b = Endpoint::new(8080).secure(true);
        assert_eq!(a, b);

        let c = Endpoint::new(8081).secure(true);
        assert_ne!(a, c);
    }

    #[test]
    fn default_options_match_the_documented_defaults() {
        let options = ServerOptions::default();
        assert_eq!(options.idle_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.max_size_headers, 256 * 1024);
        assert_eq!(options.max_size_post_content, 1024 * 1024 * 1024);
        assert_eq!(options.max_size_uri, 8 * 1024);
        assert_eq!(options.use_file_upload_at_size, 1024 * 1024);
    }
}
