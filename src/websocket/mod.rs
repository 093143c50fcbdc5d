//! WebSocket (RFC 6455) connections.
//!
//! Once an HTTP request has been upgraded (see [`crate::upgrade::Upgrade`]), [`run`] drives the
//! connection for the rest of its life: a blocking read loop assembles frames into full messages
//! and dispatches them to a [`WebSocketHandler`], while a [`WebSocketSender`] lets any thread
//! (including the handler itself, or another connection entirely) push frames out under the same
//! write mutex.
pub mod frame;
pub mod handshake;

use std::io;
use std::sync::{Arc, Mutex};

use crate::Connection;
use frame::{FrameError, OpCode};

/// Application callbacks for one WebSocket connection's lifetime.
///
/// `on_begin` fires exactly once, right after the handshake. `on_end` fires exactly once,
/// whichever side initiated the close. A panic inside any callback is caught: in debug builds it
/// is resumed after being observed (so `cargo test` still fails loudly); in release builds it is
/// logged and swallowed so one bad message can't take the whole connection thread down silently
/// without at least an `on_end`.
pub trait WebSocketHandler: Send {
    fn on_begin(&mut self, _sender: &WebSocketSender) {}
    fn on_text(&mut self, sender: &WebSocketSender, text: String);
    fn on_binary(&mut self, sender: &WebSocketSender, data: Vec<u8>);
    fn on_pong(&mut self, _sender: &WebSocketSender, _data: Vec<u8>) {}
    fn on_end(&mut self) {}
}

/// A cloneable handle used to send frames on a WebSocket connection.
///
/// All sends funnel through the same mutex, so a fragmented message started on one thread can't
/// be interleaved with a message sent from another.
#[derive(Clone)]
pub struct WebSocketSender {
    conn: Arc<Mutex<Connection>>,
}

impl WebSocketSender {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn send_text(&self, text: impl AsRef<str>) -> io::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        frame::write_frame(&mut *conn, true, OpCode::Text, text.as_ref().as_bytes())
    }

    pub fn send_binary(&self, data: impl AsRef<[u8]>) -> io::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        frame::write_frame(&mut *conn, true, OpCode::Binary, data.as_ref())
    }

    /// Sends `fragments` as a single logical message split across multiple frames. Every
    /// fragment, including the last, is written with `FIN=0`; a trailing zero-payload
    /// continuation frame with `FIN=1` closes the message out.
    pub fn send_fragmented<'a, I>(&self, opcode: MessageKind, fragments: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut conn = self.conn.lock().unwrap();
        let mut first = true;

        for fragment in fragments {
            let opcode = if first {
                opcode.into()
            } else {
                OpCode::Continuation
            };
            frame::write_frame(&mut *conn, false, opcode, fragment)?;
            first = false;
        }

        frame::write_frame(&mut *conn, true, OpCode::Continuation, &[])
    }

    fn send_pong(&self, data: &[u8]) -> io::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        frame::write_frame(&mut *conn, true, OpCode::Pong, data)
    }

    /// Closes the connection with a Close frame carrying no body.
    pub fn close(&self) -> io::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        frame::write_frame(&mut *conn, true, OpCode::Close, &[])
    }
}

/// Which kind of message [`WebSocketSender::send_fragmented`] is starting.
#[derive(Debug, Clone, Copy)]
pub enum MessageKind {
    Text,
    Binary,
}

impl From<MessageKind> for OpCode {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Text => OpCode::Text,
            MessageKind::Binary => OpCode::Binary,
        }
    }
}

/// The default cap on an assembled message's total size (across all of its fragments), absent an
/// explicit choice: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Drives one WebSocket connection until the peer closes it, the transport errors out, or a
/// protocol violation is observed. Meant to be invoked from the closure passed to
/// [`crate::upgrade::Upgrade::upgrade`], on the connection's own pooled thread.
pub fn run<H: WebSocketHandler>(conn: Connection, max_message_size: u64, mut handler: H) {
    let sender = WebSocketSender::new(conn.clone());
    let mut reader = conn;

    call_handler(|| handler.on_begin(&sender));

    let mut in_progress: Option<(OpCode, Vec<u8>)> = None;

    loop {
        let frame = match frame::read_frame(&mut reader, max_message_size) {
            Ok(frame) => frame,
            // Unrecognized/reserved opcodes are ignored rather than treated as a hard protocol
            // violation: the frame was already fully drained off the stream, so reading the next
            // one stays in sync.
            Err(FrameError::UnknownOpcode(_)) => continue,
            Err(_) => break,
        };

        match frame.opcode {
            OpCode::Ping => {
                if sender.send_pong(&frame.payload).is_err() {
                    break;
                }
            }
            OpCode::Pong => call_handler(|| handler.on_pong(&sender, frame.payload.clone())),
            OpCode::Close => {
                sender.close().ok();
                break;
            }
            OpCode::Continuation => match in_progress.as_mut() {
                None => break, // continuation with nothing to continue: protocol violation
                Some((_, buf)) => {
                    buf.extend_from_slice(&frame.payload);
                    if frame.fin {
                        let (opcode, data) = in_progress.take().unwrap();
                        if !deliver(&mut handler, &sender, opcode, data) {
                            break;
                        }
                    }
                }
            },
            OpCode::Text | OpCode::Binary => {
                if in_progress.is_some() {
                    break; // a new message started before the last one finished
                }
                if frame.fin {
                    if !deliver(&mut handler, &sender, frame.opcode, frame.payload) {
                        break;
                    }
                } else {
                    in_progress = Some((frame.opcode, frame.payload));
                }
            }
        }
    }

    call_handler(|| handler.on_end());
}

fn deliver<H: WebSocketHandler>(
    handler: &mut H,
    sender: &WebSocketSender,
    opcode: OpCode,
    data: Vec<u8>,
) -> bool {
    match opcode {
        OpCode::Text => match String::from_utf8(data) {
            Ok(text) => {
                call_handler(|| handler.on_text(sender, text));
                true
            }
            Err(_) => false, // invalid UTF-8 in a text frame is a protocol violation
        },
        OpCode::Binary => {
            call_handler(|| handler.on_binary(sender, data));
            true
        }
        _ => true,
    }
}

fn call_handler(f: impl FnOnce() + std::panic::UnwindSafe) {
    match std::panic::catch_unwind(f) {
        Ok(()) => {}
        Err(payload) => {
            if cfg!(debug_assertions) {
                std::panic::resume_unwind(payload);
            } else {
                log::error!("websocket handler panicked; continuing the connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;

    fn masked_frame(fin: bool, opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let mut out = vec![(if fin { 0x80 } else { 0 }) | match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }];
        let len = payload.len();
        assert!(len <= 125);
        out.push(0x80 | len as u8);
        out.extend_from_slice(&key);
        let mut masked = payload.to_vec();
        for (i, byte) in masked.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
        out.extend_from_slice(&masked);
        out
    }

    struct RecordingHandler {
        texts: mpsc::Sender<String>,
    }

    impl WebSocketHandler for RecordingHandler {
        fn on_text(&mut self, _sender: &WebSocketSender, text: String) {
            self.texts.send(text).ok();
        }

        fn on_binary(&mut self, _sender: &WebSocketSender, _data: Vec<u8>) {}
    }

    #[test]
    fn unknown_opcode_is_ignored_instead_of_closing_the_connection() {
        let (mut client, server) = UnixStream::pair().unwrap();

        let mut wire = Vec::new();
        // Reserved opcode 0x3 with FIN set: unrecognized, must be skipped.
        let mut reserved = masked_frame(true, OpCode::Text, b"ignored", [1, 2, 3, 4]);
        reserved[0] = 0x80 | 0x3;
        wire.extend_from_slice(&reserved);
        // A normal text frame right after it must still be delivered.
        wire.extend_from_slice(&masked_frame(true, OpCode::Text, b"hi", [5, 6, 7, 8]));
        client.write_all(&wire).unwrap();

        let (tx, rx) = mpsc::channel();
        let handler = RecordingHandler { texts: tx };

        let conn = Connection::from(server);
        let run_thread = std::thread::spawn(move || run(conn, DEFAULT_MAX_MESSAGE_SIZE, handler));

        let received = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(received, "hi");

        drop(client);
        run_thread.join().unwrap();
    }
}
