//! # Keelson Transport
//!
//! TCP transport runtime for the keelson messaging kernel.
//!
//! ## Overview
//!
//! This crate moves framed messages between socket cores across the
//! network:
//! - **Codec**: length-prefixed wire framing with incremental decode
//! - **Reactor**: a fixed pool of I/O worker threads, each running a
//!   completion-based runtime, with thread-affined object ownership
//! - **Engine**: per-connection byte pump between a stream and a pipe
//! - **Session**: durable bridge from a socket core to its engine,
//!   surviving reconnects
//! - **Connector / Listener**: active and passive connection
//!   establishment with backoff and accept loops
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keelson_core::endpoint::Endpoint;
//! use keelson_core::options::SocketOptions;
//! use keelson_transport::connector::Connector;
//! use keelson_transport::reactor::Reactor;
//! use keelson_transport::transport::TcpTransport;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reactor = Reactor::new(2)?;
//!     let endpoint = Endpoint::resolve("tcp://127.0.0.1:5555", false)?;
//!     let options = SocketOptions::default();
//!     let (mut pipe, control) = Connector::<TcpTransport>::spawn(
//!         reactor.choose(options.affinity),
//!         endpoint,
//!         options,
//!         None,
//!         false,
//!     )?;
//!     // write/flush frames into `pipe`; they go out once connected
//!     # let _ = (&mut pipe, control);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Zero-copy**: payloads ride `Bytes` end to end
//! - **Backpressure**: pipe high-water marks propagate into TCP flow
//!   control instead of unbounded buffering
//! - **No locks per object**: each engine, session, connector, and
//!   listener lives on exactly one reactor thread

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::let_underscore_future)]

pub mod codec;
pub mod connector;
pub mod engine;
pub mod listener;
pub mod mailbox;
pub mod reactor;
pub mod session;
pub mod tcp;
pub mod transport;

pub use codec::{FrameDecoder, FrameEncoder};
pub use connector::Connector;
pub use engine::{EngineStatus, StreamEngine};
pub use listener::Listener;
pub use mailbox::{mailbox, Command, Mailbox, MailboxSender};
pub use reactor::{IoThreadHandle, Reactor, TimerHandle};
pub use session::Session;
pub use transport::{TcpTransport, Transport};
