//! Keelson Core
//!
//! This crate contains the runtime-agnostic messaging kernel:
//! - Message frames with flags and move semantics (`msg`)
//! - Lock-free SPSC pipes with backpressure and two-phase teardown (`pipe`)
//! - Zero-copy segmented buffer for streaming decoders (`buffer`)
//! - Fair-queue / load-balancer dispatch algorithms (`fq`, `lb`)
//! - Prefix trie for pub/sub subscription matching (`trie`)
//! - Endpoint parsing, in-process transport, reconnect backoff,
//!   lifecycle monitoring, and error types

#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::needless_pass_by_ref_mut)]
pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod fq;
pub mod inproc;
pub mod lb;
pub mod monitor;
pub mod msg;
pub mod options;
pub mod pipe;
pub mod reconnect;
pub mod trie;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::buffer::SegmentedBuffer;
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{KeelsonError, KeelsonResult};
    pub use crate::fq::FairQueue;
    pub use crate::lb::LoadBalancer;
    pub use crate::monitor::{TransportEvent, TransportMonitor};
    pub use crate::msg::{Msg, MsgFlags};
    pub use crate::options::{Endian, SocketOptions};
    pub use crate::pipe::{pipe_pair, Pipe, PipeEvents, PipeId, PipeState};
    pub use crate::reconnect::ReconnectTimer;
    pub use crate::trie::MultiTrie;
}
