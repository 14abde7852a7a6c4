//! Socket and transport configuration options.
//!
//! [`SocketOptions`] collects the tunables that flow from the application
//! down into pipes, sessions, and engines: high-water marks, reconnect
//! backoff, framing endianness, message size limits, and TCP knobs.

use std::time::Duration;

/// Byte order used for the 8-byte extended length field on the wire.
///
/// Both peers of a connection must agree on this out of band; the
/// framing itself carries no endianness marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endian {
    /// Network byte order (default).
    #[default]
    Big,
    /// Little-endian, for interop with hosts that frame natively.
    Little,
}

/// Socket configuration options.
///
/// Options control queue capacities, reconnection behavior, and wire
/// framing limits.
///
/// # Examples
///
/// ```
/// use keelson_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_send_hwm(500)
///     .with_reconnect_ivl(Duration::from_millis(50));
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// High water mark for sending.
    ///
    /// Maximum number of frames queued toward a single peer. When
    /// reached, writes fail until the peer drains below the low-water
    /// mark. `0` means unlimited.
    /// - Default: 1000 frames
    pub send_hwm: usize,

    /// High water mark for receiving.
    ///
    /// Advertised to the peer as the capacity of the frames flowing
    /// toward us; the peer's writes observe it. `0` means unlimited.
    /// - Default: 1000 frames
    pub recv_hwm: usize,

    /// Initial reconnection delay after connection loss.
    ///
    /// Used as both the first delay and the jitter range for
    /// exponential backoff. `Duration::ZERO` disables reconnection.
    /// - Default: 100ms
    pub reconnect_ivl: Duration,

    /// Maximum reconnection delay for exponential backoff.
    ///
    /// - Default: 0 (no backoff, use `reconnect_ivl` plus jitter always)
    /// - When > `reconnect_ivl`: the delay doubles up to this value
    pub reconnect_ivl_max: Duration,

    /// Linger time for pending outbound messages at shutdown.
    ///
    /// - `None`: wait indefinitely for the peer to drain
    /// - `Some(Duration::ZERO)`: discard immediately
    /// - `Some(duration)`: wait up to the duration, then discard
    /// - Default: 30s
    pub linger: Option<Duration>,

    /// Maximum size of a single frame in bytes.
    ///
    /// Frames larger than this are rejected by the decoder and the
    /// connection is torn down. `None` means no limit (default).
    pub max_msg_size: Option<u64>,

    /// Byte order of the extended length field.
    pub endian: Endian,

    /// Read buffer size in bytes.
    ///
    /// Capacity of the buffers handed to the kernel per receive.
    /// - Default: 8192
    pub read_buffer_size: usize,

    /// Write buffer initial capacity in bytes.
    ///
    /// - Default: 8192
    pub write_buffer_size: usize,

    /// Enable TCP_NODELAY on stream sockets.
    /// - Default: true
    pub tcp_nodelay: bool,

    /// Enable TCP keepalive probes on stream sockets.
    /// - Default: false (OS default behavior)
    pub tcp_keepalive: bool,

    /// Idle time before the first keepalive probe.
    ///
    /// `None` leaves the OS default in place. Ignored unless
    /// `tcp_keepalive` is set.
    pub tcp_keepalive_idle: Option<Duration>,

    /// Interval between keepalive probes.
    ///
    /// `None` leaves the OS default in place. Ignored unless
    /// `tcp_keepalive` is set.
    pub tcp_keepalive_intvl: Option<Duration>,

    /// Listen backlog for bound endpoints.
    /// - Default: 128
    pub backlog: i32,

    /// Preferred I/O threads for this socket's engines, as a bitmask.
    ///
    /// `0` means any thread; bit `n` set allows reactor thread `n`.
    pub affinity: u64,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            send_hwm: 1000,
            recv_hwm: 1000,
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::ZERO,
            linger: Some(Duration::from_secs(30)),
            max_msg_size: None,
            endian: Endian::Big,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            tcp_nodelay: true,
            tcp_keepalive: false,
            tcp_keepalive_idle: None,
            tcp_keepalive_intvl: None,
            backlog: 128,
            affinity: 0,
        }
    }
}

impl SocketOptions {
    /// Create new socket options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set send high water mark.
    #[must_use]
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm;
        self
    }

    /// Set receive high water mark.
    #[must_use]
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm;
        self
    }

    /// Set reconnection interval.
    #[must_use]
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Set maximum reconnection interval for exponential backoff.
    #[must_use]
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Set linger behavior.
    #[must_use]
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set maximum frame size.
    #[must_use]
    pub fn with_max_msg_size(mut self, size: Option<u64>) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Set the extended-length byte order.
    #[must_use]
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer initial capacity.
    #[must_use]
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY.
    #[must_use]
    pub fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Enable or disable TCP keepalive probes.
    #[must_use]
    pub fn with_tcp_keepalive(mut self, enabled: bool) -> Self {
        self.tcp_keepalive = enabled;
        self
    }

    /// Set idle time before the first keepalive probe.
    #[must_use]
    pub fn with_tcp_keepalive_idle(mut self, idle: Option<Duration>) -> Self {
        self.tcp_keepalive_idle = idle;
        self
    }

    /// Set the interval between keepalive probes.
    #[must_use]
    pub fn with_tcp_keepalive_intvl(mut self, intvl: Option<Duration>) -> Self {
        self.tcp_keepalive_intvl = intvl;
        self
    }

    /// Set listen backlog.
    #[must_use]
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the reactor thread affinity bitmask.
    #[must_use]
    pub fn with_affinity(mut self, affinity: u64) -> Self {
        self.affinity = affinity;
        self
    }

    /// Whether reconnection after connection loss is enabled.
    #[must_use]
    pub fn reconnect_enabled(&self) -> bool {
        !self.reconnect_ivl.is_zero()
    }
}

/// Compute the low-water mark for a given high-water mark.
///
/// The peer resumes our writes once its read count crosses a multiple of
/// this value. Half the capacity (rounded up) keeps the queue busy while
/// leaving room for in-flight activation messages; `0` (unlimited HWM)
/// maps to `0`.
#[must_use]
pub fn compute_lwm(hwm: usize) -> usize {
    (hwm + 1) / 2
}
