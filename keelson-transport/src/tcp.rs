//! TCP socket configuration.
//!
//! # Safety
//!
//! Options are applied through `socket2` on the raw file descriptor;
//! the borrowed descriptor is forgotten, not closed, so the stream
//! keeps ownership.

#![allow(unsafe_code)]

use std::io;

use keelson_core::options::SocketOptions;

/// Apply the configured TCP options (`TCP_NODELAY`, keepalive) to a
/// freshly connected or accepted stream.
pub fn configure_stream(
    stream: &compio::net::TcpStream,
    options: &SocketOptions,
) -> io::Result<()> {
    with_socket(stream, |sock| {
        if options.tcp_nodelay {
            sock.set_nodelay(true)?;
        }
        if options.tcp_keepalive {
            let mut keepalive = socket2::TcpKeepalive::new();
            if let Some(idle) = options.tcp_keepalive_idle {
                keepalive = keepalive.with_time(idle);
            }
            if let Some(intvl) = options.tcp_keepalive_intvl {
                keepalive = keepalive.with_interval(intvl);
            }
            sock.set_tcp_keepalive(&keepalive)?;
        }
        Ok(())
    })
}

fn with_socket<F>(stream: &compio::net::TcpStream, f: F) -> io::Result<()>
where
    F: FnOnce(&socket2::Socket) -> io::Result<()>,
{
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        let result = f(&sock);
        std::mem::forget(sock); // Don't close the fd
        result
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let raw = stream.as_raw_socket();
        let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
        let result = f(&sock);
        std::mem::forget(sock); // Don't close the socket
        result
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = f;
        Ok(())
    }
}
