//! Pluggable stream transport contract.
//!
//! Connectors and listeners are generic over a [`Transport`]; TCP is
//! the in-tree implementation. Alternative stream transports (IPC,
//! tunneled streams) plug in by satisfying the same shape: resolve an
//! endpoint into a connected stream, or bind one and accept streams.

use std::net::SocketAddr;

use async_trait::async_trait;
use compio::io::{AsyncRead, AsyncWrite};
use compio::net::{OwnedReadHalf, OwnedWriteHalf, TcpListener, TcpStream};

use keelson_core::endpoint::Endpoint;
use keelson_core::error::{KeelsonError, KeelsonResult};
use keelson_core::options::SocketOptions;

use crate::tcp::configure_stream;

/// A stream transport: how connections are established and accepted.
///
/// All futures run on reactor threads and need not be `Send`.
#[async_trait(?Send)]
pub trait Transport {
    /// Connected byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// Read half of a split stream, usable concurrently with the
    /// write half.
    type ReadHalf: AsyncRead + Unpin + 'static;
    /// Write half of a split stream.
    type WriteHalf: AsyncWrite + Unpin + 'static;
    /// Bound passive endpoint.
    type Acceptor: 'static;

    /// Open a connection to `endpoint`.
    async fn connect(endpoint: &Endpoint) -> KeelsonResult<Self::Stream>;

    /// Bind `endpoint` for accepting.
    async fn bind(endpoint: &Endpoint) -> KeelsonResult<Self::Acceptor>;

    /// Accept one connection.
    async fn accept(acceptor: &Self::Acceptor) -> KeelsonResult<(Self::Stream, SocketAddr)>;

    /// The endpoint an acceptor actually bound (resolves port 0).
    fn local_endpoint(acceptor: &Self::Acceptor) -> KeelsonResult<Endpoint>;

    /// Apply per-connection options to a fresh stream.
    fn configure(stream: &Self::Stream, options: &SocketOptions) -> KeelsonResult<()>;

    /// Split a stream into halves the engine can read and write
    /// concurrently.
    fn split(stream: Self::Stream) -> (Self::ReadHalf, Self::WriteHalf);
}

/// The default TCP transport.
pub struct TcpTransport;

#[async_trait(?Send)]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type ReadHalf = OwnedReadHalf<TcpStream>;
    type WriteHalf = OwnedWriteHalf<TcpStream>;
    type Acceptor = TcpListener;

    async fn connect(endpoint: &Endpoint) -> KeelsonResult<Self::Stream> {
        let addr = endpoint
            .tcp_addr()
            .ok_or_else(|| KeelsonError::InvalidEndpoint(endpoint.to_string()))?;
        Ok(TcpStream::connect(addr).await?)
    }

    async fn bind(endpoint: &Endpoint) -> KeelsonResult<Self::Acceptor> {
        let addr = endpoint
            .tcp_addr()
            .ok_or_else(|| KeelsonError::InvalidEndpoint(endpoint.to_string()))?;
        Ok(TcpListener::bind(addr).await?)
    }

    async fn accept(acceptor: &Self::Acceptor) -> KeelsonResult<(Self::Stream, SocketAddr)> {
        Ok(acceptor.accept().await?)
    }

    fn local_endpoint(acceptor: &Self::Acceptor) -> KeelsonResult<Endpoint> {
        Ok(Endpoint::Tcp(acceptor.local_addr()?))
    }

    fn configure(stream: &Self::Stream, options: &SocketOptions) -> KeelsonResult<()> {
        configure_stream(stream, options)?;
        Ok(())
    }

    fn split(stream: Self::Stream) -> (Self::ReadHalf, Self::WriteHalf) {
        stream.into_split()
    }
}
