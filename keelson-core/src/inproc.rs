//! In-process transport: pipes between sockets in the same process.
//!
//! No engine or codec is involved; connecting to a bound inproc name
//! creates a pipe pair on the spot and hands the binder its endpoint
//! through a global registry protected by `DashMap`.

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{KeelsonError, KeelsonResult};
use crate::pipe::{pipe_pair, Pipe};

/// Stream of pipe endpoints accepted by a bound inproc name.
pub type InprocIncoming = flume::Receiver<Pipe>;

static INPROC_REGISTRY: Lazy<DashMap<String, flume::Sender<Pipe>>> = Lazy::new(DashMap::new);

/// Bind an inproc name.
///
/// Each later [`connect_inproc`] to the same name delivers one pipe
/// endpoint on the returned receiver. Fails with
/// [`KeelsonError::AddressInUse`] if the name is already bound.
pub fn bind_inproc(name: &str) -> KeelsonResult<InprocIncoming> {
    if name.is_empty() {
        return Err(KeelsonError::InvalidEndpoint("inproc://".to_string()));
    }
    let (tx, rx) = flume::unbounded();
    match INPROC_REGISTRY.entry(name.to_string()) {
        dashmap::mapref::entry::Entry::Occupied(_) => {
            Err(KeelsonError::AddressInUse(name.to_string()))
        }
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(tx);
            Ok(rx)
        }
    }
}

/// Connect to a bound inproc name.
///
/// Creates a pipe pair, delivers one endpoint to the binder, and
/// returns the other. `send_hwm` bounds frames flowing toward the
/// binder, `recv_hwm` frames flowing back.
pub fn connect_inproc(name: &str, send_hwm: usize, recv_hwm: usize) -> KeelsonResult<Pipe> {
    let binder = INPROC_REGISTRY
        .get(name)
        .ok_or_else(|| KeelsonError::AddressNotFound(name.to_string()))?;
    let (local, remote) = pipe_pair(send_hwm, recv_hwm);
    binder
        .send(remote)
        .map_err(|_| KeelsonError::AddressNotFound(name.to_string()))?;
    Ok(local)
}

/// Release a bound inproc name. Existing pipes keep working; new
/// connects fail until the name is bound again.
pub fn unbind_inproc(name: &str) {
    INPROC_REGISTRY.remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Msg;
    use bytes::Bytes;

    #[test]
    fn bind_connect_exchange() {
        let incoming = bind_inproc("test-exchange").unwrap();
        let mut client = connect_inproc("test-exchange", 0, 0).unwrap();

        let mut server = incoming.recv().unwrap();

        client
            .write(Msg::from_bytes(Bytes::from_static(b"hello")))
            .unwrap();
        client.flush();
        assert_eq!(server.read().unwrap().data(), b"hello");

        server
            .write(Msg::from_bytes(Bytes::from_static(b"world")))
            .unwrap();
        server.flush();
        assert_eq!(client.read().unwrap().data(), b"world");

        unbind_inproc("test-exchange");
    }

    #[test]
    fn duplicate_bind_rejected() {
        let _incoming = bind_inproc("test-duplicate").unwrap();
        assert!(matches!(
            bind_inproc("test-duplicate"),
            Err(KeelsonError::AddressInUse(_))
        ));
        unbind_inproc("test-duplicate");
    }

    #[test]
    fn connect_before_bind_fails() {
        assert!(matches!(
            connect_inproc("test-unbound", 0, 0),
            Err(KeelsonError::AddressNotFound(_))
        ));
    }

    #[test]
    fn pipes_survive_unbind() {
        let incoming = bind_inproc("test-survive").unwrap();
        let mut client = connect_inproc("test-survive", 0, 0).unwrap();
        let mut server = incoming.recv().unwrap();
        unbind_inproc("test-survive");

        client
            .write(Msg::from_bytes(Bytes::from_static(b"still here")))
            .unwrap();
        client.flush();
        assert_eq!(server.read().unwrap().data(), b"still here");
    }
}
