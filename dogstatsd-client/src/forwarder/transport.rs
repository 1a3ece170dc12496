use std::{
    io::{self, Write as _},
    net::{Ipv4Addr, UdpSocket},
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::net::{UnixDatagram, UnixStream};

use parking_lot::Mutex;
use tracing::debug;

use super::RemoteAddr;

/// A destination for payloads.
///
/// Each call to `send` writes exactly one payload. Implementations must be safe to call from several sender workers
/// at once.
pub trait Transport: Send + Sync {
    /// Sends a single payload, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// If the payload could not be written, an error is returned and the payload is considered dropped.
    fn send(&self, payload: &[u8]) -> io::Result<usize>;

    /// Returns a short identifier of the transport, used in logs.
    fn transport_id(&self) -> &'static str {
        "custom"
    }
}

enum Client {
    Udp(UdpSocket),

    #[cfg(unix)]
    Unixgram(UnixDatagram),

    #[cfg(unix)]
    Unix(UnixStream),
}

impl Client {
    fn connect(remote_addr: &RemoteAddr, write_timeout: Duration) -> io::Result<Self> {
        match remote_addr {
            RemoteAddr::Udp(addrs) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
                socket.connect(&addrs[..])?;
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Client::Udp(socket))
            }),

            #[cfg(unix)]
            RemoteAddr::Unixgram(path) => UnixDatagram::unbound().and_then(|socket| {
                socket.connect(path)?;
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Client::Unixgram(socket))
            }),

            #[cfg(unix)]
            RemoteAddr::Unix(path) => UnixStream::connect(path).and_then(|socket| {
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Client::Unix(socket))
            }),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Client::Udp(socket) => socket.send(buf),

            #[cfg(unix)]
            Client::Unixgram(socket) => socket.send(buf),

            // Stream sockets carry a little-endian length prefix ahead of each payload.
            #[cfg(unix)]
            Client::Unix(socket) => {
                let len = u32::try_from(buf.len())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large for length prefix"))?;
                socket.write_all(&len.to_le_bytes())?;
                socket.write_all(buf)?;
                Ok(buf.len())
            }
        }
    }
}

enum ClientState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Transport is currently disconnected.
    Disconnected,

    // Transport is connected and ready to send payloads.
    Ready(Client),
}

impl ClientState {
    fn try_send(&mut self, remote_addr: &RemoteAddr, write_timeout: Duration, payload: &[u8]) -> io::Result<usize> {
        loop {
            let old_state = std::mem::replace(self, ClientState::Inconsistent);
            match old_state {
                ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ClientState::Disconnected => match Client::connect(remote_addr, write_timeout) {
                    Ok(client) => {
                        debug!(transport = remote_addr.transport_id(), "Connected to remote address.");
                        *self = ClientState::Ready(client);
                    }
                    Err(e) => {
                        *self = ClientState::Disconnected;
                        return Err(e);
                    }
                },
                ClientState::Ready(mut client) => {
                    let result = client.send(payload);
                    if result.is_ok() {
                        *self = ClientState::Ready(client);
                    } else {
                        *self = ClientState::Disconnected;
                    }

                    return result;
                }
            };
        }
    }
}

/// A socket-based transport.
///
/// The socket is connected lazily on the first send. If a send fails, the socket is dropped and a new one is
/// connected on the next send, so a restarted agent is picked up without intervention.
pub struct SocketTransport {
    remote_addr: RemoteAddr,
    write_timeout: Duration,
    state: Mutex<ClientState>,
}

impl SocketTransport {
    pub(crate) fn new(remote_addr: RemoteAddr, write_timeout: Duration) -> Self {
        Self { remote_addr, write_timeout, state: Mutex::new(ClientState::Disconnected) }
    }
}

impl Transport for SocketTransport {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.state.lock().try_send(&self.remote_addr, self.write_timeout, payload)
    }

    fn transport_id(&self) -> &'static str {
        self.remote_addr.transport_id()
    }
}
