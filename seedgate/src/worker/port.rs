//! Local port allocation for worker containers.

use std::io;
use std::net::TcpListener;

/// Picks a free local TCP port.
///
/// Binds `localhost:0`, reads the OS-assigned port, and releases the socket.
/// Another process may reclaim the port before the container binds it; that
/// race is accepted and surfaces as a warm-up failure on the session.
pub fn free_port() -> io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_nonzero() {
        let port = free_port().unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn test_free_port_is_bindable() {
        let port = free_port().unwrap();
        // The port was released, so binding it again should succeed.
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }
}
