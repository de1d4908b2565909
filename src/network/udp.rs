//! Multicast UDP socket setup and teardown

use local_ip_address::list_afinet_netifas;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, UdpSocket};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Create a UDP socket bound to the wildcard address on the configured port
/// and joined to the multicast group.
///
/// Address reuse is enabled so other receivers on the same host can listen
/// to the same group. A failed group join is logged and the socket is still
/// returned: it keeps receiving datagrams sent to the port directly.
pub fn create_multicast_socket(config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let interface = resolve_interface(&config.interface)?;

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::SocketFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::SocketFailed(e.to_string()))?;

    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::warn!("Failed to set receive buffer size to {}: {}", size, e);
        }
    }

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    let socket: UdpSocket = socket.into();

    match join_group(&socket, config.multicast_group, interface) {
        Ok(()) => tracing::info!(
            "Joined multicast group {} on interface {} ({})",
            config.multicast_group,
            config.interface,
            interface
        ),
        Err(e) => tracing::warn!("{}", e),
    }

    Ok(socket)
}

/// Address of the join interface: `interface` itself when it is an IPv4
/// address, otherwise the IPv4 address of the interface with that name
pub fn resolve_interface(interface: &str) -> Result<Ipv4Addr, NetworkError> {
    let interface = interface.trim();
    if let Ok(addr) = interface.parse::<Ipv4Addr>() {
        return Ok(addr);
    }

    let interfaces = list_afinet_netifas()
        .map_err(|e| NetworkError::InterfaceNotFound(format!("{} ({})", interface, e)))?;
    interfaces
        .into_iter()
        .find_map(|(name, addr)| match addr {
            IpAddr::V4(addr) if name == interface => Some(addr),
            _ => None,
        })
        .ok_or_else(|| NetworkError::InterfaceNotFound(interface.to_string()))
}

fn join_group(
    socket: &UdpSocket,
    group: Ipv4Addr,
    interface: Ipv4Addr,
) -> Result<(), NetworkError> {
    socket
        .join_multicast_v4(&group, &interface)
        .map_err(|e| NetworkError::JoinFailed {
            group: group.to_string(),
            reason: e.to_string(),
        })
}

/// Unblock a thread waiting in `recv` on `socket`.
///
/// Shuts the socket down and sends an empty datagram to its port over
/// loopback. Either one wakes the receiver, depending on platform; the empty
/// datagram is shorter than a header and discarded by any receiver.
pub fn wake(socket: &UdpSocket) {
    if let Err(e) = SockRef::from(socket).shutdown(Shutdown::Both) {
        tracing::trace!("Socket shutdown: {}", e);
    }

    let port = match socket.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            tracing::debug!("No local address to wake: {}", e);
            return;
        }
    };

    let result = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|waker| waker.send_to(&[], (Ipv4Addr::LOCALHOST, port)));
    if let Err(e) = result {
        tracing::debug!("Failed to send wake datagram: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn ephemeral_config() -> NetworkConfig {
        NetworkConfig {
            port: 0,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_socket_binds_wildcard() {
        let socket = create_multicast_socket(&ephemeral_config()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_receives_loopback_datagrams() {
        let socket = create_multicast_socket(&ephemeral_config()).unwrap();
        let port = socket.local_addr().unwrap().port();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender
            .send_to(&[129, 16, 2, 3, 0, 1, 2], (Ipv4Addr::LOCALHOST, port))
            .unwrap();

        let mut buf = [0u8; 64];
        let len = socket.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[129, 16, 2, 3, 0, 1, 2]);
    }

    #[test]
    fn test_interface_by_address() {
        assert_eq!(resolve_interface("0.0.0.0").unwrap(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            resolve_interface(" 192.168.1.20 ").unwrap(),
            Ipv4Addr::new(192, 168, 1, 20)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_interface_by_name() {
        assert_eq!(resolve_interface("lo").unwrap(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_unknown_interface_fails_before_binding() {
        let config = NetworkConfig {
            interface: "no-such-nic0".to_string(),
            ..ephemeral_config()
        };
        assert!(matches!(
            create_multicast_socket(&config),
            Err(NetworkError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn test_wake_unblocks_receive() {
        let socket = create_multicast_socket(&ephemeral_config()).unwrap();
        let waker = socket.try_clone().unwrap();

        let receiver = thread::spawn(move || {
            let mut buf = [0u8; 64];
            // Either an empty datagram or an error, but it must return
            let _ = socket.recv(&mut buf);
        });

        thread::sleep(Duration::from_millis(50));
        wake(&waker);
        receiver.join().unwrap();
    }
}
