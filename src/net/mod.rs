/**
 * Network related functionality: interface enumeration, socket setup for
 * host candidates, and a single STUN request/response exchange over UDP.
 *
 */
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{lookup_host, TcpListener, TcpStream, UdpSocket};
use tokio::time::{timeout, Duration, Instant};

use crate::ice::candidate::{IceProtocol, TcpType};
use crate::stun::{self, StunPacket};

/**
 * A socket held open on behalf of a local candidate. Ownership moves to
 * whoever takes it from the gatherer, dropping it closes the socket.
 */
#[derive(Debug)]
pub enum LocalSocket {
    Udp(UdpSocket),
    TcpListener(TcpListener),
    TcpStream(TcpStream),
}

impl LocalSocket {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            LocalSocket::Udp(socket) => socket.local_addr(),
            LocalSocket::TcpListener(listener) => listener.local_addr(),
            LocalSocket::TcpStream(stream) => stream.local_addr(),
        }
    }

    pub fn protocol(&self) -> IceProtocol {
        match self {
            LocalSocket::Udp(_) => IceProtocol::Udp,
            _ => IceProtocol::Tcp,
        }
    }

    pub fn tcp_type(&self) -> Option<TcpType> {
        match self {
            LocalSocket::Udp(_) => None,
            LocalSocket::TcpListener(_) => Some(TcpType::Passive),
            LocalSocket::TcpStream(_) => Some(TcpType::Active),
        }
    }
}

/**
 * Addresses of the local network interfaces, loopback excluded.
 */
pub fn local_addresses() -> io::Result<Vec<IpAddr>> {
    let addresses = get_if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| iface.ip())
        .collect();
    Ok(addresses)
}

/**
 * Errors that only mean "this address cannot carry a candidate", such as
 * a link-local IPv6 address without a scope id.
 */
fn is_benign_bind_error(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::InvalidInput | ErrorKind::AddrNotAvailable)
}

/**
 * Bind a UDP socket to an OS chosen port on `ip`.
 *
 * @return Ok(None) when the address cannot be bound for a benign reason
 */
pub async fn bind_udp(ip: IpAddr) -> io::Result<Option<UdpSocket>> {
    match UdpSocket::bind(SocketAddr::new(ip, 0)).await {
        Ok(socket) => Ok(Some(socket)),
        Err(e) if is_benign_bind_error(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/**
 * Start a TCP listener on an OS chosen port on `ip`.
 *
 * @return Ok(None) when the address cannot be bound for a benign reason
 */
pub async fn listen_tcp(ip: IpAddr) -> io::Result<Option<TcpListener>> {
    match TcpListener::bind(SocketAddr::new(ip, 0)).await {
        Ok(listener) => Ok(Some(listener)),
        Err(e) if is_benign_bind_error(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/**
 * Resolve a server host name, or parse a literal address.
 */
pub async fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }
    lookup_host((host, port)).await.ok()?.next()
}

/**
 * UDP socket on the wildcard address of the server's family, connected to
 * the server so only its datagrams are received.
 */
pub async fn connect_udp(server: SocketAddr) -> io::Result<UdpSocket> {
    let wildcard = match server {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind(SocketAddr::new(wildcard, 0)).await?;
    socket.connect(server).await?;
    Ok(socket)
}

/**
 * Send a STUN request and wait for the response carrying the same
 * transaction id. Datagrams that are not STUN, or belong to another
 * transaction, are ignored.
 *
 * @param socket A connected UDP socket
 * @param request The encoded request
 * @param transaction_id Transaction id of the request, magic cookie included
 * @param wait How long to wait for the response
 * @return The decoded response, or None on timeout
 */
pub async fn stun_exchange(
    socket: &UdpSocket,
    request: &[u8],
    transaction_id: &[u32; 4],
    wait: Duration,
) -> io::Result<Option<StunPacket>> {
    let deadline = Instant::now() + wait;
    let mut buffer = [0u8; stun::PACKET_SIZE];

    socket.send(request).await?;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let received = match timeout(remaining, socket.recv(&mut buffer)).await {
            Ok(received) => received,
            Err(_) => return Ok(None),
        };
        let n = match received {
            Ok(n) => n,
            // ICMP port unreachable surfaces as a refused connection on a
            // connected UDP socket, the server is simply not there
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => return Ok(None),
            Err(e) => return Err(e),
        };
        if let Some(packet) = stun::decode(&buffer[..n]) {
            if packet.raw_transaction_id() == transaction_id {
                return Ok(Some(packet));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::StunMessageType;

    #[tokio::test]
    async fn test_bind_loopback() {
        let udp = bind_udp(IpAddr::V4(Ipv4Addr::LOCALHOST)).await.unwrap().unwrap();
        let socket = LocalSocket::Udp(udp);
        assert_eq!(socket.protocol(), IceProtocol::Udp);
        assert_eq!(socket.tcp_type(), None);
        assert_ne!(socket.local_addr().unwrap().port(), 0);

        let tcp = listen_tcp(IpAddr::V4(Ipv4Addr::LOCALHOST)).await.unwrap().unwrap();
        let socket = LocalSocket::TcpListener(tcp);
        assert_eq!(socket.protocol(), IceProtocol::Tcp);
        assert_eq!(socket.tcp_type(), Some(TcpType::Passive));
    }

    #[tokio::test]
    async fn test_bind_unavailable_address_is_benign() {
        // TEST-NET-1 is never assigned to a local interface
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(bind_udp(ip).await.unwrap().is_none());
        assert!(listen_tcp(ip).await.unwrap().is_none());
    }

    #[test]
    fn test_local_addresses_skip_loopback() {
        let addresses = local_addresses().unwrap();
        assert!(addresses.iter().all(|ip| !ip.is_loopback()));
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        assert_eq!(
            resolve("127.0.0.1", 3478).await,
            Some("127.0.0.1:3478".parse().unwrap())
        );
        assert_eq!(resolve("[::1]", 5349).await, Some("[::1]:5349".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_stun_exchange_matches_transaction() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buffer = [0u8; 1280];
            let (n, peer) = server.recv_from(&mut buffer).await.unwrap();
            let request = stun::decode(&buffer[..n]).unwrap();

            // unrelated transaction first, then garbage, then the answer
            let other = StunPacket::new(StunMessageType::BindingResponse, true);
            server.send_to(&other.encode(None, false).unwrap(), peer).await.unwrap();
            server.send_to(b"not stun", peer).await.unwrap();
            let response = StunPacket::with_transaction_id(
                StunMessageType::BindingResponse,
                *request.raw_transaction_id(),
            );
            server.send_to(&response.encode(None, false).unwrap(), peer).await.unwrap();
        });

        let socket = connect_udp(server_addr).await.unwrap();
        let request = StunPacket::new(StunMessageType::BindingRequest, true);
        let response = stun_exchange(
            &socket,
            &request.encode(None, false).unwrap(),
            request.raw_transaction_id(),
            Duration::from_secs(2),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.message_type, StunMessageType::BindingResponse);
        assert_eq!(response.raw_transaction_id(), request.raw_transaction_id());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_stun_exchange_timeout() {
        // a bound socket that never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = connect_udp(silent.local_addr().unwrap()).await.unwrap();
        let request = StunPacket::new(StunMessageType::BindingRequest, true);
        let response = stun_exchange(
            &socket,
            &request.encode(None, false).unwrap(),
            request.raw_transaction_id(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        assert!(response.is_none());
    }
}
