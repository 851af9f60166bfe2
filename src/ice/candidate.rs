/**
 * ICE candidate value object, plus the priority and foundation algorithms
 * See RFC 5245 Sections 4.1.1.3 and 4.1.2
 * https://datatracker.ietf.org/doc/html/rfc5245#section-4.1.2
 */
use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::net::LocalSocket;
use crate::stun::AddressFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceProtocol {
    Udp,
    Tcp,
}

impl IceProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            IceProtocol::Udp => "udp",
            IceProtocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for IceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpType {
    Active,
    Passive,
    So,
}

/// Transport between a client and its TURN server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayProtocol {
    Udp,
    Tcp,
    Tls,
}

impl RelayProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayProtocol::Udp => "udp",
            RelayProtocol::Tcp => "tcp",
            RelayProtocol::Tls => "tls",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceComponent {
    #[default]
    Rtp,
    Rtcp,
}

impl IceComponent {
    /// Component id used in the priority formula.
    pub fn id(&self) -> u32 {
        match self {
            IceComponent::Rtp => 1,
            IceComponent::Rtcp => 2,
        }
    }
}

/**
 * Type preference per RFC 5245 4.1.2.2, with TCP candidates placed below
 * their UDP counterparts. Relay candidates are ranked by the client to
 * server transport when one is given.
 */
pub fn type_preference(
    candidate_type: CandidateType,
    protocol: IceProtocol,
    relay_protocol: Option<RelayProtocol>,
) -> u32 {
    match (candidate_type, protocol) {
        (CandidateType::Host, IceProtocol::Udp) => 126,
        (CandidateType::Host, IceProtocol::Tcp) => 90,
        (CandidateType::Prflx, IceProtocol::Udp) => 110,
        (CandidateType::Prflx, IceProtocol::Tcp) => 80,
        (CandidateType::Srflx, _) => 100,
        (CandidateType::Relay, _) => {
            let transport = relay_protocol.unwrap_or(match protocol {
                IceProtocol::Udp => RelayProtocol::Udp,
                IceProtocol::Tcp => RelayProtocol::Tcp,
            });
            match transport {
                RelayProtocol::Udp => 2,
                RelayProtocol::Tcp => 1,
                RelayProtocol::Tls => 0,
            }
        }
    }
}

/**
 * Local preference of an address family. No RFC 3484 ranking of multiple
 * addresses is done, every address of a family gets the same value.
 */
pub fn local_preference(family: AddressFamily) -> u32 {
    match family {
        AddressFamily::IPv4 => 30,
        AddressFamily::IPv6 => 40,
    }
}

/**
 * priority = (2^24)*(type preference) + (2^8)*(local preference) + (256 - component ID)
 */
pub fn priority(
    candidate_type: CandidateType,
    protocol: IceProtocol,
    local_preference: u32,
    component: IceComponent,
    relay_protocol: Option<RelayProtocol>,
) -> u32 {
    (type_preference(candidate_type, protocol, relay_protocol) << 24)
        + ((local_preference << 8) & 0x00ff_ffff)
        + (256 - component.id())
}

/**
 * CRC-32 over type, base address, protocol and relay protocol. Candidates
 * sharing all four share a foundation.
 */
pub fn foundation(
    ip: &str,
    candidate_type: CandidateType,
    protocol: IceProtocol,
    relay_protocol: Option<RelayProtocol>,
) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(candidate_type.as_str().as_bytes());
    hasher.update(ip.as_bytes());
    hasher.update(protocol.as_str().as_bytes());
    hasher.update(relay_protocol.map(|p| p.as_str()).unwrap_or("").as_bytes());
    hasher.finalize()
}

/**
 * A local transport address offered to the remote peer.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub ip: String,
    pub port: u16,
    pub priority: u32,
    pub protocol: IceProtocol,
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<TcpType>,
}

impl IceCandidate {
    /**
     * Build a candidate for `addr`, computing priority and foundation.
     *
     * @param base The address the foundation is derived from, the local
     *             socket address (same as `addr` for host candidates)
     */
    pub fn new(
        candidate_type: CandidateType,
        protocol: IceProtocol,
        addr: SocketAddr,
        base: SocketAddr,
        component: IceComponent,
        tcp_type: Option<TcpType>,
    ) -> Self {
        let local_pref = local_preference(AddressFamily::of(&addr.ip()));
        let base_ip = base.ip().to_string();
        Self {
            foundation: foundation(&base_ip, candidate_type, protocol, None).to_string(),
            ip: addr.ip().to_string(),
            port: addr.port(),
            priority: priority(candidate_type, protocol, local_pref, component, None),
            protocol,
            candidate_type,
            related_address: None,
            related_port: None,
            tcp_type,
        }
    }

    pub fn with_related(mut self, related: SocketAddr) -> Self {
        self.related_address = Some(related.ip().to_string());
        self.related_port = Some(related.port());
        self
    }

    /**
     * Host candidate for a bound socket, using the address the OS assigned.
     * Listening TCP sockets are passive candidates, connected ones active.
     */
    pub fn from_local_socket(socket: &LocalSocket, component: IceComponent) -> std::io::Result<Self> {
        let addr = socket.local_addr()?;
        Ok(Self::new(
            CandidateType::Host,
            socket.protocol(),
            addr,
            addr,
            component,
            socket.tcp_type(),
        ))
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}:{} prio {}",
            self.foundation, self.protocol, self.candidate_type, self.ip, self.port, self.priority
        )?;
        if let (Some(addr), Some(port)) = (&self.related_address, self.related_port) {
            write!(f, " related {addr}:{port}")?;
        }
        if let Some(tcp_type) = self.tcp_type {
            write!(f, " tcptype {tcp_type:?}")?;
        }
        Ok(())
    }
}
