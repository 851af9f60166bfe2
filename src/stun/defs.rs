use std::io::{Cursor, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::Serialize;

use super::MAGIC_COOKIE;

/**
 * STUN addresses may be ipv4 or ipv6, and each has a different storage requirement
 */
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

impl AddressFamily {
    /// Family byte as carried on the wire.
    pub fn wire_value(self) -> u8 {
        match self {
            AddressFamily::IPv4 => 0x01,
            AddressFamily::IPv6 => 0x02,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(AddressFamily::IPv4),
            0x02 => Some(AddressFamily::IPv6),
            _ => None,
        }
    }

    /// Length of the whole attribute value (reserved byte, family, port, address).
    pub fn value_length(self) -> u16 {
        match self {
            AddressFamily::IPv4 => 8,
            AddressFamily::IPv6 => 20,
        }
    }

    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::IPv4,
            IpAddr::V6(_) => AddressFamily::IPv6,
        }
    }
}

/**
 * Decoded value of MAPPED-ADDRESS, XOR-MAPPED-ADDRESS and the other
 * address attributes. XOR attributes are stored here in clear form.
 */
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StunAddress {
    pub family: AddressFamily,
    pub address: IpAddr,
    pub port: u16,
}

impl StunAddress {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            family: AddressFamily::of(&addr.ip()),
            address: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /**
     * Write the attribute value. When `xor` carries the transaction id the
     * port and address are obfuscated as XOR-MAPPED-ADDRESS requires.
     * The family byte always follows `address`.
     */
    pub fn write_to(
        &self,
        cursor: &mut Cursor<&mut [u8]>,
        xor: Option<&[u32; 4]>,
    ) -> std::io::Result<()> {
        let port = match xor {
            Some(_) => self.port ^ ((MAGIC_COOKIE >> 16) as u16),
            None => self.port,
        };
        cursor.write_all(&[0, AddressFamily::of(&self.address).wire_value()])?;
        cursor.write_all(&port.to_be_bytes())?;

        match self.address {
            IpAddr::V4(ip) => {
                let mut raw = u32::from_be_bytes(ip.octets());
                if xor.is_some() {
                    raw ^= MAGIC_COOKIE;
                }
                cursor.write_all(&raw.to_be_bytes())?;
            }
            IpAddr::V6(ip) => {
                for (i, chunk) in ip.octets().chunks(4).enumerate() {
                    let mut word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    if let Some(tid) = xor {
                        word ^= xor_word(tid, i);
                    }
                    cursor.write_all(&word.to_be_bytes())?;
                }
            }
        }
        Ok(())
    }

    /**
     * Parse an attribute value. Returns `None` when the family byte is
     * unknown or the value is too short for the family.
     */
    pub fn read_from(value: &[u8], xor: Option<&[u32; 4]>) -> Option<Self> {
        if value.len() < 4 {
            return None;
        }
        let family = AddressFamily::from_wire(value[1])?;
        if value.len() < family.value_length() as usize {
            return None;
        }

        let mut port = u16::from_be_bytes([value[2], value[3]]);
        if xor.is_some() {
            port ^= (MAGIC_COOKIE >> 16) as u16;
        }

        let address = match family {
            AddressFamily::IPv4 => {
                let mut raw = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
                if xor.is_some() {
                    raw ^= MAGIC_COOKIE;
                }
                IpAddr::V4(Ipv4Addr::from(raw))
            }
            AddressFamily::IPv6 => {
                let mut octets = [0u8; 16];
                for i in 0..4 {
                    let at = 4 + i * 4;
                    let mut word = u32::from_be_bytes([
                        value[at],
                        value[at + 1],
                        value[at + 2],
                        value[at + 3],
                    ]);
                    if let Some(tid) = xor {
                        word ^= xor_word(tid, i);
                    }
                    octets[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
                }
                IpAddr::V6(Ipv6Addr::from(octets))
            }
        };

        Some(Self {
            family,
            address,
            port,
        })
    }
}

// IPv6 addresses are XOR'd with the magic cookie followed by the 96-bit transaction id
fn xor_word(transaction_id: &[u32; 4], index: usize) -> u32 {
    if index == 0 {
        MAGIC_COOKIE
    } else {
        transaction_id[index]
    }
}
