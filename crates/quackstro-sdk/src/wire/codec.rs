//! P2P message framing.
//!
//! Header layout (little-endian unless noted):
//!
//! | offset | size | field                           |
//! |--------|------|---------------------------------|
//! | 0      | 4    | network magic                   |
//! | 4      | 12   | command, ASCII, null-padded     |
//! | 16     | 4    | payload length                  |
//! | 20     | 4    | doubleSHA256(payload)[0..4]     |
//! | 24     | n    | payload                         |

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rand::Rng;

use crate::hashes::checksum4;
use crate::network::{user_agent, Network, PROTOCOL_VERSION, SERVICES};

pub const HEADER_LEN: usize = 24;
pub const COMMAND_LEN: usize = 12;
const NETADDR_LEN: usize = 26;

/// One candidate peer endpoint. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerInfo {
    pub ip: IpAddr,
    pub port: u16,
}

impl std::fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

/// Parsed message header. The checksum is carried but not verified here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: String,
    pub payload_len: u32,
    pub checksum: [u8; 4],
}

impl MessageHeader {
    /// Total wire size of header plus payload.
    pub fn message_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }
}

/// Frame a payload into a complete wire message.
pub fn encode_message(network: Network, command: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&network.magic().to_le_bytes());

    let mut cmd = [0u8; COMMAND_LEN];
    let bytes = command.as_bytes();
    debug_assert!(bytes.len() <= COMMAND_LEN);
    cmd[..bytes.len()].copy_from_slice(bytes);
    out.extend_from_slice(&cmd);

    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum4(payload));
    out.extend_from_slice(payload);
    out
}

/// Parse a header from the front of `bytes`.
///
/// Returns `None` when fewer than 24 bytes are available or the magic does
/// not match; the relay resyncs byte-by-byte on `None`. The checksum is NOT
/// validated here.
pub fn parse_header(network: Network, bytes: &[u8]) -> Option<MessageHeader> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != network.magic() {
        return None;
    }
    let command_bytes = &bytes[4..16];
    let end = command_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(COMMAND_LEN);
    let command = String::from_utf8_lossy(&command_bytes[..end]).into_owned();
    let payload_len = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&bytes[20..24]);
    Some(MessageHeader {
        command,
        payload_len,
        checksum,
    })
}

/// True iff the header's checksum matches the payload.
pub fn verify_checksum(header: &MessageHeader, payload: &[u8]) -> bool {
    checksum4(payload) == header.checksum
}

/// CompactSize encoding, always minimal-length.
pub fn encode_varint(n: u64) -> Vec<u8> {
    if n < 0xFD {
        vec![n as u8]
    } else if n <= 0xFFFF {
        let mut out = vec![0xFD];
        out.extend_from_slice(&(n as u16).to_le_bytes());
        out
    } else if n <= 0xFFFF_FFFF {
        let mut out = vec![0xFE];
        out.extend_from_slice(&(n as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xFF];
        out.extend_from_slice(&n.to_le_bytes());
        out
    }
}

/// Decode a CompactSize from the front of `bytes`; returns the value and the
/// number of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    match *bytes.first()? {
        0xFD => {
            let v = u16::from_le_bytes(bytes.get(1..3)?.try_into().unwrap());
            Some((v as u64, 3))
        }
        0xFE => {
            let v = u32::from_le_bytes(bytes.get(1..5)?.try_into().unwrap());
            Some((v as u64, 5))
        }
        0xFF => {
            let v = u64::from_le_bytes(bytes.get(1..9)?.try_into().unwrap());
            Some((v, 9))
        }
        b => Some((b as u64, 1)),
    }
}

/// Varstring: CompactSize length prefix followed by UTF-8 bytes.
pub fn encode_varstring(s: &str) -> Vec<u8> {
    let mut out = encode_varint(s.len() as u64);
    out.extend_from_slice(s.as_bytes());
    out
}

/// Decode a varstring from the front of `bytes`.
pub fn decode_varstring(bytes: &[u8]) -> Option<(String, usize)> {
    let (len, consumed) = decode_varint(bytes)?;
    let len = len as usize;
    let data = bytes.get(consumed..consumed + len)?;
    Some((
        String::from_utf8_lossy(data).into_owned(),
        consumed + len,
    ))
}

/// 26-byte network address (no timestamp): `services || IPv6 || port_be`.
/// IPv4 addresses are embedded as `::ffff:a.b.c.d`.
pub fn encode_netaddr(services: u64, ip: IpAddr, port: u16) -> [u8; NETADDR_LEN] {
    let mut out = [0u8; NETADDR_LEN];
    out[0..8].copy_from_slice(&services.to_le_bytes());
    let v6: Ipv6Addr = match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    out[8..24].copy_from_slice(&v6.octets());
    out[24..26].copy_from_slice(&port.to_be_bytes());
    out
}

/// Build the `version` payload for a handshake with `peer`.
pub fn build_version_payload(peer: &PeerInfo, timestamp_secs: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(86 + user_agent().len());
    out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    out.extend_from_slice(&SERVICES.to_le_bytes());
    out.extend_from_slice(&timestamp_secs.to_le_bytes());
    out.extend_from_slice(&encode_netaddr(SERVICES, peer.ip, peer.port));
    out.extend_from_slice(&encode_netaddr(
        0,
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        0,
    ));
    let nonce: u64 = rand::thread_rng().gen();
    out.extend_from_slice(&nonce.to_le_bytes());
    out.extend_from_slice(&encode_varstring(&user_agent()));
    out.extend_from_slice(&0i32.to_le_bytes()); // start_height
    out.push(1); // relay
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(252), vec![0xFC]);
        assert_eq!(encode_varint(253), vec![0xFD, 0xFD, 0x00]);
        assert_eq!(encode_varint(65535), vec![0xFD, 0xFF, 0xFF]);
        assert_eq!(encode_varint(65536), vec![0xFE, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(
            encode_varint(0x1_0000_0000),
            vec![0xFF, 0, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn varint_roundtrip_is_minimal() {
        for n in [
            0u64,
            1,
            0xFC,
            0xFD,
            0xFFFF,
            0x1_0000,
            0xFFFF_FFFF,
            0x1_0000_0000,
            u64::MAX,
        ] {
            let encoded = encode_varint(n);
            let expected_len = match n {
                0..=0xFC => 1,
                0xFD..=0xFFFF => 3,
                0x1_0000..=0xFFFF_FFFF => 5,
                _ => 9,
            };
            assert_eq!(encoded.len(), expected_len, "non-minimal encoding for {n}");
            assert_eq!(decode_varint(&encoded), Some((n, expected_len)));
        }
    }

    #[test]
    fn varstring_roundtrip() {
        let ua = "/OpenClawDoge:0.1.0/";
        let encoded = encode_varstring(ua);
        assert_eq!(encoded[0] as usize, ua.len());
        let (decoded, consumed) = decode_varstring(&encoded).unwrap();
        assert_eq!(decoded, ua);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn netaddr_embeds_ipv4_as_mapped_v6() {
        let addr = encode_netaddr(1, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 22556);
        assert_eq!(&addr[0..8], &1u64.to_le_bytes());
        assert_eq!(&addr[8..18], &[0u8; 10]);
        assert_eq!(&addr[18..20], &[0xFF, 0xFF]);
        assert_eq!(&addr[20..24], &[1, 2, 3, 4]);
        // Port is big-endian.
        assert_eq!(&addr[24..26], &22556u16.to_be_bytes());
    }

    #[test]
    fn version_message_framing() {
        // End-to-end: build a version message for 1.2.3.4:22556 on mainnet.
        let peer = PeerInfo {
            ip: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            port: 22556,
        };
        let payload = build_version_payload(&peer, 1_700_000_000);
        let msg = encode_message(Network::Mainnet, "version", &payload);

        assert_eq!(&msg[0..4], &[0xC0, 0xC0, 0xC0, 0xC0]);
        assert_eq!(&msg[4..11], b"version");
        assert_eq!(&msg[11..16], &[0u8; 5]);
        assert_eq!(
            u32::from_le_bytes(msg[16..20].try_into().unwrap()) as usize,
            payload.len()
        );
        assert_eq!(&msg[20..24], &checksum4(&payload));

        // Payload field order: version, services, timestamp.
        assert_eq!(
            i32::from_le_bytes(payload[0..4].try_into().unwrap()),
            PROTOCOL_VERSION
        );
        assert_eq!(
            u64::from_le_bytes(payload[4..12].try_into().unwrap()),
            SERVICES
        );
        assert_eq!(
            i64::from_le_bytes(payload[12..20].try_into().unwrap()),
            1_700_000_000
        );
        // Trailing relay flag.
        assert_eq!(*payload.last().unwrap(), 1);
    }

    #[test]
    fn header_roundtrip() {
        for (network, command, payload) in [
            (Network::Mainnet, "version", b"abc".to_vec()),
            (Network::Mainnet, "verack", Vec::new()),
            (Network::Testnet, "tx", vec![0xDE, 0xAD]),
            (Network::Mainnet, "reject", vec![7u8; 80]),
        ] {
            let msg = encode_message(network, command, &payload);
            let header = parse_header(network, &msg).unwrap();
            assert_eq!(header.command, command);
            assert_eq!(header.payload_len as usize, payload.len());
            assert_eq!(&msg[HEADER_LEN..], &payload[..]);
            assert!(verify_checksum(&header, &payload));
        }
    }

    #[test]
    fn parse_header_rejects_short_or_foreign() {
        let msg = encode_message(Network::Mainnet, "verack", &[]);
        assert!(parse_header(Network::Mainnet, &msg[..23]).is_none());
        // Testnet parser must refuse a mainnet frame.
        assert!(parse_header(Network::Testnet, &msg).is_none());
    }

    #[test]
    fn checksum_mismatch_detected() {
        let payload = b"payload".to_vec();
        let mut msg = encode_message(Network::Mainnet, "tx", &payload);
        msg[20] ^= 0xFF;
        let header = parse_header(Network::Mainnet, &msg).unwrap();
        assert!(!verify_checksum(&header, &payload));
    }
}
