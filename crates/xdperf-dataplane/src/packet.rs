//! Seed frame handed to the transmit program.
//!
//! The kernel program overwrites it from the per-CPU template table, so
//! only its size and framing matter: Ethernet + IPv4 + UDP, padded with
//! `'x'` to a full 1500-byte frame.

/// Total seed frame length
pub const SAMPLE_FRAME_LEN: usize = 1500;

const ETH_LEN: usize = 14;
const IPV4_LEN: usize = 20;
const UDP_LEN: usize = 8;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;
const LOOPBACK: [u8; 4] = [127, 0, 0, 1];
const SRC_PORT: u16 = 8080;
const DST_PORT: u16 = 8081;
const TTL: u8 = 64;

/// RFC 1071 one's complement sum over `data`.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|c| u32::from(u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or(0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build the seed frame with `src_mac` as source and an all-zero destination.
pub fn sample_frame(src_mac: [u8; 6]) -> Vec<u8> {
    let payload_len = SAMPLE_FRAME_LEN - ETH_LEN - IPV4_LEN - UDP_LEN;
    let udp_len = (UDP_LEN + payload_len) as u16;
    let ip_len = (IPV4_LEN + UDP_LEN + payload_len) as u16;

    let mut frame = Vec::with_capacity(SAMPLE_FRAME_LEN);

    frame.extend_from_slice(&[0u8; 6]);
    frame.extend_from_slice(&src_mac);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    let mut ip = [0u8; IPV4_LEN];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&ip_len.to_be_bytes());
    ip[8] = TTL;
    ip[9] = IPPROTO_UDP;
    ip[12..16].copy_from_slice(&LOOPBACK);
    ip[16..20].copy_from_slice(&LOOPBACK);
    let ip_csum = checksum(&ip);
    ip[10..12].copy_from_slice(&ip_csum.to_be_bytes());
    frame.extend_from_slice(&ip);

    let mut udp = Vec::with_capacity(udp_len as usize);
    udp.extend_from_slice(&SRC_PORT.to_be_bytes());
    udp.extend_from_slice(&DST_PORT.to_be_bytes());
    udp.extend_from_slice(&udp_len.to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.resize(udp_len as usize, b'x');

    let mut pseudo = Vec::with_capacity(12 + udp.len());
    pseudo.extend_from_slice(&LOOPBACK);
    pseudo.extend_from_slice(&LOOPBACK);
    pseudo.extend_from_slice(&[0, IPPROTO_UDP]);
    pseudo.extend_from_slice(&udp_len.to_be_bytes());
    pseudo.extend_from_slice(&udp);
    let udp_csum = match checksum(&pseudo) {
        0 => 0xffff,
        c => c,
    };
    udp[6..8].copy_from_slice(&udp_csum.to_be_bytes());
    frame.extend_from_slice(&udp);

    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x02, 0x42, 0xac, 0x11, 0x00, 0x02];

    #[test]
    fn test_frame_layout() {
        let frame = sample_frame(MAC);
        assert_eq!(frame.len(), SAMPLE_FRAME_LEN);
        assert_eq!(&frame[0..6], &[0u8; 6]);
        assert_eq!(&frame[6..12], &MAC);
        assert_eq!(&frame[12..14], &[0x08, 0x00]);
        assert_eq!(frame[14], 0x45);
        assert_eq!(u16::from_be_bytes([frame[16], frame[17]]), 1486);
        assert_eq!(frame[22], 64);
        assert_eq!(frame[23], 17);
        assert_eq!(u16::from_be_bytes([frame[34], frame[35]]), 8080);
        assert_eq!(u16::from_be_bytes([frame[36], frame[37]]), 8081);
        assert_eq!(u16::from_be_bytes([frame[38], frame[39]]), 1466);
        assert!(frame[42..].iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_ipv4_checksum_verifies() {
        let frame = sample_frame(MAC);
        assert_eq!(checksum(&frame[14..34]), 0);
    }

    #[test]
    fn test_udp_checksum_verifies() {
        let frame = sample_frame(MAC);
        let udp = &frame[34..];
        let mut pseudo = Vec::new();
        pseudo.extend_from_slice(&frame[26..34]);
        pseudo.extend_from_slice(&[0, 17]);
        pseudo.extend_from_slice(&(udp.len() as u16).to_be_bytes());
        pseudo.extend_from_slice(udp);
        assert_eq!(checksum(&pseudo), 0);
    }
}
