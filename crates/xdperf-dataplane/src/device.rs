//! Network device lookups through sysfs.

use std::io;
use std::path::Path;

const SYSFS_NET: &str = "/sys/class/net";

/// Parse `aa:bb:cc:dd:ee:ff`.
pub fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.trim().split(':');
    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

/// Hardware address of `device`.
pub fn mac_address(device: &str) -> io::Result<[u8; 6]> {
    mac_address_in(Path::new(SYSFS_NET), device)
}

fn mac_address_in(root: &Path, device: &str) -> io::Result<[u8; 6]> {
    let path = root.join(device).join("address");
    let text = std::fs::read_to_string(&path)?;
    parse_mac(&text).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: not a MAC address: {:?}", path.display(), text.trim()),
        )
    })
}
