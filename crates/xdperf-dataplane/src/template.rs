//! Host-side packet templates and the kernel structs they are copied into.

/// Size of the data area in one kernel override slot.
pub const MAX_TEMPLATE_SIZE: usize = 2048;

/// A generated packet: raw bytes plus the length the kernel should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTemplate {
    pub data: Vec<u8>,
    pub length: u16,
}

impl PacketTemplate {
    pub fn new(data: Vec<u8>, length: u16) -> Self {
        Self { data, length }
    }
}

/// `struct pkt_template` in the kernel program.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PktTemplate {
    pub len: u32,
    pub data: [u8; MAX_TEMPLATE_SIZE],
}

impl Default for PktTemplate {
    fn default() -> Self {
        Self {
            len: 0,
            data: [0; MAX_TEMPLATE_SIZE],
        }
    }
}

impl std::fmt::Debug for PktTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = (self.len as usize).min(16);
        f.debug_struct("PktTemplate")
            .field("len", &self.len)
            .field("head", &&self.data[..shown])
            .finish()
    }
}

// SAFETY: plain C struct, no padding (u32 followed by a byte array), any bit
// pattern is valid.
unsafe impl aya::Pod for PktTemplate {}

/// `struct datarec` in the kernel program: per-CPU receive counters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataRec {
    pub rx_packets: u64,
    pub rx_bytes: u64,
}

// SAFETY: two u64s, C layout.
unsafe impl aya::Pod for DataRec {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_layouts() {
        assert_eq!(std::mem::size_of::<PktTemplate>(), 4 + MAX_TEMPLATE_SIZE);
        assert_eq!(std::mem::size_of::<DataRec>(), 16);
    }
}
