//! pcap-ng block and option constants.
//!
//! All multi-byte integers in the emitted stream are little-endian; every
//! block and option body is padded to a 32-bit boundary, and every block
//! repeats its total length at the tail so readers can iterate backwards.

pub const SHB_BLOCK_TYPE: u32 = 0x0A0D_0D0A;
pub const SHB_ENDIAN_MAGIC: u32 = 0x1A2B_3C4D;
pub const SHB_VERSION_MAJOR: u16 = 1;
pub const SHB_VERSION_MINOR: u16 = 0;

pub const IDB_BLOCK_TYPE: u32 = 0x0000_0001;
pub const EPB_BLOCK_TYPE: u32 = 0x0000_0006;

pub const SNAPLEN: u32 = 65535;

pub const OPT_ENDOFOPT: u16 = 0;

pub const OPT_SHB_HW: u16 = 2;
pub const OPT_SHB_OS: u16 = 3;
pub const OPT_SHB_USERAPPL: u16 = 4;

pub const OPT_IDB_IFNAME: u16 = 2;
pub const OPT_IDB_IFDESC: u16 = 3;

pub const OPT_EPB_HASH: u16 = 4;
/// Hash-option algorithm byte for CRC32.
pub const OPT_EPB_HASH_CRC32: u8 = 2;
pub const OPT_EPB_PACKETID: u16 = 5;

/// Custom option codes carrying a Private Enterprise Number.
pub const OPT_CUSTOM_UTF8: u16 = 2988;
pub const OPT_CUSTOM_BINARY: u16 = 2989;

/// IANA PEN identifying our custom option payloads.
pub const WAVETAP_IANA_PEN: u32 = 55922;

/// Inner magic + version for the JSON custom option, so unknown readers
/// skip it gracefully.
pub const JSON_MAGIC: u32 = 0xCBCB_CBCB;
pub const JSON_VERSION: u16 = 1;

/// Inner magic + version for the binary GPS custom option.
pub const GPS_MAGIC: u32 = 0x00CB_CBFF;
pub const GPS_VERSION: u16 = 1;

pub const GPS_FLAG_LON: u32 = 0x0000_0002;
pub const GPS_FLAG_LAT: u32 = 0x0000_0004;
pub const GPS_FLAG_ALT: u32 = 0x0000_0008;

/// Round a length up to the next 32-bit boundary.
pub fn pad_to_32bit(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::pad_to_32bit;

    #[test]
    fn padding_rounds_up() {
        assert_eq!(pad_to_32bit(0), 0);
        assert_eq!(pad_to_32bit(1), 4);
        assert_eq!(pad_to_32bit(4), 4);
        assert_eq!(pad_to_32bit(5), 8);
    }
}
