//! CRC16/CCITT as used by the console for every binary frame.
//!
//! Polynomial 0x1021, seed zero, MSB first. The CRC travels high byte first,
//! so running the CRC over a payload followed by its own CRC yields zero.

use ::crc::{Crc, CRC_16_XMODEM};

static CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute the CRC of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// The CRC of `data` in wire order.
pub fn crc_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_be_bytes()
}

/// Append the wire-order CRC of the current contents.
pub fn append_crc(data: &mut Vec<u8>) {
    let crc = crc_bytes(data);
    data.extend_from_slice(&crc);
}

/// Check a buffer that ends with its own two CRC bytes.
pub fn verify(data: &[u8]) -> bool {
    data.len() >= 2 && crc16(data) == 0
}
