//! WEP RC4 decryption for the decrypt chain stage.
//!
//! Keys are registered per BSSID.  For each privacy-flagged data frame whose
//! BSSID has a key, the decryptor runs RC4 over `IV(3) || key`, strips the
//! IV/key-index and ICV, verifies the ICV against a CRC32 of the plaintext,
//! and attaches the decrypted frame as the mangle component with the privacy
//! bit cleared.  Decryption failure is non-fatal: the key's failure counter
//! is bumped and the packet continues undecrypted.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::chain::PacketHandler;
use crate::dlt::DLT_IEEE802_11;
use crate::dot11::layout::{FC_FLAG_PROTECTED, WEPKEY_MAX};
use crate::packet::{DataChunk, MacAddr, Packet, PacketComponent};

#[derive(Debug, Error)]
pub enum WepKeyError {
    #[error("invalid WEP key length {0}; expected 5, 13 or 16 bytes")]
    BadLength(usize),
    #[error("malformed WEP key configuration {0:?}; expected BSSID,HEXKEY")]
    BadConfig(String),
}

struct WepKey {
    key: Vec<u8>,
    decrypted: u64,
    failed: u64,
}

/// Per-key usage counters, exposed for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WepKeyStats {
    pub decrypted: u64,
    pub failed: u64,
}

/// Decrypt-stage handler holding the BSSID to key map.
#[derive(Default)]
pub struct WepDecryptor {
    keys: Mutex<HashMap<MacAddr, WepKey>>,
}

impl WepDecryptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key for a BSSID, replacing any existing key.
    pub fn add_key(&self, bssid: MacAddr, key: &[u8]) -> Result<(), WepKeyError> {
        if !matches!(key.len(), 5 | 13 | 16) {
            return Err(WepKeyError::BadLength(key.len()));
        }

        self.keys.lock().unwrap().insert(
            bssid,
            WepKey {
                key: key.to_vec(),
                decrypted: 0,
                failed: 0,
            },
        );
        Ok(())
    }

    /// Register a key from a `BSSID,HEXKEY` configuration string.
    pub fn add_key_str(&self, config: &str) -> Result<(), WepKeyError> {
        let (bssid, hex) = config
            .split_once(',')
            .ok_or_else(|| WepKeyError::BadConfig(config.to_string()))?;

        let bssid: MacAddr = bssid
            .trim()
            .parse()
            .map_err(|_| WepKeyError::BadConfig(config.to_string()))?;

        let hex = hex.trim().replace(':', "");
        if hex.len() % 2 != 0 || hex.len() / 2 > WEPKEY_MAX {
            return Err(WepKeyError::BadConfig(config.to_string()));
        }

        let mut key = Vec::with_capacity(hex.len() / 2);
        for pair in hex.as_bytes().chunks(2) {
            let byte = u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16)
                .map_err(|_| WepKeyError::BadConfig(config.to_string()))?;
            key.push(byte);
        }

        self.add_key(bssid, &key)
    }

    pub fn key_stats(&self, bssid: &MacAddr) -> Option<WepKeyStats> {
        self.keys.lock().unwrap().get(bssid).map(|k| WepKeyStats {
            decrypted: k.decrypted,
            failed: k.failed,
        })
    }
}

/// RC4-decrypt a privacy-flagged 802.11 frame.  `header_offset` is the
/// offset of the IV; the result drops the 4-byte IV/key-index and the
/// 4-byte ICV and clears the privacy flag.  Returns `None` when the ICV
/// does not verify.
pub fn decrypt_wep(data: &[u8], header_offset: usize, key: &[u8]) -> Option<Vec<u8>> {
    // The frame must hold a real 802.11 header plus IV, one payload byte,
    // and the ICV.
    if header_offset < 2 || data.len() < header_offset || data.len() - header_offset <= 8 {
        return None;
    }

    // RC4 key: 3-byte IV followed by the user key.
    let mut rc4_key = Vec::with_capacity(3 + key.len());
    rc4_key.extend_from_slice(&data[header_offset..header_offset + 3]);
    rc4_key.extend_from_slice(key);

    // Key-scheduling algorithm.
    let mut sbox: [u8; 256] = std::array::from_fn(|i| i as u8);
    let mut j = 0usize;
    for i in 0..256 {
        j = (j + sbox[i] as usize + rc4_key[i % rc4_key.len()] as usize) & 0xFF;
        sbox.swap(i, j);
    }

    let mut out = Vec::with_capacity(data.len() - 8);
    out.extend_from_slice(&data[..header_offset]);

    // Stream-decrypt the payload and the trailing ICV.
    let mut i = 0usize;
    j = 0;
    let mut keystream = |sbox: &mut [u8; 256]| {
        i = (i + 1) & 0xFF;
        j = (j + sbox[i] as usize) & 0xFF;
        sbox.swap(i, j);
        sbox[(sbox[i] as usize + sbox[j] as usize) & 0xFF]
    };

    for &byte in &data[header_offset + 4..data.len() - 4] {
        out.push(byte ^ keystream(&mut sbox));
    }

    let mut icv = [0u8; 4];
    for (slot, &byte) in icv.iter_mut().zip(&data[data.len() - 4..]) {
        *slot = byte ^ keystream(&mut sbox);
    }

    // The ICV is the little-endian CRC32 of the plaintext payload.
    let crc = crc32fast::hash(&out[header_offset..]);
    if icv != crc.to_le_bytes() {
        return None;
    }

    // Clear the privacy flag in the rewritten frame.
    out[1] &= !FC_FLAG_PROTECTED;

    Some(out)
}

impl PacketHandler for WepDecryptor {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.error {
            return 0;
        }

        let (bssid, header_offset) = {
            let Some(info) = packet.dot11() else {
                return 0;
            };
            if info.corrupt
                || !info.subtype.carries_data()
                || info.cryptset.is_empty()
                || info.decrypted
            {
                return 0;
            }
            (info.bssid, info.header_offset)
        };

        let mangled = {
            let Some(chunk) = packet.decap().or(packet.link_frame()) else {
                return 0;
            };
            if chunk.dlt != DLT_IEEE802_11 {
                return 0;
            }

            let mut keys = self.keys.lock().unwrap();
            let Some(entry) = keys.get_mut(&bssid) else {
                return 0;
            };

            match decrypt_wep(&chunk.data, header_offset, &entry.key) {
                Some(plain) => {
                    entry.decrypted += 1;
                    plain
                }
                None => {
                    entry.failed += 1;
                    return 0;
                }
            }
        };

        packet.insert(PacketComponent::Mangle(DataChunk::new(
            DLT_IEEE802_11,
            mangled,
        )));
        if let Some(info) = packet.dot11_mut() {
            info.decrypted = true;
        }

        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot11::Dot11Dissector;
    use crate::packet::PacketTime;

    /// RC4 encryption of `plain` under `iv || key`, with the ICV appended.
    /// Mirrors what an AP does on transmit.
    pub(crate) fn wep_encrypt(plain_payload: &[u8], iv: [u8; 3], key: &[u8]) -> Vec<u8> {
        let mut rc4_key = iv.to_vec();
        rc4_key.extend_from_slice(key);

        let mut sbox: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut j = 0usize;
        for i in 0..256 {
            j = (j + sbox[i] as usize + rc4_key[i % rc4_key.len()] as usize) & 0xFF;
            sbox.swap(i, j);
        }

        let icv = crc32fast::hash(plain_payload).to_le_bytes();
        let mut cleartext = plain_payload.to_vec();
        cleartext.extend_from_slice(&icv);

        let mut i = 0usize;
        j = 0;
        let mut out = Vec::with_capacity(cleartext.len());
        for byte in cleartext {
            i = (i + 1) & 0xFF;
            j = (j + sbox[i] as usize) & 0xFF;
            sbox.swap(i, j);
            let k = sbox[(sbox[i] as usize + sbox[j] as usize) & 0xFF];
            out.push(byte ^ k);
        }
        out
    }

    /// Build a privacy-flagged data frame for `bssid` with an encrypted
    /// LLC-ish payload.
    pub(crate) fn wep_data_frame(bssid: [u8; 6], iv: [u8; 3], key: &[u8]) -> (Vec<u8>, Vec<u8>) {
        // LLC/SNAP + a few payload bytes.
        let plain: Vec<u8> = vec![
            0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00, 0x45, 0x00, 0x00, 0x14, 0x01, 0x02,
            0x03, 0x04,
        ];

        // to_ds=1: addr0 bssid, addr1 source, addr2 dest; protected flag set.
        let mut frame = vec![0x08, 0x01 | FC_FLAG_PROTECTED, 0x00, 0x00];
        frame.extend_from_slice(&bssid);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x10]);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x20]);
        frame.extend_from_slice(&[0x00, 0x00]);

        frame.extend_from_slice(&iv);
        frame.push(0x00); // key index
        frame.extend_from_slice(&wep_encrypt(&plain, iv, key));

        (frame, plain)
    }

    const KEY: [u8; 5] = [0x40, 0xCD, 0xC3, 0x5B, 0x6E];
    const BSSID: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

    #[test]
    fn happy_path_decrypts_and_clears_privacy() {
        let (frame, plain) = wep_data_frame(BSSID, [0, 0, 0], &KEY);

        let decryptor = WepDecryptor::new();
        decryptor.add_key(MacAddr(BSSID), &KEY).unwrap();

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::Decap(DataChunk::new(DLT_IEEE802_11, frame)));
        assert_eq!(Dot11Dissector::new().handle(&mut packet), 1);
        assert_eq!(decryptor.handle(&mut packet), 1);

        let info = packet.dot11().unwrap();
        assert!(info.decrypted);
        assert!(info.cryptset.contains(CryptSet::WEP));

        let mangle = packet.mangle().expect("mangle frame");
        // Privacy bit cleared, payload decrypted, IV and ICV gone.
        assert_eq!(mangle.data[1] & FC_FLAG_PROTECTED, 0);
        assert_eq!(&mangle.data[24..], &plain[..]);

        let stats = decryptor.key_stats(&MacAddr(BSSID)).unwrap();
        assert_eq!(stats.decrypted, 1);
        assert_eq!(stats.failed, 0);
    }

    use crate::dot11::CryptSet;

    #[test]
    fn wrong_key_counts_a_failure_and_leaves_the_packet() {
        let (frame, _) = wep_data_frame(BSSID, [1, 2, 3], &KEY);

        let decryptor = WepDecryptor::new();
        decryptor
            .add_key(MacAddr(BSSID), &[0x01, 0x02, 0x03, 0x04, 0x05])
            .unwrap();

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::Decap(DataChunk::new(DLT_IEEE802_11, frame)));
        Dot11Dissector::new().handle(&mut packet);
        assert_eq!(decryptor.handle(&mut packet), 0);

        assert!(packet.mangle().is_none());
        assert!(!packet.dot11().unwrap().decrypted);

        let stats = decryptor.key_stats(&MacAddr(BSSID)).unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn unknown_bssid_is_untouched() {
        let (frame, _) = wep_data_frame(BSSID, [0, 0, 0], &KEY);

        let decryptor = WepDecryptor::new();
        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::Decap(DataChunk::new(DLT_IEEE802_11, frame)));
        Dot11Dissector::new().handle(&mut packet);

        assert_eq!(decryptor.handle(&mut packet), 0);
        assert!(packet.mangle().is_none());
    }

    #[test]
    fn icv_self_check_holds_for_successful_decrypts() {
        // Decrypt succeeds only when the recomputed CRC equals the
        // decrypted ICV, so round-tripping several IVs must always work.
        for iv_byte in 0..16u8 {
            let (frame, plain) = wep_data_frame(BSSID, [iv_byte, 0xA5, 0x5A], &KEY);
            let mangled = decrypt_wep(&frame, 24, &KEY).expect("decrypt");
            assert_eq!(&mangled[24..], &plain[..]);
        }
    }

    #[test]
    fn key_string_parsing() {
        let decryptor = WepDecryptor::new();
        decryptor
            .add_key_str("00:11:22:33:44:55,40CDC35B6E")
            .unwrap();
        assert!(decryptor.key_stats(&MacAddr(BSSID)).is_some());

        assert!(decryptor.add_key_str("nonsense").is_err());
        assert!(decryptor.add_key_str("00:11:22:33:44:55,zz").is_err());
        assert!(
            decryptor
                .add_key(MacAddr(BSSID), &[1, 2, 3])
                .is_err()
        );
    }
}
