//! Small unit conversions shared by the dissectors and the pcap-ng writer.

/// Convert a fixed-point 3.7 value (offset by 180) back to degrees.
/// Used for latitude/longitude in PPI GPS tags and pcap-ng GPS options.
pub fn fixed3_7_to_double(raw: u32) -> f64 {
    (f64::from(raw) / 1e7) - 180.0
}

/// Convert degrees to fixed-point 3.7 (offset by 180).
pub fn double_to_fixed3_7(value: f64) -> u32 {
    ((value + 180.0) * 1e7).round() as u32
}

/// Convert a fixed-point 6.4 value (offset by 180000) back to a float.
/// Used for altitude in meters.
pub fn fixed6_4_to_double(raw: u32) -> f64 {
    (f64::from(raw) / 1e4) - 180_000.0
}

/// Convert a float to fixed-point 6.4 (offset by 180000).
pub fn double_to_fixed6_4(value: f64) -> u32 {
    ((value + 180_000.0) * 1e4).round() as u32
}

/// Map an 802.11 center frequency in MHz to its IEEE channel number.
pub fn ieee80211_freq_to_channel(freq_mhz: u32) -> Option<u32> {
    match freq_mhz {
        2412..=2472 => Some((freq_mhz - 2407) / 5),
        2484 => Some(14),
        5170..=5895 => Some((freq_mhz - 5000) / 5),
        _ => None,
    }
}

/// Map an 802.11 channel number to its center frequency in MHz.
pub fn ieee80211_channel_to_freq(channel: u32) -> Option<u32> {
    match channel {
        1..=13 => Some(2407 + channel * 5),
        14 => Some(2484),
        34..=179 => Some(5000 + channel * 5),
        _ => None,
    }
}
