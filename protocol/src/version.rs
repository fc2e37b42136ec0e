//! # Component Versions
//!
//! Governance components report their version as `major.minor.patch`
//! packed into one integer: `major << 16 | minor << 8 | patch`. Each
//! component must fit in a byte. Anything malformed packs to `0`, which is
//! never a real release.

/// Packs a `major.minor.patch` string. Returns `0` for malformed input.
///
/// ```
/// use keel_protocol::version::numberify;
/// assert_eq!(numberify("1.2.3"), 0x01_02_03);
/// assert_eq!(numberify("4.2"), 0);
/// ```
pub fn numberify(version: &str) -> u32 {
    let mut parts = [0u32; 3];
    let mut count = 0;
    for component in version.split('.') {
        if count == parts.len() {
            return 0;
        }
        if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
            return 0;
        }
        let trimmed = component.trim_start_matches('0');
        // A long run of leading zeros is still a small number.
        if trimmed.len() > 3 {
            return 0;
        }
        let value: u32 = if trimmed.is_empty() {
            0
        } else {
            match trimmed.parse() {
                Ok(v) => v,
                Err(_) => return 0,
            }
        };
        if value > 0xFF {
            return 0;
        }
        parts[count] = value;
        count += 1;
    }
    if count != parts.len() {
        return 0;
    }
    parts[0] << 16 | parts[1] << 8 | parts[2]
}

/// Inverse of [`numberify`]. Bits above the low 24 are ignored.
pub fn stringify(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xFF,
        (version >> 8) & 0xFF,
        version & 0xFF
    )
}
