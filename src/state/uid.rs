//! UID generation for TS6-style user identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates unique user IDs (UIDs) in TS6 format.
///
/// Format: SID (3 chars) + client ID (6 chars base36) = 9 chars total.
/// The first base36 block (`AAAAAA`..`AAAAA9`) is reserved for service
/// pseudo-users, so real clients start at `AAAABA`.
pub struct UidGenerator {
    sid: String,
    counter: AtomicU64,
}

/// Size of the reserved service block.
const RESERVED: u64 = 36;

impl UidGenerator {
    /// Create a new UID generator for the given server ID.
    pub fn new(sid: String) -> Self {
        Self {
            sid,
            counter: AtomicU64::new(RESERVED),
        }
    }

    /// Generate the next unique UID.
    pub fn next_uid(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.sid, base36_encode_6(n))
    }

    /// The UID of a service pseudo-user, e.g. `service_uid('N')` for
    /// NickServ on this server.
    pub fn service_uid(&self, letter: char) -> String {
        format!("{}AAAAA{}", self.sid, letter)
    }
}

/// Encode a number as a 6-character base36 string.
fn base36_encode_6(mut n: u64) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut result = [b'A'; 6];

    for i in (0..6).rev() {
        result[i] = CHARS[(n % 36) as usize];
        n /= 36;
    }

    String::from_utf8_lossy(&result).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_generation_skips_service_block() {
        let generator = UidGenerator::new("001".to_string());
        assert_eq!(generator.next_uid(), "001AAAABA");
        assert_eq!(generator.next_uid(), "001AAAABB");
    }

    #[test]
    fn service_uids() {
        let generator = UidGenerator::new("0X9".to_string());
        assert_eq!(generator.service_uid('N'), "0X9AAAAAN");
        assert_eq!(generator.service_uid('C'), "0X9AAAAAC");
        assert_eq!(generator.service_uid('M'), "0X9AAAAAM");
    }

    #[test]
    fn base36_encode() {
        assert_eq!(base36_encode_6(0), "AAAAAA");
        assert_eq!(base36_encode_6(1), "AAAAAB");
        assert_eq!(base36_encode_6(35), "AAAAA9");
        assert_eq!(base36_encode_6(36), "AAAABA");
    }

    #[test]
    fn generated_uids_never_collide_with_services() {
        let generator = UidGenerator::new("001".to_string());
        for _ in 0..100 {
            let uid = generator.next_uid();
            assert!(!uid.starts_with("001AAAAA"), "{uid} is inside the service block");
        }
    }
}
