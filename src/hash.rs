//! Canonical torrent hash extraction from download-manager history records.
//!
//! Radarr and Sonarr report the download client's id for each grab as an opaque
//! `downloadId`. For torrent clients this is usually the bare info-hash, but some
//! clients prefix it (`"qBittorrent-<hash>"`). Everything here is total: any input
//! yields either a 40 character uppercase hex hash or `None`.

const HASH_LEN: usize = 40;

fn is_info_hash(candidate: &str) -> bool {
    candidate.len() == HASH_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Extract the canonical uppercase info-hash from a history `downloadId`.
///
/// The input is split on the first `-`; a valid hash on the right-hand side wins,
/// otherwise the whole input is tried.
pub fn extract_torrent_hash(download_id: &str) -> Option<String> {
    let trimmed = download_id.trim();
    if trimmed.len() < HASH_LEN {
        return None;
    }

    if let Some((_, rest)) = trimmed.split_once('-') {
        if is_info_hash(rest) {
            return Some(rest.to_ascii_uppercase());
        }
    }

    if is_info_hash(trimmed) {
        return Some(trimmed.to_ascii_uppercase());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_bare_hash_is_uppercased() {
        assert_eq!(
            extract_torrent_hash(HASH).as_deref(),
            Some("0123456789ABCDEF0123456789ABCDEF01234567")
        );
    }

    #[test]
    fn test_prefixed_hash() {
        let id = format!("qBittorrent-{}", HASH);
        assert_eq!(
            extract_torrent_hash(&id).as_deref(),
            Some("0123456789ABCDEF0123456789ABCDEF01234567")
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(extract_torrent_hash(""), None);
        assert_eq!(extract_torrent_hash("-"), None);
        assert_eq!(extract_torrent_hash("abc123"), None);
        assert_eq!(extract_torrent_hash("SABnzbd_nzo_abcdef"), None);
        // 40 chars but not hex
        assert_eq!(
            extract_torrent_hash("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"),
            None
        );
        // 41 hex chars
        assert_eq!(extract_torrent_hash(&format!("{}a", HASH)), None);
    }

    #[test]
    fn test_only_first_dash_is_split() {
        // The right-hand side after the first dash still contains a dash.
        let id = format!("a-b-{}", HASH);
        assert_eq!(extract_torrent_hash(&id), None);
        // A prefix whose tail is not a hash, and the whole is not a hash either.
        assert_eq!(extract_torrent_hash(&format!("{}-client", HASH)), None);
    }

    #[test]
    fn test_never_panics_on_messy_input() {
        let inputs = [
            "é".repeat(50),
            "-".repeat(80),
            format!("{}-{}", HASH, HASH),
            format!("ü-{}", HASH),
            " ".repeat(45),
            "\u{0}".repeat(41),
        ];
        for input in inputs.iter() {
            match extract_torrent_hash(input) {
                Some(hash) => {
                    assert_eq!(hash.len(), 40);
                    assert!(hash.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b)));
                }
                None => {}
            }
        }
        assert_eq!(
            extract_torrent_hash(&format!("ü-{}", HASH)).as_deref(),
            Some("0123456789ABCDEF0123456789ABCDEF01234567")
        );
    }
}
