//! Magnet URI construction.

use rw_core::SourceHash;

/// Trackers appended to every magnet so the debrid provider can find peers
/// without a separate metadata file.
pub const DEFAULT_TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://tracker.tiny-vps.com:6969/announce",
    "udp://open.demonii.com:1337/announce",
];

pub fn magnet_uri(hash: &SourceHash, display_name: Option<&str>) -> String {
    let mut uri = format!("magnet:?xt=urn:btih:{hash}");
    if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
        uri.push_str("&dn=");
        uri.push_str(&urlencoding::encode(name.trim()));
    }
    for tracker in DEFAULT_TRACKERS {
        uri.push_str("&tr=");
        uri.push_str(&urlencoding::encode(tracker));
    }
    uri
}
