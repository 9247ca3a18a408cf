use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Parse a device UUID as advertised in TXT records.
///
/// Accepts hyphenated, simple, braced and `urn:uuid:` forms. The nil UUID is
/// treated as absent.
pub fn parse_device_uuid(text: &str) -> Option<Uuid> {
    Uuid::parse_str(text.trim())
        .ok()
        .filter(|uuid| !uuid.is_nil())
}

/// Derive a stable UUID from a service instance name.
///
/// Used for devices that do not advertise a UUID, so the same device keeps
/// the same identity across restarts. The first 16 bytes of the SHA-256 of
/// the name are stamped as an RFC 4122 variant, version 5 layout.
pub fn synthesize_uuid(name: &str) -> Uuid {
    let digest = Sha256::digest(name.as_bytes());

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}
