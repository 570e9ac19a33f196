//! Document identifier refresh.
//!
//! The trailer's /ID holds two hex strings. The first half is minted once
//! when the document is created and then carried forward verbatim across
//! saves. The second half changes on every save so two revisions of the
//! same file never share a full identifier.

use rand::RngCore;

use vellum_object::{Object, StringKind};

/// Bytes of entropy mixed into each refreshed half.
const SALT_LEN: usize = 16;

/// Compute a fresh /ID value for a save.
///
/// `existing` is the current /ID array, if any. Its first entry is kept as
/// the permanent half; when it is absent or malformed a new permanent half
/// is minted from `seed` (typically the serialized trailer plus the output
/// length) so recovery from a damaged trailer still yields a stable value.
pub fn refresh_id(existing: Option<&Object>, seed: &[u8]) -> Object {
    let permanent = existing
        .and_then(|obj| match obj {
            Object::Array(items) => items.first(),
            _ => None,
        })
        .and_then(|first| match first {
            Object::String(bytes, _) if !bytes.is_empty() => Some(bytes.clone()),
            _ => None,
        })
        .unwrap_or_else(|| digest_hex(seed, None));

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let changing = digest_hex(seed, Some(&salt));

    Object::Array(vec![
        Object::String(permanent, StringKind::Hex),
        Object::String(changing, StringKind::Hex),
    ])
}

fn digest_hex(seed: &[u8], salt: Option<&[u8]>) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    if let Some(salt) = salt {
        hasher.update(salt);
    }
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..16]).into_bytes()
}
