//! Collaborator seams consumed by the engine.
//!
//! Encryption and byte-filter decoding are external services: the engine
//! hands them opaque buffers and object coordinates and takes back bytes.
//! Capacity policy lives next to the cross-reference table, which is the
//! only grower it guards.

use crate::name::Name;
use crate::reference::ObjRef;

/// Per-object encryption service.
///
/// `unwrap` is applied to every string/stream payload as it is resolved;
/// `wrap` to every payload as it is written. The engine never interprets
/// key material.
pub trait CryptProvider {
    fn unwrap(&self, reference: ObjRef, data: &[u8]) -> Result<Vec<u8>, String>;
    fn wrap(&self, reference: ObjRef, data: &[u8]) -> Result<Vec<u8>, String>;
}

/// Identity encryption: unencrypted documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCrypt;

impl CryptProvider for NoopCrypt {
    fn unwrap(&self, _reference: ObjRef, data: &[u8]) -> Result<Vec<u8>, String> {
        Ok(data.to_vec())
    }

    fn wrap(&self, _reference: ObjRef, data: &[u8]) -> Result<Vec<u8>, String> {
        Ok(data.to_vec())
    }
}

/// Named byte-filter service, applied transparently when stream bodies are
/// resolved or emitted. Filter chains are outermost-first on decode.
pub trait FilterService {
    /// Apply the named decode filter to `data`.
    fn decode(&self, filter: &Name, data: &[u8]) -> Result<Vec<u8>, String>;

    /// Apply the named encode filter to `data`.
    fn encode(&self, filter: &Name, data: &[u8]) -> Result<Vec<u8>, String>;

    /// Run a whole chain of decode filters, outermost first.
    fn decode_chain(&self, filters: &[Name], data: &[u8]) -> Result<Vec<u8>, String> {
        let mut current = data.to_vec();
        for f in filters {
            current = self.decode(f, &current)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_crypt_is_identity() {
        let c = NoopCrypt;
        let r = ObjRef::new(3, 0);
        assert_eq!(c.unwrap(r, b"abc").unwrap(), b"abc");
        assert_eq!(c.wrap(r, b"abc").unwrap(), b"abc");
    }
}
