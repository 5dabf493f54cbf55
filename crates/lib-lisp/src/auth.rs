use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

use lispbuf::WriteBuffer;

type HmacSha1 = Hmac<Sha1>;

/// The only registered algorithm this daemon speaks. Keys are pre-shared
/// ASCII strings from the configuration.
pub const KEY_ID_HMAC_SHA1_96: u16 = 1;

/// HMAC-SHA1-96 truncates the SHA-1 digest to 96 bits.
pub const AUTH_DATA_LEN: usize = 12;

/// Offset of the authentication data in Map-Register, Map-Notify and
/// Info messages: type word (4) + nonce (8) + key-id (2) + length (2).
pub const AUTH_DATA_OFFSET: usize = 16;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Unsupported key id ({0})")]
    UnsupportedKeyId(u16),

    #[error("Authentication data length {0} does not match the algorithm")]
    BadLength(usize),

    #[error("Authentication data does not verify")]
    Mismatch,

    #[error("Message too short to carry authentication data")]
    Truncated,
}

/// HMAC-SHA1-96 over a full message image whose auth-data field is
/// already zeroed.
pub fn compute(key: &str, msg: &[u8]) -> [u8; AUTH_DATA_LEN] {
    // An HMAC accepts keys of any length.
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("hmac key");
    mac.update(msg);

    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; AUTH_DATA_LEN];
    out.copy_from_slice(&digest[..AUTH_DATA_LEN]);
    out
}

/// Sign a serialized Map-Register/Notify/Info sitting in `buf`. The
/// message must have been written with a zeroed auth-data field, which is
/// patched in place.
pub fn sign(buf: &mut WriteBuffer, key: &str) -> Result<(), AuthError> {
    if buf.len() < AUTH_DATA_OFFSET + AUTH_DATA_LEN {
        return Err(AuthError::Truncated);
    }

    let digest = compute(key, buf.bytes());
    buf.replace_at(AUTH_DATA_OFFSET, &digest)
        .map_err(|_| AuthError::Truncated)?;
    Ok(())
}

/// Verify the auth data of a received message. `key_id` and `auth_len`
/// are the values parsed from the message; the digest is recomputed over
/// the raw bytes with the auth-data region zeroed.
pub fn verify(key: &str, raw: &[u8], key_id: u16, auth_len: usize) -> Result<(), AuthError> {
    if key_id != KEY_ID_HMAC_SHA1_96 {
        return Err(AuthError::UnsupportedKeyId(key_id));
    }
    if auth_len != AUTH_DATA_LEN {
        return Err(AuthError::BadLength(auth_len));
    }
    if raw.len() < AUTH_DATA_OFFSET + AUTH_DATA_LEN {
        return Err(AuthError::Truncated);
    }

    let mut image = raw.to_vec();
    let mut received = [0u8; AUTH_DATA_LEN];
    received.copy_from_slice(&image[AUTH_DATA_OFFSET..AUTH_DATA_OFFSET + AUTH_DATA_LEN]);
    image[AUTH_DATA_OFFSET..AUTH_DATA_OFFSET + AUTH_DATA_LEN].fill(0);

    if compute(key, &image) != received {
        return Err(AuthError::Mismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 2202 test case 2, truncated to 96 bits.
    #[test]
    fn rfc2202_vector() {
        let digest = compute("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            digest,
            [0xef, 0xfc, 0xdf, 0x6a, 0xe5, 0xeb, 0x2f, 0xa2, 0xd2, 0x74, 0x16, 0xd5]
        );
    }

    #[test]
    fn sign_then_verify() {
        let mut buf = WriteBuffer::new();
        // Fake message: header word, nonce, key-id, auth-len, zeroed auth
        // data, one payload byte.
        buf.write_slice(&[0x30, 0, 0, 0]).unwrap();
        buf.write_slice(&[0; 8]).unwrap();
        buf.write_slice(&[0x00, 0x01, 0x00, 0x0c]).unwrap();
        buf.write_slice(&[0; AUTH_DATA_LEN]).unwrap();
        buf.push(0xaa);

        sign(&mut buf, "secret").unwrap();
        assert!(verify("secret", buf.bytes(), KEY_ID_HMAC_SHA1_96, AUTH_DATA_LEN).is_ok());
        assert_eq!(
            verify("wrong", buf.bytes(), KEY_ID_HMAC_SHA1_96, AUTH_DATA_LEN),
            Err(AuthError::Mismatch)
        );
    }

    #[test]
    fn unsupported_key_id_rejected() {
        let raw = [0u8; 32];
        assert_eq!(
            verify("s", &raw, 2, AUTH_DATA_LEN),
            Err(AuthError::UnsupportedKeyId(2))
        );
    }
}
