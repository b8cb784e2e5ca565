pub type EncodingResult<T> = Result<T, EncodingError>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EncodingError {
    Hex,
    Base64,
    Length { expected: usize, actual: usize },
}

/// Lowercase hex codec used for IVs, line identifiers and hashnames.
pub mod hex {
    use super::{EncodingError, EncodingResult};

    #[inline]
    pub fn encode(data: &[u8]) -> String {
        ::hex::encode(data)
    }

    #[inline]
    pub fn decode(text: &str) -> EncodingResult<Vec<u8>> {
        ::hex::decode(text).map_err(|_| EncodingError::Hex)
    }

    /// Decodes a hex string into a fixed size array, validating the length.
    #[inline]
    pub fn decode_exact<const N: usize>(text: &str) -> EncodingResult<[u8; N]> {
        let raw = decode(text)?;

        if raw.len() != N {
            return Err(EncodingError::Length {
                expected: N,
                actual: raw.len(),
            });
        }

        let mut out = [0u8; N];
        out.copy_from_slice(&raw);
        Ok(out)
    }
}

/// Standard base64 codec. Encoding emits `=` padding; decoding accepts
/// payloads with the padding stripped.
pub mod base64 {
    use super::{EncodingError, EncodingResult};

    #[inline]
    pub fn encode(data: &[u8]) -> String {
        ::base64::encode(data)
    }

    #[inline]
    pub fn decode(text: &str) -> EncodingResult<Vec<u8>> {
        let mut padded = text.to_string();
        while padded.len() % 4 != 0 {
            padded.push('=');
        }

        ::base64::decode(&padded).map_err(|_| EncodingError::Base64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let data = [0u8, 1, 127, 128, 255];
        let text = hex::encode(&data);

        assert_eq!(text, "00017f80ff");
        assert_eq!(hex::decode(&text).unwrap(), data);
    }

    #[test]
    fn test_hex_rejects_invalid() {
        assert_eq!(hex::decode("zz"), Err(EncodingError::Hex));
        assert_eq!(hex::decode("abc"), Err(EncodingError::Hex));
    }

    #[test]
    fn test_hex_decode_exact() {
        let line: [u8; 16] = hex::decode_exact("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(line[15], 0x0f);

        assert_eq!(
            hex::decode_exact::<16>("0001"),
            Err(EncodingError::Length {
                expected: 16,
                actual: 2
            })
        );
    }

    #[test]
    fn test_base64_roundtrip() {
        for len in 0u8..8 {
            let data: Vec<u8> = (0..len).collect();
            assert_eq!(base64::decode(&base64::encode(&data)).unwrap(), data);
        }
    }

    #[test]
    fn test_base64_accepts_missing_padding() {
        let encoded = base64::encode(b"four");
        assert_eq!(encoded, "Zm91cg==");

        assert_eq!(base64::decode("Zm91cg").unwrap(), b"four");
        assert_eq!(base64::decode("Zm91cg==").unwrap(), b"four");
    }

    #[test]
    fn test_base64_rejects_invalid() {
        assert_eq!(base64::decode("@@@@"), Err(EncodingError::Base64));
    }
}
