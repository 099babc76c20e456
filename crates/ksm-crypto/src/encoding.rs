//! Base64 helpers.
//!
//! JSON bodies carry standard base64; uids, tokens and HTTP headers carry
//! unpadded base64url. Decoding accepts either alphabet with or without
//! padding since both show up in stored configs.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use ksm_core::{KsmError, KsmResult};

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn encode_url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode standard or url-safe base64.
pub fn decode(s: &str) -> KsmResult<Vec<u8>> {
    let s = s.trim();
    let result = if s.contains('-') || s.contains('_') {
        URL_SAFE_LENIENT.decode(s)
    } else {
        STANDARD_LENIENT.decode(s)
    };
    result.map_err(|e| KsmError::Decryption(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_both_alphabets() {
        let data = [0xfbu8, 0xff, 0xbf, 0x01];
        assert_eq!(decode(&encode(&data)).unwrap(), data);
        assert_eq!(decode(&encode_url(&data)).unwrap(), data);
        // padded url-safe
        assert_eq!(decode("-_-_AQ==").unwrap(), [0xfb, 0xff, 0xbf, 0x01]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode("not base64 !!").is_err());
    }
}
