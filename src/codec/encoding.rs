//! Lenient base64 and percent-decoding helpers shared by the decoders

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

/// Minimum compacted length before a body is considered base64
const MIN_BASE64_LEN: usize = 20;

/// Share of alphanumeric characters a base64 body must reach
const MIN_ALNUM_RATIO: f64 = 0.6;

fn lenient_engine() -> GeneralPurpose {
    GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    )
}

/// Decode base64 that may be URL-safe, unpadded, or wrapped across lines
pub fn decode_lenient(input: &str) -> Option<Vec<u8>> {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let compact = compact.trim_end_matches('=');
    if compact.is_empty() {
        return None;
    }

    lenient_engine().decode(compact).ok()
}

/// Decode base64 into text, replacing invalid UTF-8 sequences
pub fn decode_lenient_text(input: &str) -> Option<String> {
    decode_lenient(input).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Heuristic: long enough, only base64 alphabet, mostly alphanumeric
pub fn looks_like_base64(text: &str) -> bool {
    let compact: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < MIN_BASE64_LEN {
        return false;
    }

    let in_alphabet = compact
        .iter()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'));
    if !in_alphabet {
        return false;
    }

    let alnum = compact.iter().filter(|c| c.is_ascii_alphanumeric()).count();
    alnum as f64 / compact.len() as f64 >= MIN_ALNUM_RATIO
}

/// Standard padded base64
pub fn encode_standard(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// URL-safe base64 without padding, as used inside share links
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Reverse percent-encoding; malformed escapes are kept literally
pub fn percent_decode(text: &str) -> String {
    let bytes = urlencoding::decode_binary(text.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Percent-encode a display name for a share-link fragment
pub fn percent_encode(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}
