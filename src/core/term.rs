use unicode_normalization::{is_nfc_quick, IsNormalized, UnicodeNormalization};

/// 规范化检索词：去首尾空白 + NFC。空白词返回 None（调用方按 no-op 处理）。
///
/// 同一个词的 NFC / NFD 形式必须落到同一个 key，否则热榜会出现“看起来一样”的两行。
pub fn normalize_term(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match is_nfc_quick(trimmed.chars()) {
        IsNormalized::Yes => Some(trimmed.to_string()),
        _ => Some(trimmed.nfc().collect()),
    }
}
