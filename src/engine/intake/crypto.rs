// Per-platform webhook authentication and payload decryption. AES-256-CBC
// usage follows the same `cbc::Decryptor<aes::Aes256>` + PKCS#7 pattern used
// for Nostr NIP-04 elsewhere in this engine; signature comparisons use
// `subtle` to avoid early-exit timing leaks.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use regex::Regex;
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::{Digest as Sha2Digest, Sha256};
use std::sync::OnceLock;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn pkcs7_unpad(data: &[u8]) -> Vec<u8> {
    match data.last() {
        Some(&pad_len) if (1..=32).contains(&(pad_len as usize)) && (pad_len as usize) <= data.len() => {
            data[..data.len() - pad_len as usize].to_vec()
        }
        _ => data.to_vec(),
    }
}

fn sha1_hex(s: &str) -> String {
    format!("{:x}", Sha1::digest(s.as_bytes()))
}

/// WeCom/WeCom-Bot `msg_signature = sha1(sort(token, timestamp, nonce[, msg]))`.
pub fn compute_msg_signature(token: &str, timestamp: &str, nonce: &str, msg: Option<&str>) -> String {
    let mut parts = vec![token, timestamp, nonce];
    if let Some(m) = msg {
        parts.push(m);
    }
    parts.sort_unstable();
    sha1_hex(&parts.concat())
}

/// Decrypts a WeCom/WeCom-Bot `Encrypt` field: AES-256-CBC with the IV equal
/// to the key's first 16 bytes, inner layout `[16 random][4 len BE][xml][receiveid]`.
/// Returns `None` on any decode/decrypt/layout failure or a `receiveid` mismatch
/// (when `receiveid_expected` is non-empty).
pub fn wecom_decrypt(encrypt_b64: &str, encoding_aes_key: &str, receiveid_expected: &str) -> Option<String> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let key = STANDARD.decode(format!("{encoding_aes_key}=")).ok()?;
    if key.len() != 32 {
        return None;
    }
    let iv = key[..16].to_vec();
    let ciphertext = STANDARD.decode(encrypt_b64).ok()?;
    let mut buf = ciphertext;
    let padded = cbc::Decryptor::<aes::Aes256>::new_from_slices(&key, &iv).ok()?.decrypt_padded_mut::<Pkcs7>(&mut buf).ok()?;
    let plain = pkcs7_unpad(padded);
    if plain.len() < 20 {
        return None;
    }
    let msg_len = u32::from_be_bytes(plain[16..20].try_into().ok()?) as usize;
    let xml = plain.get(20..20 + msg_len)?;
    let receiveid = String::from_utf8_lossy(&plain[20 + msg_len..]).to_string();
    if !receiveid_expected.is_empty() && receiveid_expected != receiveid {
        return None;
    }
    Some(String::from_utf8_lossy(xml).to_string())
}

/// Feishu bot AES-256-CBC decryption: key = sha256(encrypt_key), IV is the
/// first 16 bytes of the decoded ciphertext itself (not derived from the key).
pub fn feishu_decrypt(encrypt_b64: &str, encrypt_key: &str) -> Option<String> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let key = Sha256::digest(encrypt_key.as_bytes());
    let raw = STANDARD.decode(encrypt_b64).ok()?;
    if raw.len() < 16 {
        return None;
    }
    let (iv, ciphertext) = raw.split_at(16);
    let mut buf = ciphertext.to_vec();
    let padded = cbc::Decryptor::<aes::Aes256>::new_from_slices(&key, iv).ok()?.decrypt_padded_mut::<Pkcs7>(&mut buf).ok()?;
    Some(String::from_utf8_lossy(padded).to_string())
}

/// Feishu `X-Lark-Signature`: hex sha1 of `timestamp + nonce + encrypt_key + body`.
pub fn feishu_verify_signature(timestamp: &str, nonce: &str, encrypt_key: &str, body: &str, signature: &str) -> bool {
    let expected = sha1_hex(&format!("{timestamp}{nonce}{encrypt_key}{body}"));
    bool::from(expected.as_bytes().ct_eq(signature.as_bytes()))
}

/// DingTalk `X-DingTalk-Sign`: base64 HMAC-SHA256 over `"{timestamp}\n{secret}"`, keyed by `secret`.
pub fn dingtalk_verify_signature(timestamp: &str, sign: &str, secret: &str) -> bool {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{timestamp}\n{secret}").as_bytes());
    let expected = STANDARD.encode(mac.finalize().into_bytes());
    bool::from(expected.as_bytes().ct_eq(sign.as_bytes()))
}

/// Telegram's `X-Telegram-Bot-Api-Secret-Token` equality check.
pub fn telegram_verify_secret_token(header: &str, configured: &str) -> bool {
    bool::from(header.as_bytes().ct_eq(configured.as_bytes()))
}

/// Pulls a single tag's text content out of WeCom's fixed XML envelope
/// (`<xml><Encrypt><![CDATA[...]]></Encrypt>...</xml>`). Not a general XML
/// parser — WeCom's callback body only ever has a handful of flat tags.
pub fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    static CACHE: OnceLock<std::sync::Mutex<std::collections::HashMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::Mutex::new(std::collections::HashMap::new()));
    let mut cache = cache.lock().unwrap();
    let re = cache.entry(tag.to_string()).or_insert_with(|| {
        Regex::new(&format!(r"<{tag}>(?:<!\[CDATA\[(.*?)\]\]>|(.*?))</{tag}>")).expect("static pattern")
    });
    let caps = re.captures(xml)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_signature_matches_sorted_sha1() {
        let sig = compute_msg_signature("tok", "1234", "abcd", Some("hello"));
        let mut parts = vec!["tok", "1234", "abcd", "hello"];
        parts.sort_unstable();
        assert_eq!(sig, sha1_hex(&parts.concat()));
    }

    #[test]
    fn wecom_round_trip_encrypt_then_decrypt() {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut};

        let key: Vec<u8> = (0u8..32).collect();
        let iv = key[..16].to_vec();

        let xml = b"<xml>hello</xml>";
        let mut plain = Vec::new();
        plain.extend_from_slice(&[1u8; 16]);
        plain.extend_from_slice(&(xml.len() as u32).to_be_bytes());
        plain.extend_from_slice(xml);
        plain.extend_from_slice(b"corp1");

        let mut buf = plain.clone();
        buf.resize(plain.len() + 16, 0);
        let ct = cbc::Encryptor::<aes::Aes256>::new_from_slices(&key, &iv)
            .unwrap()
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plain.len())
            .unwrap();
        let encrypt_b64 = STANDARD.encode(ct);

        // encoding_aes_key is the 43-char base64 (sans trailing '=') the key decodes from.
        let encoding_aes_key = STANDARD.encode(&key);
        let encoding_aes_key = encoding_aes_key.trim_end_matches('=');

        let decrypted = wecom_decrypt(&encrypt_b64, encoding_aes_key, "corp1").unwrap();
        assert_eq!(decrypted, "<xml>hello</xml>");
        assert!(wecom_decrypt(&encrypt_b64, encoding_aes_key, "wrong-corp").is_none());
    }

    #[test]
    fn dingtalk_signature_round_trips() {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let secret = "shh";
        let timestamp = "1690000000000";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}\n{secret}").as_bytes());
        let sign = STANDARD.encode(mac.finalize().into_bytes());
        assert!(dingtalk_verify_signature(timestamp, &sign, secret));
        assert!(!dingtalk_verify_signature(timestamp, "bogus", secret));
    }

    #[test]
    fn extract_xml_tag_handles_cdata_and_plain() {
        let xml = r#"<xml><Encrypt><![CDATA[abc123]]></Encrypt><ToUserName>corp1</ToUserName></xml>"#;
        assert_eq!(extract_xml_tag(xml, "Encrypt").as_deref(), Some("abc123"));
        assert_eq!(extract_xml_tag(xml, "ToUserName").as_deref(), Some("corp1"));
        assert_eq!(extract_xml_tag(xml, "Missing"), None);
    }
}
