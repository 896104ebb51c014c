use super::*;

#[test]
fn test_sha256_empty() {
    assert_eq!(
        sha256(b"").to_hex(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn test_sha256_abc() {
    assert_eq!(
        sha256(b"abc").to_hex(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_sha256_concat_matches_single_shot() {
    let parts: [&[u8]; 3] = [b"al", b"ph", b"a"];
    assert_eq!(sha256_concat(parts), sha256(b"alpha"));
}

#[test]
fn test_sentinel_is_all_zero() {
    assert!(SENTINEL.is_sentinel());
    assert_eq!(SENTINEL.as_bytes(), &[0u8; HASH_WIDTH]);
    assert!(!sha256(b"").is_sentinel());
}

#[test]
fn test_from_slice_rejects_wrong_length() {
    assert!(Hash::from_slice(&[0u8; 31]).is_none());
    assert!(Hash::from_slice(&[0u8; 33]).is_none());
    let h = Hash::from_slice(&[7u8; 32]).unwrap();
    assert_eq!(h.as_bytes(), &[7u8; 32]);
}

#[test]
fn test_hex_encode() {
    assert_eq!(hex_encode(&[0x00, 0xff, 0xab]), "00ffab");
    assert_eq!(hex_encode(&[]), "");
}

#[test]
fn test_display_is_full_hex() {
    let h = Hash::from_bytes([0xaa; 32]);
    assert_eq!(format!("{h}"), "aa".repeat(32));
}
