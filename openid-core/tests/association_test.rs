//! Association Signing Tests
//!
//! Fixed MAC vectors that any implementation must reproduce, plus the
//! sign/verify lifecycle of a full message:
//! - Key-value form `key:value\n` encoding
//! - Signed-list construction and lookup order
//! - Tamper detection
//! - Serialized form round trips

use chrono::{DateTime, Duration, Utc};
use openid_core::{Association, AssociationType, Error, Message, Namespace, ProtocolVersion};
use proptest::prelude::*;

const SECRET: &[u8] = b"very_secret";

fn assoc(assoc_type: AssociationType) -> Association {
    Association::new(
        "{sha1}handle",
        SECRET.to_vec(),
        Utc::now(),
        Duration::hours(1),
        assoc_type,
    )
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// =============================================================================
// MAC vectors
// =============================================================================

/// Test: HMAC-SHA1 over two plain pairs matches the interoperable digest
#[test]
fn test_sign_sha1_vector() {
    let pairs = [("key1", "value1"), ("key2", "value2")];
    let sig = assoc(AssociationType::HmacSha1).sign(&pairs).unwrap();
    assert_eq!(to_hex(&sig), "e01b7604f147c0bb7f9a8be9bcee7d5ce5bb372a");
}

/// Test: HMAC-SHA256 over the same pairs matches its fixed digest
#[test]
fn test_sign_sha256_vector() {
    let pairs = [("key1", "value1"), ("key2", "value2")];
    let sig = assoc(AssociationType::HmacSha256).sign(&pairs).unwrap();
    assert_eq!(
        to_hex(&sig),
        "fdaafe3bacfc2a9838ad0564362dea5679d5a55a2e3ca9ed18825c2495781c26"
    );
}

/// Test: values are signed byte for byte, colons and percent signs included
#[test]
fn test_sign_raw_values() {
    let pairs = [("return_to", "http://example.com/?a=b%20c&d=e:f")];
    let sig = assoc(AssociationType::HmacSha1).sign(&pairs).unwrap();
    assert_eq!(to_hex(&sig), "10e0a8110d33d30659e7c0394db98589a9e8ca6f");
}

/// Test: a pair that cannot be written as one key-value line is refused
#[test]
fn test_sign_refuses_unencodable_pairs() {
    let a = assoc(AssociationType::HmacSha1);
    assert!(matches!(
        a.sign(&[("mode", "id_res\nmode:cancel")]),
        Err(Error::InvalidMessage(_))
    ));
    assert!(matches!(
        a.sign(&[("ns:x", "v")]),
        Err(Error::InvalidMessage(_))
    ));
}

/// Test: pair order is significant
#[test]
fn test_sign_order_matters() {
    let a = assoc(AssociationType::HmacSha1);
    let forward = a.sign(&[("key1", "value1"), ("key2", "value2")]).unwrap();
    let reverse = a.sign(&[("key2", "value2"), ("key1", "value1")]).unwrap();
    assert_ne!(forward, reverse);
}

// =============================================================================
// Signed lists
// =============================================================================

fn id_res() -> Message {
    let mut msg = Message::new(ProtocolVersion::V2);
    msg.set_arg(Namespace::OpenId, "mode", "id_res");
    msg.set_arg(Namespace::OpenId, "identifier", "http://example.com/");
    msg
}

/// Test: signed pairs follow the declared list, OpenID namespace first
#[test]
fn test_make_pairs() {
    let mut msg = id_res();
    msg.set_arg(Namespace::OpenId, "signed", "identifier,mode");
    msg.set_arg(Namespace::Bare, "xey", "value");

    let pairs = assoc(AssociationType::HmacSha1)
        .make_signed_pairs(&msg)
        .unwrap();
    assert_eq!(
        pairs,
        vec![
            ("identifier".to_string(), "http://example.com/".to_string()),
            ("mode".to_string(), "id_res".to_string()),
        ]
    );
}

/// Test: a field named in the list but absent signs as an empty value
#[test]
fn test_make_pairs_missing_field() {
    let mut msg = id_res();
    msg.set_arg(Namespace::OpenId, "signed", "mode,return_to");

    let pairs = assoc(AssociationType::HmacSha1)
        .make_signed_pairs(&msg)
        .unwrap();
    assert_eq!(pairs[1], ("return_to".to_string(), String::new()));
}

/// Test: no signed list is an error, not an empty signature
#[test]
fn test_make_pairs_requires_list() {
    let result = assoc(AssociationType::HmacSha1).make_signed_pairs(&id_res());
    assert_eq!(result, Err(Error::MissingSignedList));
}

/// Test: an empty signed list counts as no list
#[test]
fn test_make_pairs_rejects_empty_list() {
    let mut msg = id_res();
    msg.set_arg(Namespace::OpenId, "signed", "");
    let result = assoc(AssociationType::HmacSha1).make_signed_pairs(&msg);
    assert_eq!(result, Err(Error::MissingSignedList));
}

/// Test: sign_message signs every OpenID field and leaves bare fields alone
#[test]
fn test_sign_message() {
    let mut msg = id_res();
    msg.set_arg(Namespace::Bare, "xey", "value");

    let signed = assoc(AssociationType::HmacSha1).sign_message(&msg).unwrap();

    assert_eq!(
        signed.get_arg(Namespace::OpenId, "signed"),
        Some("assoc_handle,identifier,mode,ns,signed")
    );
    assert_eq!(
        signed.get_arg(Namespace::OpenId, "assoc_handle"),
        Some("{sha1}handle")
    );
    assert_eq!(
        signed.get_arg(Namespace::OpenId, "sig"),
        Some("0cHxpTw/94TZkYeMOw2ChNjDaBE=")
    );
    assert_eq!(signed.get_arg(Namespace::Bare, "xey"), Some("value"));
    assert!(!msg.has_key(Namespace::OpenId, "sig"));
}

/// Test: extension fields are covered by the signature
#[test]
fn test_sign_message_covers_extensions() {
    let mut msg = id_res();
    msg.set_extension_arg("sreg", "http://openid.net/extensions/sreg/1.1", "email", "a@b.c");

    let signed = assoc(AssociationType::HmacSha256).sign_message(&msg).unwrap();
    let list = signed.get_arg(Namespace::OpenId, "signed").unwrap();
    assert!(list.split(',').any(|f| f == "ns.sreg"));
    assert!(list.split(',').any(|f| f == "sreg.email"));
}

// =============================================================================
// Verification
// =============================================================================

/// Test: a signed message verifies under the same association
#[test]
fn test_check_signature() {
    for assoc_type in [AssociationType::HmacSha1, AssociationType::HmacSha256] {
        let a = assoc(assoc_type);
        let signed = a.sign_message(&id_res()).unwrap();
        assert_eq!(a.check_message_signature(&signed), Ok(()));
    }
}

/// Test: changing any signed field breaks the signature
#[test]
fn test_check_signature_detects_tampering() {
    let a = assoc(AssociationType::HmacSha1);
    let mut signed = a.sign_message(&id_res()).unwrap();
    signed.set_arg(Namespace::OpenId, "identifier", "http://evil.example.com/");
    assert_eq!(
        a.check_message_signature(&signed),
        Err(Error::SignatureMismatch)
    );
}

/// Test: an unsigned field may change without affecting verification
#[test]
fn test_check_signature_ignores_unsigned_fields() {
    let a = assoc(AssociationType::HmacSha1);
    let mut signed = a.sign_message(&id_res()).unwrap();
    signed.set_arg(Namespace::Bare, "extra", "anything");
    assert_eq!(a.check_message_signature(&signed), Ok(()));
}

/// Test: a different secret fails verification
#[test]
fn test_check_signature_wrong_secret() {
    let signed = assoc(AssociationType::HmacSha1)
        .sign_message(&id_res())
        .unwrap();
    let other = Association::new(
        "{sha1}handle",
        b"other_secret".to_vec(),
        Utc::now(),
        Duration::hours(1),
        AssociationType::HmacSha1,
    );
    assert_eq!(
        other.check_message_signature(&signed),
        Err(Error::SignatureMismatch)
    );
}

/// Test: missing sig and undecodable sig are reported
#[test]
fn test_check_signature_missing_or_garbled() {
    let a = assoc(AssociationType::HmacSha1);
    let mut signed = a.sign_message(&id_res()).unwrap();

    signed.set_arg(Namespace::OpenId, "sig", "!!not base64!!");
    assert_eq!(
        a.check_message_signature(&signed),
        Err(Error::SignatureMismatch)
    );

    signed.del_arg(Namespace::OpenId, "sig");
    assert_eq!(
        a.check_message_signature(&signed),
        Err(Error::MissingSignature)
    );

    signed.del_arg(Namespace::OpenId, "signed");
    assert_eq!(
        a.check_message_signature(&signed),
        Err(Error::MissingSignedList)
    );
}

// =============================================================================
// Serialization
// =============================================================================

/// Test: serialize/deserialize preserves every field, even an awkward handle
#[test]
fn test_serialization_roundtrip() {
    let issued = DateTime::from_timestamp(1_200_000_000, 0).unwrap();
    let original = Association::new(
        "{HMAC-SHA1}{47a5b1c0}{a=b\nc%d:e\\f}",
        b"\x00\x01secret\xff".to_vec(),
        issued,
        Duration::seconds(600),
        AssociationType::HmacSha1,
    );

    let restored = Association::deserialize(&original.serialize()).unwrap();
    assert_eq!(restored, original);
    assert_eq!(restored.handle(), original.handle());
    assert_eq!(restored.secret(), original.secret());
    assert_eq!(restored.issued(), issued);
    assert_eq!(restored.lifetime(), Duration::seconds(600));
}

/// Test: the serialized form is one line per field
#[test]
fn test_serialization_is_line_oriented() {
    let original = Association::generate(Duration::hours(2), AssociationType::HmacSha256);
    let serialized = original.serialize();
    assert_eq!(serialized.lines().count(), 6);
    assert!(serialized.starts_with("version:2\n"));
}

/// Test: a lifetime too large for a duration is a malformed record, not a panic
#[test]
fn test_deserialize_out_of_range_lifetime() {
    let serialized = "version:2\nhandle:h\nsecret:c2VjcmV0\nissued:1000000\nlifetime:9223372036854775807\nassoc_type:HMAC-SHA1\n";
    assert!(matches!(
        Association::deserialize(serialized),
        Err(Error::MalformedAssociation(_))
    ));
}

/// Test: sub-second issue times are dropped
#[test]
fn test_issued_whole_seconds() {
    let issued = DateTime::from_timestamp(1_200_000_000, 999_000_000).unwrap();
    let a = Association::new("h", SECRET.to_vec(), issued, Duration::seconds(1), AssociationType::HmacSha1);
    assert_eq!(a.issued(), DateTime::from_timestamp(1_200_000_000, 0).unwrap());
}

// =============================================================================
// Properties
// =============================================================================

fn assoc_type_strategy() -> impl Strategy<Value = AssociationType> {
    prop_oneof![Just(AssociationType::HmacSha1), Just(AssociationType::HmacSha256)]
}

proptest! {
    /// Property: any handle and any secret bytes survive serialization
    #[test]
    fn prop_serialization_roundtrip(
        handle in "\\PC{0,40}",
        secret in proptest::collection::vec(any::<u8>(), 0..64),
        issued in 0i64..4_000_000_000,
        lifetime in 0i64..1_000_000,
        assoc_type in assoc_type_strategy(),
    ) {
        let original = Association::new(
            handle,
            secret,
            DateTime::from_timestamp(issued, 0).unwrap(),
            Duration::seconds(lifetime),
            assoc_type,
        );
        let restored = Association::deserialize(&original.serialize()).unwrap();
        prop_assert_eq!(restored, original);
    }

    /// Property: signing is deterministic and any change to a value changes the MAC
    #[test]
    fn prop_mac_sensitive_to_values(
        value in "[ -~]{1,32}",
        flip in any::<prop::sample::Index>(),
        assoc_type in assoc_type_strategy(),
    ) {
        let a = assoc(assoc_type);
        let original = a.sign(&[("mode", value.as_str())]).unwrap();
        prop_assert_eq!(&original, &a.sign(&[("mode", value.as_str())]).unwrap());

        let mut bytes = value.into_bytes();
        let i = flip.index(bytes.len());
        bytes[i] = if bytes[i] == b'a' { b'b' } else { b'a' };
        let changed = String::from_utf8(bytes).unwrap();
        prop_assert_ne!(original, a.sign(&[("mode", changed.as_str())]).unwrap());
    }
}
