//! Client operations against the in-memory authenticator

mod common;

use common::{
    EMPTY_LARGE_BLOB_ARRAY, ENROLL_SAMPLES, MAX_RETRIES, MockAuthenticator, MockCredential,
};

use keytest::fixtures::{TEST_RP_ID, test_rp};
use keytest::{
    Error, Fido2Client, KeyEntryRequest, LargeBlobArray, LargeBlobEntry, PinProtocol, RpInfo,
    StatusCode, TestKeyCollector, permissions,
};

const PIN: &str = "123456";

#[test]
fn test_get_info() {
    let mut client = Fido2Client::new(MockAuthenticator::new());
    let info = client.get_info().unwrap();
    assert!(info.supports_version("FIDO_2_1"));
    assert!(info.supports_client_pin());
    assert!(!info.pin_is_set());
    assert_eq!(info.preferred_pin_protocol(), PinProtocol::V2);
}

#[test]
fn test_set_pin_and_get_token() {
    common::init_logging();
    let mock = MockAuthenticator::new();
    let mut client = Fido2Client::new(mock.clone());

    client.set_pin(PIN).unwrap();
    assert!(mock.pin_matches(PIN));
    assert!(client.get_info().unwrap().pin_is_set());

    let token = client
        .get_pin_token(PIN, permissions::CREDENTIAL_MANAGEMENT, None)
        .unwrap();
    assert_eq!(token.protocol(), PinProtocol::V2);
    assert_eq!(mock.state().last_permissions, Some(permissions::CREDENTIAL_MANAGEMENT));
    assert_eq!(client.get_pin_retries().unwrap(), MAX_RETRIES);
}

#[test]
fn test_set_pin_twice_not_allowed() {
    let mut client = Fido2Client::new(MockAuthenticator::new().with_pin(PIN));
    assert!(matches!(
        client.set_pin("999999"),
        Err(Error::Ctap(StatusCode::NotAllowed))
    ));
}

#[test]
fn test_protocol_one_only() {
    let mock = MockAuthenticator::new().with_protocols(&[1]);
    let mut client = Fido2Client::new(mock.clone());
    client.set_pin(PIN).unwrap();
    let token = client.get_pin_token(PIN, permissions::BIO_ENROLLMENT, None).unwrap();
    assert_eq!(token.protocol(), PinProtocol::V1);
    assert_eq!(token.authenticate(b"message").len(), 16);
    assert!(mock.pin_matches(PIN));
}

#[test]
fn test_legacy_pin_token() {
    let mock = MockAuthenticator::new().with_pin(PIN);
    mock.state().supports_permissions = false;
    let mut client = Fido2Client::new(mock.clone());

    client.get_pin_token(PIN, permissions::CREDENTIAL_MANAGEMENT, None).unwrap();
    assert_eq!(mock.state().last_permissions, None);
}

#[test]
fn test_wrong_pin_decrements_retries() {
    let mut client = Fido2Client::new(MockAuthenticator::new().with_pin(PIN));
    let err = client.get_pin_token("000000", permissions::GET_ASSERTION, Some(TEST_RP_ID));
    assert!(matches!(err, Err(Error::Ctap(StatusCode::PinInvalid))));
    assert_eq!(client.get_pin_retries().unwrap(), MAX_RETRIES - 1);

    // success restores the counter
    client.get_pin_token(PIN, permissions::GET_ASSERTION, Some(TEST_RP_ID)).unwrap();
    assert_eq!(client.get_pin_retries().unwrap(), MAX_RETRIES);
}

#[test]
fn test_change_pin() {
    let mock = MockAuthenticator::new().with_pin(PIN);
    let mut client = Fido2Client::new(mock.clone());

    assert!(matches!(
        client.change_pin("000000", "654321"),
        Err(Error::Ctap(StatusCode::PinInvalid))
    ));
    client.change_pin(PIN, "654321").unwrap();
    assert!(mock.pin_matches("654321"));
}

#[test]
fn test_short_pin_rejected_before_sending() {
    let mock = MockAuthenticator::new();
    let mut client = Fido2Client::new(mock.clone());
    assert!(matches!(client.set_pin("12"), Err(Error::InvalidPin(_))));
    assert!(mock.state().commands.is_empty());
}

#[test]
fn test_collector_pin_retry_is_cancelled() {
    let mut client = Fido2Client::new(MockAuthenticator::new().with_pin(PIN));
    let collector = TestKeyCollector::with_pin("000000");

    let result = client.get_pin_token_with(&collector, permissions::BIO_ENROLLMENT, None);
    assert!(matches!(result, Err(Error::Cancelled)));

    let requests = collector.requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[0].is_retry);
    assert!(requests[1].is_retry);
    assert_eq!(requests[1].retries_remaining, Some(MAX_RETRIES - 1));
    assert_eq!(requests[2].request, KeyEntryRequest::Release);
}

#[test]
fn test_collector_pin_accepted() {
    let mut client = Fido2Client::new(MockAuthenticator::new().with_pin(PIN));
    let collector = TestKeyCollector::with_pin(PIN);
    client
        .get_pin_token_with(&collector, permissions::CREDENTIAL_MANAGEMENT, None)
        .unwrap();
    assert_eq!(collector.count(KeyEntryRequest::VerifyFido2Pin), 1);
    assert_eq!(collector.count(KeyEntryRequest::Release), 1);
}

#[test]
fn test_credential_management() {
    let mock = MockAuthenticator::new()
        .with_pin(PIN)
        .with_credential(MockCredential::new(TEST_RP_ID, "alice", &[1; 16]))
        .with_credential(MockCredential::new(TEST_RP_ID, "bob", &[2; 16]))
        .with_credential(MockCredential::new("other.example", "carol", &[3; 16]));
    let mut client = Fido2Client::new(mock.clone());
    let token = client
        .get_pin_token(PIN, permissions::CREDENTIAL_MANAGEMENT, None)
        .unwrap();

    let metadata = client.credentials_metadata(&token).unwrap();
    assert_eq!(metadata.existing_count, 3);
    assert_eq!(metadata.remaining_count, 22);

    let rps = client.enumerate_rps(&token).unwrap();
    let ids: Vec<&str> = rps.iter().map(|rp| rp.id.as_str()).collect();
    assert_eq!(ids, vec![TEST_RP_ID, "other.example"]);
    assert_eq!(rps[0].rp_id_hash, test_rp().rp_id_hash);

    let credentials = client.enumerate_credentials(&token, &rps[0].rp_id_hash).unwrap();
    let names: Vec<_> = credentials
        .iter()
        .map(|c| c.user.name.clone().unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(credentials[1].credential_id, vec![2; 16]);
    assert_eq!(credentials[0].cred_protect, Some(2));

    client.delete_credential(&token, &[1; 16]).unwrap();
    assert_eq!(client.enumerate_credentials(&token, &rps[0].rp_id_hash).unwrap().len(), 1);
    assert!(matches!(
        client.delete_credential(&token, &[9; 16]),
        Err(Error::Ctap(StatusCode::NoCredentials))
    ));
}

#[test]
fn test_empty_credential_store() {
    let mut client = Fido2Client::new(MockAuthenticator::new().with_pin(PIN));
    let token = client
        .get_pin_token(PIN, permissions::CREDENTIAL_MANAGEMENT, None)
        .unwrap();
    assert!(client.enumerate_rps(&token).unwrap().is_empty());
    let unknown = RpInfo::new("nobody.example", None);
    assert!(client.enumerate_credentials(&token, &unknown.rp_id_hash).unwrap().is_empty());
}

#[test]
fn test_stale_token_rejected() {
    let mock = MockAuthenticator::new().with_pin(PIN);
    let mut client = Fido2Client::new(mock.clone());
    let token = client
        .get_pin_token(PIN, permissions::CREDENTIAL_MANAGEMENT, None)
        .unwrap();
    client.reset().unwrap();
    assert!(matches!(
        client.credentials_metadata(&token),
        Err(Error::Ctap(StatusCode::PinAuthInvalid))
    ));
}

#[test]
fn test_bio_enrollment() {
    let mock = MockAuthenticator::bio().with_pin(PIN);
    let mut client = Fido2Client::new(mock.clone());
    let token = client.get_pin_token(PIN, permissions::BIO_ENROLLMENT, None).unwrap();

    // empty sensor answers InvalidOption
    assert!(client.bio_enumerate_enrollments(&token).unwrap().is_empty());

    let mut sample = client.bio_enroll_begin(&token, Some(10_000)).unwrap();
    assert_eq!(sample.remaining_samples, ENROLL_SAMPLES - 1);
    while sample.remaining_samples > 0 {
        sample = client
            .bio_enroll_capture_next(&token, &sample.template_id, None)
            .unwrap();
        assert_eq!(sample.last_sample_status, 0);
    }

    client
        .bio_set_friendly_name(&token, &sample.template_id, "right thumb")
        .unwrap();
    let templates = client.bio_enumerate_enrollments(&token).unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].template_id, sample.template_id);
    assert_eq!(templates[0].friendly_name.as_deref(), Some("right thumb"));

    client.bio_remove_enrollment(&token, &sample.template_id).unwrap();
    assert!(client.bio_enumerate_enrollments(&token).unwrap().is_empty());
    assert!(matches!(
        client.bio_remove_enrollment(&token, &sample.template_id),
        Err(Error::Ctap(StatusCode::InvalidOption))
    ));
}

#[test]
fn test_bio_cancel() {
    let mock = MockAuthenticator::bio().with_pin(PIN);
    let mut client = Fido2Client::new(mock.clone());
    let token = client.get_pin_token(PIN, permissions::BIO_ENROLLMENT, None).unwrap();

    let sample = client.bio_enroll_begin(&token, None).unwrap();
    client.bio_cancel_enrollment().unwrap();
    assert!(client
        .bio_enroll_capture_next(&token, &sample.template_id, None)
        .is_err());
    assert!(mock.state().templates.is_empty());
}

#[test]
fn test_large_blob_store_starts_empty() {
    let mut client = Fido2Client::new(MockAuthenticator::new());
    assert_eq!(client.read_large_blobs().unwrap(), EMPTY_LARGE_BLOB_ARRAY.to_vec());
    assert!(client.large_blob_array().unwrap().entries.is_empty());
}

#[test]
fn test_large_blob_write_in_fragments() {
    let mock = MockAuthenticator::new().with_pin(PIN);
    // 64-byte fragments force the array across several set/get requests
    mock.state().max_msg_size = 128;
    let mut client = Fido2Client::new(mock.clone());
    let token = client.get_pin_token(PIN, permissions::LARGE_BLOB_WRITE, None).unwrap();

    let key = [0x42u8; 32];
    let payload = vec![0xA5; 150];
    let array = LargeBlobArray {
        entries: vec![
            LargeBlobEntry::seal(&key, &payload, 150).unwrap(),
            LargeBlobEntry::seal(&[0x24; 32], b"other credential", 16).unwrap(),
        ],
    };
    client.write_large_blob_array(&token, &array).unwrap();
    assert!(mock.state().large_blobs.len() > 64 * 3);

    let stored = client.large_blob_array().unwrap();
    assert_eq!(stored, array);
    assert_eq!(stored.find(&key), Some(payload));
}

#[test]
fn test_large_blob_write_needs_permission() {
    let mock = MockAuthenticator::new().with_pin(PIN);
    let mut client = Fido2Client::new(mock.clone());
    let token = client
        .get_pin_token(PIN, permissions::CREDENTIAL_MANAGEMENT, None)
        .unwrap();

    let array = LargeBlobArray {
        entries: vec![LargeBlobEntry::seal(&[1; 32], b"x", 1).unwrap()],
    };
    assert!(matches!(
        client.write_large_blob_array(&token, &array),
        Err(Error::Ctap(StatusCode::UnauthorizedPermission))
    ));
    assert_eq!(mock.state().large_blobs, EMPTY_LARGE_BLOB_ARRAY.to_vec());
}
