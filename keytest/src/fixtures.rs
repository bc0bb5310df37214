//! Shared test data and the bio-key fixture

use crate::client::{Fido2Client, permissions};
use crate::collector::{KeyCollector, KeyEntryData, KeyEntryRequest, KeyEntryResponse};
use crate::ctap::CtapConnection;
use crate::error::{Error, Result};
use crate::response::{RpInfo, TemplateInfo, UserEntity};

use sha2::{Digest, Sha256};

pub const TEST_RP_ID: &str = "keytest.example";
pub const TEST_RP_NAME: &str = "Keytest RP";
pub const TEST_USER_ID: [u8; 16] = *b"keytest-user-001";
pub const TEST_USER_NAME: &str = "keytest";
pub const TEST_USER_DISPLAY_NAME: &str = "Keytest User";

/// Name given to a fingerprint the fixture enrolls
pub const ENROLLED_FINGER_NAME: &str = "keytest finger";

const TEST_CLIENT_DATA: &str =
    r#"{"type":"webauthn.create","challenge":"a2V5dGVzdA","origin":"https://keytest.example"}"#;

pub fn test_rp() -> RpInfo {
    RpInfo::new(TEST_RP_ID, Some(TEST_RP_NAME))
}

pub fn test_user() -> UserEntity {
    UserEntity {
        id: TEST_USER_ID.to_vec(),
        name: Some(TEST_USER_NAME.to_string()),
        display_name: Some(TEST_USER_DISPLAY_NAME.to_string()),
    }
}

/// SHA-256 of a fixed clientDataJSON
pub fn client_data_hash() -> [u8; 32] {
    Sha256::digest(TEST_CLIENT_DATA.as_bytes()).into()
}

/// A bio key with a PIN and at least one enrolled fingerprint
#[derive(Debug, Clone)]
pub struct BioFixture {
    pub templates: Vec<TemplateInfo>,
    /// Whether setup had to enroll a finger
    pub enrolled: bool,
    pub rp: RpInfo,
    pub user: UserEntity,
    pub client_data_hash: [u8; 32],
}

impl BioFixture {
    /// Bring the key into the fixture state
    ///
    /// Sets a PIN when none is set (asking `collector` for it), then enrolls a
    /// fingerprint when the sensor has none, prompting `EnrollFingerprint`
    /// before every sample.
    pub fn setup<C, K>(client: &mut Fido2Client<C>, collector: &K) -> Result<Self>
    where
        C: CtapConnection,
        K: KeyCollector + ?Sized,
    {
        let info = client.get_info()?;
        if !info.supports_bio_enrollment() {
            return Err(Error::NotSupported("bio enrollment"));
        }

        if !info.pin_is_set() {
            let response = collector.collect(&KeyEntryData::new(KeyEntryRequest::SetFido2Pin));
            collector.collect(&KeyEntryData::new(KeyEntryRequest::Release));
            match response {
                KeyEntryResponse::Submit(pin) => client.set_pin(&pin)?,
                _ => return Err(Error::Cancelled),
            }
        }

        let token = client.get_pin_token_with(collector, permissions::BIO_ENROLLMENT, None)?;
        let mut templates = client.bio_enumerate_enrollments(&token)?;
        let enrolled = templates.is_empty();

        if enrolled {
            log::info!("no fingerprints enrolled, enrolling one");
            let prompt = KeyEntryData::new(KeyEntryRequest::EnrollFingerprint);
            if collector.collect(&prompt) == KeyEntryResponse::Cancel {
                return Err(Error::Cancelled);
            }
            let mut sample = client.bio_enroll_begin(&token, None)?;
            while sample.remaining_samples > 0 {
                let prompt = KeyEntryData::new(KeyEntryRequest::EnrollFingerprint)
                    .enroll_progress(sample.remaining_samples, sample.last_sample_status);
                if collector.collect(&prompt) == KeyEntryResponse::Cancel {
                    collector.collect(&KeyEntryData::new(KeyEntryRequest::Release));
                    client.bio_cancel_enrollment()?;
                    return Err(Error::Cancelled);
                }
                sample = client.bio_enroll_capture_next(&token, &sample.template_id, None)?;
            }
            collector.collect(&KeyEntryData::new(KeyEntryRequest::Release));

            client.bio_set_friendly_name(&token, &sample.template_id, ENROLLED_FINGER_NAME)?;
            templates = client.bio_enumerate_enrollments(&token)?;
        }

        Ok(Self {
            templates,
            enrolled,
            rp: test_rp(),
            user: test_user(),
            client_data_hash: client_data_hash(),
        })
    }
}
