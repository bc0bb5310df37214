//! Key collector: how flows ask the tester (or a test double) for input
//!
//! Flows never block on a terminal. Whenever they need a PIN, a touch, a
//! fingerprint or a re-insertion they hand a [`KeyEntryData`] to a
//! [`KeyCollector`] and act on its [`KeyEntryResponse`].

use std::sync::{Mutex, PoisonError};

use zeroize::Zeroizing;

/// What a flow is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEntryRequest {
    /// The previous request is over; dismiss any prompt
    Release,
    TouchRequest,
    VerifyFido2Pin,
    SetFido2Pin,
    ChangeFido2Pin,
    VerifyFido2Uv,
    EnrollFingerprint,
    /// Remove and re-insert the key
    Reinsert,
}

/// One request handed to a collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntryData {
    pub request: KeyEntryRequest,
    /// Set when the previous answer to the same request was rejected
    pub is_retry: bool,
    pub retries_remaining: Option<u32>,
    /// Samples still needed, for `EnrollFingerprint`
    pub samples_remaining: Option<u32>,
    /// lastEnrollSampleStatus of the previous sample
    pub last_sample_status: Option<u8>,
}

impl KeyEntryData {
    pub fn new(request: KeyEntryRequest) -> Self {
        Self {
            request,
            is_retry: false,
            retries_remaining: None,
            samples_remaining: None,
            last_sample_status: None,
        }
    }

    pub fn retry(mut self, retries_remaining: Option<u32>) -> Self {
        self.is_retry = true;
        self.retries_remaining = retries_remaining;
        self
    }

    pub fn enroll_progress(mut self, samples_remaining: u32, last_sample_status: u8) -> Self {
        self.samples_remaining = Some(samples_remaining);
        self.last_sample_status = Some(last_sample_status);
        self
    }
}

/// A collector's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEntryResponse {
    /// Acknowledged, nothing to submit (touch, reinsert, release)
    Continue,
    /// PIN for a PIN request
    Submit(Zeroizing<String>),
    Cancel,
}

/// Source of user input for flows
///
/// Called from the flow's thread and from its notification task.
pub trait KeyCollector: Send + Sync {
    fn collect(&self, data: &KeyEntryData) -> KeyEntryResponse;
}

impl<F> KeyCollector for F
where
    F: Fn(&KeyEntryData) -> KeyEntryResponse + Send + Sync,
{
    fn collect(&self, data: &KeyEntryData) -> KeyEntryResponse {
        self(data)
    }
}

/// PIN the harness sets and verifies when a test names none
pub const DEFAULT_TEST_PIN: &str = "123456";

/// PIN used as the replacement in change-PIN flows
pub const DEFAULT_NEW_PIN: &str = "654321";

/// Collector for automated tests
///
/// Answers PIN requests with fixed values, acknowledges everything else, and
/// cancels any retry so a wrong PIN cannot burn through the retry counter.
/// Every request is recorded for later assertions.
#[derive(Debug)]
pub struct TestKeyCollector {
    pin: String,
    new_pin: String,
    requests: Mutex<Vec<KeyEntryData>>,
}

impl Default for TestKeyCollector {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_PIN, DEFAULT_NEW_PIN)
    }
}

impl TestKeyCollector {
    pub fn new(pin: &str, new_pin: &str) -> Self {
        Self {
            pin: pin.to_string(),
            new_pin: new_pin.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pin(pin: &str) -> Self {
        Self::new(pin, DEFAULT_NEW_PIN)
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// Requests seen so far, oldest first
    pub fn requests(&self) -> Vec<KeyEntryData> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, request: KeyEntryRequest) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| d.request == request)
            .count()
    }
}

impl KeyCollector for TestKeyCollector {
    fn collect(&self, data: &KeyEntryData) -> KeyEntryResponse {
        log::debug!("key collector: {:?} (retry: {})", data.request, data.is_retry);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.clone());

        if data.is_retry {
            return KeyEntryResponse::Cancel;
        }
        match data.request {
            KeyEntryRequest::VerifyFido2Pin | KeyEntryRequest::SetFido2Pin => {
                KeyEntryResponse::Submit(Zeroizing::new(self.pin.clone()))
            }
            KeyEntryRequest::ChangeFido2Pin => {
                KeyEntryResponse::Submit(Zeroizing::new(self.new_pin.clone()))
            }
            KeyEntryRequest::Release
            | KeyEntryRequest::TouchRequest
            | KeyEntryRequest::VerifyFido2Uv
            | KeyEntryRequest::EnrollFingerprint
            | KeyEntryRequest::Reinsert => KeyEntryResponse::Continue,
        }
    }
}
