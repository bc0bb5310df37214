//! authenticatorBioEnrollment (0x09), fingerprint modality only

use super::{Fido2Client, PinToken};

use crate::cbor::{self, MapBuilder, MapView, Value, bytes, int, text};
use crate::ctap::{self, CtapCommand, CtapConnection, DEFAULT_TIMEOUT, USER_ACTION_TIMEOUT};
use crate::error::{Error, Result};
use crate::response::{EnrollSample, TemplateInfo};
use crate::status::StatusCode;

use std::time::Duration;

const MODALITY_FINGERPRINT: u8 = 0x01;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubCommand {
    EnrollBegin = 0x01,
    EnrollCaptureNextSample = 0x02,
    CancelCurrentEnrollment = 0x03,
    EnumerateEnrollments = 0x04,
    SetFriendlyName = 0x05,
    RemoveEnrollment = 0x06,
}

mod req_keys {
    pub const MODALITY: i32 = 0x01;
    pub const SUBCOMMAND: i32 = 0x02;
    pub const SUBCOMMAND_PARAMS: i32 = 0x03;
    pub const PIN_UV_AUTH_PROTOCOL: i32 = 0x04;
    pub const PIN_UV_AUTH_PARAM: i32 = 0x05;
}

mod subparam_keys {
    pub const TEMPLATE_ID: i32 = 0x01;
    pub const TEMPLATE_FRIENDLY_NAME: i32 = 0x02;
    pub const TIMEOUT_MILLISECONDS: i32 = 0x03;
}

mod resp_keys {
    pub const TEMPLATE_ID: i128 = 0x04;
    pub const LAST_ENROLL_SAMPLE_STATUS: i128 = 0x05;
    pub const REMAINING_SAMPLES: i128 = 0x06;
    pub const TEMPLATE_INFOS: i128 = 0x07;
}

impl<C: CtapConnection> Fido2Client<C> {
    fn bio(
        &mut self,
        sub: SubCommand,
        params: Option<Value>,
        token: Option<&PinToken>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let mut request = MapBuilder::new()
            .insert(req_keys::MODALITY, int(MODALITY_FINGERPRINT))
            .insert(req_keys::SUBCOMMAND, int(sub as u8));

        if let Some(token) = token {
            let mut message = vec![MODALITY_FINGERPRINT, sub as u8];
            if let Some(params) = &params {
                message.extend_from_slice(&cbor::encode(params)?);
            }
            request = request
                .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(token.protocol().as_u8()))
                .insert(req_keys::PIN_UV_AUTH_PARAM, bytes(&token.authenticate(&message)));
        }
        request = request.insert_opt(req_keys::SUBCOMMAND_PARAMS, params);

        ctap::send(
            &mut self.conn,
            CtapCommand::BioEnrollment,
            Some(&request.build()),
            timeout,
        )
    }

    /// Enrolled fingerprint templates
    ///
    /// A sensor with no enrollments answers `InvalidOption`, reported here as
    /// an empty list.
    pub fn bio_enumerate_enrollments(&mut self, token: &PinToken) -> Result<Vec<TemplateInfo>> {
        let result = self.bio(SubCommand::EnumerateEnrollments, None, Some(token), DEFAULT_TIMEOUT);
        let body = match result {
            Ok(Some(body)) => body,
            Ok(None) | Err(Error::Ctap(StatusCode::InvalidOption)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        MapView::new(&body)?
            .array(resp_keys::TEMPLATE_INFOS)
            .unwrap_or_default()
            .iter()
            .map(TemplateInfo::from_value)
            .collect()
    }

    /// Start an enrollment and capture its first sample
    pub fn bio_enroll_begin(
        &mut self,
        token: &PinToken,
        timeout_ms: Option<u32>,
    ) -> Result<EnrollSample> {
        let params = timeout_ms.map(|ms| {
            MapBuilder::new()
                .insert(subparam_keys::TIMEOUT_MILLISECONDS, int(ms))
                .build()
        });
        let body = self
            .bio(SubCommand::EnrollBegin, params, Some(token), USER_ACTION_TIMEOUT)?
            .ok_or_else(|| Error::InvalidResponse("empty enrollBegin response".to_string()))?;
        let view = MapView::new(&body)?;
        sample(view, view.require_bytes(resp_keys::TEMPLATE_ID, "templateId")?)
    }

    pub fn bio_enroll_capture_next(
        &mut self,
        token: &PinToken,
        template_id: &[u8],
        timeout_ms: Option<u32>,
    ) -> Result<EnrollSample> {
        let params = MapBuilder::new()
            .insert(subparam_keys::TEMPLATE_ID, bytes(template_id))
            .insert_opt(subparam_keys::TIMEOUT_MILLISECONDS, timeout_ms.map(int))
            .build();
        let body = self
            .bio(
                SubCommand::EnrollCaptureNextSample,
                Some(params),
                Some(token),
                USER_ACTION_TIMEOUT,
            )?
            .ok_or_else(|| Error::InvalidResponse("empty captureNextSample response".to_string()))?;
        sample(MapView::new(&body)?, template_id)
    }

    pub fn bio_cancel_enrollment(&mut self) -> Result<()> {
        self.bio(SubCommand::CancelCurrentEnrollment, None, None, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    pub fn bio_set_friendly_name(
        &mut self,
        token: &PinToken,
        template_id: &[u8],
        name: &str,
    ) -> Result<()> {
        let params = MapBuilder::new()
            .insert(subparam_keys::TEMPLATE_ID, bytes(template_id))
            .insert(subparam_keys::TEMPLATE_FRIENDLY_NAME, text(name))
            .build();
        self.bio(SubCommand::SetFriendlyName, Some(params), Some(token), DEFAULT_TIMEOUT)?;
        Ok(())
    }

    pub fn bio_remove_enrollment(&mut self, token: &PinToken, template_id: &[u8]) -> Result<()> {
        let params = MapBuilder::new()
            .insert(subparam_keys::TEMPLATE_ID, bytes(template_id))
            .build();
        self.bio(SubCommand::RemoveEnrollment, Some(params), Some(token), DEFAULT_TIMEOUT)?;
        log::info!("removed fingerprint template {}", hex::encode(template_id));
        Ok(())
    }
}

fn sample(view: MapView<'_>, template_id: &[u8]) -> Result<EnrollSample> {
    let status = view.require_int(resp_keys::LAST_ENROLL_SAMPLE_STATUS, "lastEnrollSampleStatus")?;
    let remaining = view.require_int(resp_keys::REMAINING_SAMPLES, "remainingSamples")?;
    Ok(EnrollSample {
        template_id: template_id.to_vec(),
        last_sample_status: status as u8,
        remaining_samples: remaining as u32,
    })
}
