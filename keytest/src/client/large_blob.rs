//! authenticatorLargeBlobs (0x0C)

use super::{Fido2Client, PinToken};

use crate::cbor::{MapBuilder, MapView, bytes, int};
use crate::ctap::{self, CtapCommand, CtapConnection, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use crate::large_blob::LargeBlobArray;

use sha2::{Digest, Sha256};

mod req_keys {
    pub const GET: i32 = 0x01;
    pub const SET: i32 = 0x02;
    pub const OFFSET: i32 = 0x03;
    pub const LENGTH: i32 = 0x04;
    pub const PIN_UV_AUTH_PARAM: i32 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOL: i32 = 0x06;
}

mod resp_keys {
    pub const CONFIG: i128 = 0x01;
}

/// Message a `set` fragment is authenticated over
///
/// 32 × 0xff || 0x0c 0x00 || offset (u32 LE) || SHA-256(fragment)
fn set_auth_message(offset: u32, fragment: &[u8]) -> Vec<u8> {
    let mut message = vec![0xff; 32];
    message.extend_from_slice(&[CtapCommand::LargeBlobs.as_u8(), 0x00]);
    message.extend_from_slice(&offset.to_le_bytes());
    message.extend_from_slice(&Sha256::digest(fragment));
    message
}

impl<C: CtapConnection> Fido2Client<C> {
    fn large_blobs(&mut self, request: MapBuilder) -> Result<Option<Vec<u8>>> {
        let body = ctap::send(
            &mut self.conn,
            CtapCommand::LargeBlobs,
            Some(&request.build()),
            DEFAULT_TIMEOUT,
        )?;
        let Some(body) = body else {
            return Ok(None);
        };
        let config = MapView::new(&body)?.require_bytes(resp_keys::CONFIG, "config")?;
        Ok(Some(config.to_vec()))
    }

    /// Serialized large-blob array as stored, trailer included
    pub fn read_large_blobs(&mut self) -> Result<Vec<u8>> {
        if !self.info()?.supports_large_blobs() {
            return Err(Error::NotSupported("largeBlobs"));
        }
        let fragment = self.info()?.max_fragment_length();

        let mut serialized = Vec::new();
        loop {
            let request = MapBuilder::new()
                .insert(req_keys::GET, int(fragment as u64))
                .insert(req_keys::OFFSET, int(serialized.len() as u64));
            let chunk = self.large_blobs(request)?.ok_or_else(|| {
                Error::InvalidResponse("empty largeBlobs get response".to_string())
            })?;
            let done = chunk.len() < fragment;
            serialized.extend_from_slice(&chunk);
            if done {
                break;
            }
        }
        log::debug!("read {} bytes of large-blob array", serialized.len());
        Ok(serialized)
    }

    /// Read and check the large-blob array
    pub fn large_blob_array(&mut self) -> Result<LargeBlobArray> {
        LargeBlobArray::parse(&self.read_large_blobs()?)
    }

    /// Replace the stored array with `array`
    ///
    /// `token` needs the `LARGE_BLOB_WRITE` permission. Arrays larger than one
    /// fragment are written in order; the first fragment announces the
    /// total length.
    pub fn write_large_blob_array(
        &mut self,
        token: &PinToken,
        array: &LargeBlobArray,
    ) -> Result<()> {
        if !self.info()?.supports_large_blobs() {
            return Err(Error::NotSupported("largeBlobs"));
        }
        let fragment = self.info()?.max_fragment_length();
        let serialized = array.serialize()?;
        let total = u32::try_from(serialized.len())
            .map_err(|_| Error::NotSupported("large-blob arrays over 4 GiB"))?;

        for (index, chunk) in serialized.chunks(fragment).enumerate() {
            let offset = (index * fragment) as u32;
            let auth = token.authenticate(&set_auth_message(offset, chunk));
            let request = MapBuilder::new()
                .insert(req_keys::SET, bytes(chunk))
                .insert(req_keys::OFFSET, int(offset))
                .insert_opt(req_keys::LENGTH, (offset == 0).then(|| int(total)))
                .insert(req_keys::PIN_UV_AUTH_PARAM, bytes(&auth))
                .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(token.protocol().as_u8()));
            self.large_blobs(request)?;
        }
        log::info!(
            "wrote large-blob array: {} entries, {} bytes",
            array.entries.len(),
            total
        );
        Ok(())
    }
}
