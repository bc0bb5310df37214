//! BER-TLV as used by PIV key and certificate objects

use crate::error::{Error, Result};

pub mod tags {
    /// Dynamic authentication / public key template
    pub const PUBLIC_KEY_TEMPLATE: u16 = 0x7F49;
    pub const RSA_MODULUS: u16 = 0x81;
    pub const RSA_EXPONENT: u16 = 0x82;
    /// Uncompressed EC point, or the raw Ed25519 key
    pub const EC_POINT: u16 = 0x86;
    /// Private scalar in an ECC key import
    pub const ECC_PRIVATE: u16 = 0x06;
    pub const ED25519_PRIVATE: u16 = 0x07;
    pub const CERTIFICATE: u16 = 0x70;
    pub const CERT_INFO: u16 = 0x71;
    pub const ERROR_DETECTION: u16 = 0xFE;
}

/// Short form below 0x80, otherwise 0x80 | n followed by n length bytes
fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Encode one TLV; tags above 0xFF are written as two bytes
pub fn encode_tlv(tag: u16, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 6);
    if tag > 0xFF {
        out.extend_from_slice(&tag.to_be_bytes());
    } else {
        out.push(tag as u8);
    }
    encode_length(value.len(), &mut out);
    out.extend_from_slice(value);
    out
}

/// Split the first TLV off `data`, returning tag, value and the remainder
pub fn parse_tlv(data: &[u8]) -> Result<(u16, &[u8], &[u8])> {
    let short = || Error::InvalidPiv("truncated TLV".to_string());

    let (&first, rest) = data.split_first().ok_or_else(short)?;
    let (tag, rest) = if first & 0x1F == 0x1F {
        let (&second, rest) = rest.split_first().ok_or_else(short)?;
        (u16::from_be_bytes([first, second]), rest)
    } else {
        (first as u16, rest)
    };

    let (&len_byte, rest) = rest.split_first().ok_or_else(short)?;
    let (len, rest) = match len_byte {
        0x00..=0x7F => (len_byte as usize, rest),
        0x81..=0x84 => {
            let count = (len_byte & 0x7F) as usize;
            if rest.len() < count {
                return Err(short());
            }
            let (len_bytes, rest) = rest.split_at(count);
            let len = len_bytes.iter().fold(0usize, |acc, b| acc << 8 | *b as usize);
            (len, rest)
        }
        other => {
            return Err(Error::InvalidPiv(format!("unsupported length byte 0x{:02x}", other)));
        }
    };

    if rest.len() < len {
        return Err(short());
    }
    let (value, rest) = rest.split_at(len);
    Ok((tag, value, rest))
}

/// Every TLV in `data`, in order
pub fn parse_all(mut data: &[u8]) -> Result<Vec<(u16, &[u8])>> {
    let mut items = Vec::new();
    while !data.is_empty() {
        let (tag, value, rest) = parse_tlv(data)?;
        items.push((tag, value));
        data = rest;
    }
    Ok(items)
}

/// Value of the first TLV tagged `tag`
pub fn find(data: &[u8], tag: u16) -> Result<Option<&[u8]>> {
    Ok(parse_all(data)?.into_iter().find(|(t, _)| *t == tag).map(|(_, v)| v))
}

/// Wrap a DER certificate as a PIV certificate data object, uncompressed
pub fn certificate_object(der: &[u8]) -> Vec<u8> {
    let mut object = encode_tlv(tags::CERTIFICATE, der);
    object.extend_from_slice(&encode_tlv(tags::CERT_INFO, &[0x00]));
    object.extend_from_slice(&encode_tlv(tags::ERROR_DETECTION, &[]));
    object
}

/// DER certificate inside a PIV certificate data object
pub fn certificate_from_object(object: &[u8]) -> Result<&[u8]> {
    let items = parse_all(object)?;
    let der = items
        .iter()
        .find(|(t, _)| *t == tags::CERTIFICATE)
        .map(|(_, v)| *v)
        .ok_or_else(|| Error::InvalidPiv("no certificate (tag 0x70)".to_string()))?;
    if let Some((_, info)) = items.iter().find(|(t, _)| *t == tags::CERT_INFO)
        && info.first().is_some_and(|b| *b != 0)
    {
        return Err(Error::InvalidPiv("compressed certificates are not supported".to_string()));
    }
    Ok(der)
}
