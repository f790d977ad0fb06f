//! FairPlay init data helpers

use crate::config::EmeOptions;
use crate::license::ContentIdResolver;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use url::Url;

const SKD_SCHEME: &str = "skd://";

/// Encode a string as UTF-16LE bytes
pub fn encode_utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode UTF-16LE bytes; a trailing odd byte is ignored
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Default FairPlay content id: the host of the `skd://` URI carried in the
/// init data, or the decoded init data itself when there is none.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkdContentId;

impl ContentIdResolver for SkdContentId {
    fn content_id(&self, _options: &EmeOptions, init_data: &[u8]) -> Option<String> {
        let decoded = decode_utf16le(init_data);
        let host = decoded
            .find(SKD_SCHEME)
            .and_then(|start| Url::parse(decoded[start..].trim_end_matches('\0')).ok())
            .and_then(|uri| uri.host_str().map(str::to_string));
        Some(host.unwrap_or(decoded))
    }
}

/// Build the FairPlay session payload:
/// `[init data][u32 LE id length][id UTF-16LE][u32 LE cert length][cert]`
pub fn concat_init_data_id_and_certificate(init_data: &[u8], id: &str, certificate: &[u8]) -> Bytes {
    let id = encode_utf16le(id);
    let mut buf = BytesMut::with_capacity(init_data.len() + 8 + id.len() + certificate.len());
    buf.put_slice(init_data);
    buf.put_u32_le(id.len() as u32);
    buf.put_slice(&id);
    buf.put_u32_le(certificate.len() as u32);
    buf.put_slice(certificate);
    buf.freeze()
}

/// Fields recovered from a concatenated FairPlay payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FairPlayInitData {
    pub init_data: Bytes,
    pub id: String,
    pub certificate: Bytes,
}

/// Inverse of `concat_init_data_id_and_certificate`
pub fn split_init_data_id_and_certificate(buffer: &[u8], init_data_len: usize) -> Result<FairPlayInitData> {
    if buffer.len() < init_data_len {
        return Err(Error::InvalidInitData(format!(
            "buffer of {} bytes is shorter than init data length {}",
            buffer.len(),
            init_data_len
        )));
    }

    let mut buf = Bytes::copy_from_slice(buffer);
    let init_data = buf.split_to(init_data_len);

    let id = take_prefixed(&mut buf, "content id")?;
    if id.len() % 2 != 0 {
        return Err(Error::InvalidInitData(format!(
            "content id length {} is not a whole number of UTF-16 units",
            id.len()
        )));
    }
    let certificate = take_prefixed(&mut buf, "certificate")?;

    if buf.has_remaining() {
        return Err(Error::InvalidInitData(format!(
            "{} trailing bytes after certificate",
            buf.remaining()
        )));
    }

    Ok(FairPlayInitData {
        init_data,
        id: decode_utf16le(&id),
        certificate,
    })
}

fn take_prefixed(buf: &mut Bytes, field: &str) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(Error::InvalidInitData(format!("missing {field} length")));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(Error::InvalidInitData(format!(
            "{field} length {len} exceeds remaining {} bytes",
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}
