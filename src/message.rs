//! SNMPv2c message envelope.
//!
//! [`SnmpMessage`] decodes just enough of the envelope to route and
//! cache: version, community, PDU type and request ID. Everything after
//! the request ID (error fields and the varbind list) is carried as an
//! opaque tail, so the proxy stays transparent below the request-ID
//! level.
//!
//! The declared envelope and PDU lengths are kept on the struct; the
//! mutators adjust them so a message can be re-serialized after its
//! community, PDU type or tail have been swapped.

use crate::ber;
use crate::error::{Error, Result};

/// Outer message tag (SEQUENCE).
const SEQUENCE_TAG: u8 = 0x30;
/// Community string tag (OCTET STRING).
const OCTET_STRING_TAG: u8 = 0x04;
/// Request ID tag (INTEGER).
const INTEGER_TAG: u8 = 0x02;
/// Version field for SNMPv2c: INTEGER 1.
const V2C_VERSION: [u8; 3] = [0x02, 0x01, 0x01];

/// Offset of the error-status octet within the opaque PDU tail
/// (`02 01 <error-status>` follows the request ID).
const ERROR_STATUS_OFFSET: usize = 2;

/// SNMP error-status `resourceUnavailable` (RFC 3416).
pub const RESOURCE_UNAVAILABLE: u8 = 0x0D;

/// PDU type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    GetRequest = 0xA0,
    GetNextRequest = 0xA1,
    GetResponse = 0xA2,
    GetBulkRequest = 0xA5,
}

impl PduType {
    /// Create from tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0xA0 => Some(Self::GetRequest),
            0xA1 => Some(Self::GetNextRequest),
            0xA2 => Some(Self::GetResponse),
            0xA5 => Some(Self::GetBulkRequest),
            _ => None,
        }
    }

    /// Get the tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// True for the request types the proxy forwards.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::GetRequest | Self::GetNextRequest | Self::GetBulkRequest
        )
    }
}

impl std::fmt::Display for PduType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GetRequest => write!(f, "GetRequest"),
            Self::GetNextRequest => write!(f, "GetNextRequest"),
            Self::GetResponse => write!(f, "GetResponse"),
            Self::GetBulkRequest => write!(f, "GetBulkRequest"),
        }
    }
}

/// A decoded SNMPv2c message.
///
/// The community string is split at the first `@`: the prefix routes
/// (or authenticates) and the `@index` context suffix is kept separately
/// so callers can re-attach it toward the backend. The serialized form
/// carries the prefix only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpMessage {
    /// Declared envelope payload length.
    length: u64,
    /// Community string up to (not including) any `@`.
    community: String,
    /// Context suffix including the leading `@`, or empty.
    community_index: String,
    pdu_type: PduType,
    /// Declared inner PDU length.
    pdu_length: u64,
    /// Four request-ID bytes exactly as they appeared on the wire.
    request_id: [u8; 4],
    /// Opaque tail after the request ID: error fields + varbind list.
    data: Vec<u8>,
}

impl SnmpMessage {
    /// Parse a datagram into an [`SnmpMessage`].
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 7 {
            return Err(fail("datagram too short"));
        }

        if buf[0] != SEQUENCE_TAG {
            return Err(fail("not a sequence"));
        }

        let mut pos = 1;
        let (length, consumed) =
            ber::decode_uint(&buf[pos..]).ok_or_else(|| fail("bad envelope length"))?;
        if length == 0 {
            return Err(fail("zero envelope length"));
        }
        pos += consumed;

        if buf.len() < pos + 3 || buf[pos..pos + 3] != V2C_VERSION {
            return Err(fail("not SNMPv2c"));
        }
        pos += 3;

        if buf.get(pos) != Some(&OCTET_STRING_TAG) {
            return Err(fail("community is not a string"));
        }
        pos += 1;

        let (community_len, consumed) =
            ber::decode_uint(&buf[pos..]).ok_or_else(|| fail("bad community length"))?;
        if community_len == 0 {
            return Err(fail("empty community"));
        }
        pos += consumed;

        if ((buf.len() - pos) as u64) < community_len {
            return Err(fail("truncated community"));
        }
        let community_len = community_len as usize;
        let raw_community = std::str::from_utf8(&buf[pos..pos + community_len])
            .map_err(|_| fail("community is not UTF-8"))?;
        pos += community_len;

        // Split off the "@index" context suffix. The serialized form
        // carries the prefix only, so the suffix leaves the envelope.
        let (community, community_index) = match raw_community.find('@') {
            Some(at) => (
                raw_community[..at].to_string(),
                raw_community[at..].to_string(),
            ),
            None => (raw_community.to_string(), String::new()),
        };
        let length = length.saturating_sub(community_index.len() as u64);

        if buf.len() < pos + 5 {
            return Err(fail("truncated PDU"));
        }

        let pdu_type = PduType::from_tag(buf[pos]).ok_or_else(|| fail("unsupported PDU type"))?;
        pos += 1;

        let (pdu_length, consumed) =
            ber::decode_uint(&buf[pos..]).ok_or_else(|| fail("bad PDU length"))?;
        pos += consumed;

        if buf.get(pos) != Some(&INTEGER_TAG) {
            return Err(fail("request ID is not an integer"));
        }
        pos += 1;
        if buf.get(pos) != Some(&4) {
            return Err(fail("request ID is not 4 bytes"));
        }
        pos += 1;

        if buf.len() < pos + 4 {
            return Err(fail("truncated request ID"));
        }
        let request_id = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        pos += 4;

        Ok(SnmpMessage {
            length,
            community,
            community_index,
            pdu_type,
            pdu_length,
            request_id,
            data: buf[pos..].to_vec(),
        })
    }

    /// Serialize back into a datagram.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.length as usize);

        out.push(SEQUENCE_TAG);
        let (buf, len) = ber::encode_uint(self.length);
        out.extend_from_slice(&buf[..len]);

        out.extend_from_slice(&V2C_VERSION);

        out.push(OCTET_STRING_TAG);
        let (buf, len) = ber::encode_uint(self.community.len() as u64);
        out.extend_from_slice(&buf[..len]);
        out.extend_from_slice(self.community.as_bytes());

        out.push(self.pdu_type.tag());
        let (buf, len) = ber::encode_uint(self.pdu_length);
        out.extend_from_slice(&buf[..len]);

        out.push(INTEGER_TAG);
        out.push(4);
        out.extend_from_slice(&self.request_id);

        out.extend_from_slice(&self.data);
        out
    }

    /// Declared envelope payload length.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The community prefix (routing label on ingress).
    pub fn community(&self) -> &str {
        &self.community
    }

    /// The `@index` context suffix including the `@`, or `""`.
    pub fn community_index(&self) -> &str {
        &self.community_index
    }

    pub fn pdu_type(&self) -> PduType {
        self.pdu_type
    }

    /// Declared inner PDU length.
    pub fn pdu_length(&self) -> u64 {
        self.pdu_length
    }

    /// The request ID, bit-exact as received.
    pub fn request_id(&self) -> [u8; 4] {
        self.request_id
    }

    /// The opaque tail after the request ID.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the community, keeping the envelope length consistent.
    pub fn set_community(&mut self, community: impl Into<String>) {
        let community = community.into();
        let old = self.community.len() as u64;
        let new = community.len() as u64;
        let delta = (new + ber::encoded_len(new) as u64) as i64
            - (old + ber::encoded_len(old) as u64) as i64;
        self.length = self.length.checked_add_signed(delta).unwrap_or(0);
        self.community = community;
    }

    /// Replace the PDU type. The tag is one byte, so no length changes.
    pub fn set_pdu_type(&mut self, pdu_type: PduType) {
        self.pdu_type = pdu_type;
    }

    /// Overwrite the error-status octet inside the PDU tail.
    ///
    /// A tail shorter than the error fields (possible only for a
    /// degenerate PDU) is left unchanged.
    pub fn set_error(&mut self, status: u8) {
        if let Some(byte) = self.data.get_mut(ERROR_STATUS_OFFSET) {
            *byte = status;
        }
    }

    /// Replace the opaque tail, keeping `pdu_length` and the envelope
    /// length consistent (including any change in the BER width of
    /// `pdu_length` itself).
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let old_pdu_length = self.pdu_length;
        let tail_delta = data.len() as i64 - self.data.len() as i64;
        let new_pdu_length = old_pdu_length.checked_add_signed(tail_delta).unwrap_or(0);

        let delta = tail_delta + ber::encoded_len(new_pdu_length) as i64
            - ber::encoded_len(old_pdu_length) as i64;
        self.length = self.length.checked_add_signed(delta).unwrap_or(0);
        self.pdu_length = new_pdu_length;
        self.data = data;
    }
}

fn fail(reason: &'static str) -> Error {
    tracing::debug!(target: "snmp_cache_proxy::codec", reason, "dropping malformed datagram");
    Error::malformed(reason)
}
