//! Wire format for channel frames.
//!
//! Frame layout: `[length:4][checksum:4][type:1][id:4][body:N]`
//!
//! - **length**: Total frame size including header (little-endian u32)
//! - **checksum**: CRC32C of (type + id + body) for integrity verification
//! - **type**: Frame type tag (init request/response, call request/response, error)
//! - **id**: 32-bit operation id correlating requests with responses
//! - **body**: Type-specific payload
//!
//! Body encodings use little-endian length prefixes: u16 for short strings
//! (host/port, process name, service) and u32 for call arguments.

use crate::error::CallError;

/// Header size: 4 (length) + 4 (checksum) + 1 (type) + 4 (id) = 13 bytes.
pub const HEADER_SIZE: usize = 13;

/// Maximum total frame size (1MB).
///
/// Frames larger than this are rejected to prevent memory exhaustion from
/// a misbehaving peer.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Operation id reserved for connection-scope error frames.
pub const CONNECTION_SCOPE_ID: u32 = 0;

/// Wire format error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// The type tag is not a known frame type.
    #[error("unknown frame type: {value:#04x}")]
    UnknownFrameType {
        /// The unrecognized type byte.
        value: u8,
    },

    /// The body did not decode as the frame type requires.
    #[error("malformed frame body: {detail}")]
    MalformedBody {
        /// What failed to decode.
        detail: String,
    },
}

/// Frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Handshake request announcing the sender's identity.
    InitRequest = 0x01,
    /// Handshake response announcing the receiver's identity.
    InitResponse = 0x02,
    /// An operation request carrying three argument byte strings.
    CallRequest = 0x03,
    /// An operation response carrying a code and two byte strings.
    CallResponse = 0x04,
    /// An error frame failing one operation (or the connection at id 0).
    Error = 0xFF,
}

impl FrameType {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(FrameType::InitRequest),
            0x02 => Ok(FrameType::InitResponse),
            0x03 => Ok(FrameType::CallRequest),
            0x04 => Ok(FrameType::CallResponse),
            0xFF => Ok(FrameType::Error),
            _ => Err(WireError::UnknownFrameType { value }),
        }
    }
}

/// Response code carried on call-response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    /// The call succeeded; the response args are the result.
    Ok = 0x00,
    /// The handler declined the call; arg1 carries the message.
    Declined = 0x01,
    /// No handler is registered under the requested name; arg1 carries it.
    UnknownEndpoint = 0x02,
    /// The receiver was too loaded to run the call; arg1 carries a message.
    Busy = 0x03,
}

impl ResponseCode {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x00 => Ok(ResponseCode::Ok),
            0x01 => Ok(ResponseCode::Declined),
            0x02 => Ok(ResponseCode::UnknownEndpoint),
            0x03 => Ok(ResponseCode::Busy),
            _ => Err(WireError::MalformedBody {
                detail: format!("unknown response code {value:#04x}"),
            }),
        }
    }
}

/// Error code carried on error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// The sender observed a protocol violation.
    Protocol = 0x01,
    /// The request was structurally unacceptable.
    BadRequest = 0x02,
    /// The sender refused the operation due to load.
    Busy = 0x03,
}

impl ErrorCode {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(ErrorCode::Protocol),
            0x02 => Ok(ErrorCode::BadRequest),
            0x03 => Ok(ErrorCode::Busy),
            _ => Err(WireError::MalformedBody {
                detail: format!("unknown error code {value:#04x}"),
            }),
        }
    }
}

/// Identity announced in an init frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitBody {
    /// The canonical `"host:port"` the sender answers on.
    pub host_port: String,
    /// The sender's process name, for diagnostics.
    pub process_name: String,
}

/// Body of a call-request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequestBody {
    /// Logical service name; may be empty.
    pub service: String,
    /// First argument: the endpoint name.
    pub arg1: Vec<u8>,
    /// Second argument, opaque.
    pub arg2: Vec<u8>,
    /// Third argument, opaque.
    pub arg3: Vec<u8>,
}

/// Body of a call-response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponseBody {
    /// Outcome of the call.
    pub code: ResponseCode,
    /// First response argument, opaque (error message on non-Ok codes).
    pub arg1: Vec<u8>,
    /// Second response argument, opaque.
    pub arg2: Vec<u8>,
}

/// Body of an error frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    /// What kind of failure this is.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

/// Typed frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// Handshake request.
    InitRequest(InitBody),
    /// Handshake response.
    InitResponse(InitBody),
    /// Operation request.
    CallRequest(CallRequestBody),
    /// Operation response.
    CallResponse(CallResponseBody),
    /// Operation or connection failure.
    Error(ErrorBody),
}

impl FrameBody {
    fn frame_type(&self) -> FrameType {
        match self {
            FrameBody::InitRequest(_) => FrameType::InitRequest,
            FrameBody::InitResponse(_) => FrameType::InitResponse,
            FrameBody::CallRequest(_) => FrameType::CallRequest,
            FrameBody::CallResponse(_) => FrameType::CallResponse,
            FrameBody::Error(_) => FrameType::Error,
        }
    }
}

/// A whole frame: operation id plus typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 32-bit operation id correlating requests and responses within one
    /// connection. Id 0 is reserved for connection-scope error frames.
    pub id: u32,
    /// Typed payload.
    pub body: FrameBody,
}

// ---------------------------------------------------------------------------
// Body encoding helpers
// ---------------------------------------------------------------------------

fn put_str16(out: &mut Vec<u8>, s: &str) -> Result<(), WireError> {
    let len =
        u16::try_from(s.len()).map_err(|_| WireError::MalformedBody {
            detail: format!("string field too long: {} bytes", s.len()),
        })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_bytes32(out: &mut Vec<u8>, b: &[u8]) {
    out.extend_from_slice(&(b.len() as u32).to_le_bytes());
    out.extend_from_slice(b);
}

struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::MalformedBody {
            detail: "length overflow".to_string(),
        })?;
        if end > self.buf.len() {
            return Err(WireError::MalformedBody {
                detail: format!("body truncated: need {} bytes, have {}", end, self.buf.len()),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn str16(&mut self) -> Result<String, WireError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::MalformedBody {
            detail: "string field is not valid UTF-8".to_string(),
        })
    }

    fn bytes32(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(self) -> Result<(), WireError> {
        if self.pos != self.buf.len() {
            return Err(WireError::MalformedBody {
                detail: format!("{} trailing bytes after body", self.buf.len() - self.pos),
            });
        }
        Ok(())
    }
}

fn encode_body(body: &FrameBody, out: &mut Vec<u8>) -> Result<(), WireError> {
    match body {
        FrameBody::InitRequest(init) | FrameBody::InitResponse(init) => {
            put_str16(out, &init.host_port)?;
            put_str16(out, &init.process_name)?;
        }
        FrameBody::CallRequest(call) => {
            put_str16(out, &call.service)?;
            put_bytes32(out, &call.arg1);
            put_bytes32(out, &call.arg2);
            put_bytes32(out, &call.arg3);
        }
        FrameBody::CallResponse(res) => {
            out.push(res.code as u8);
            put_bytes32(out, &res.arg1);
            put_bytes32(out, &res.arg2);
        }
        FrameBody::Error(err) => {
            out.push(err.code as u8);
            put_str16(out, &err.message)?;
        }
    }
    Ok(())
}

fn decode_body(frame_type: FrameType, buf: &[u8]) -> Result<FrameBody, WireError> {
    let mut reader = BodyReader::new(buf);
    let body = match frame_type {
        FrameType::InitRequest | FrameType::InitResponse => {
            let init = InitBody {
                host_port: reader.str16()?,
                process_name: reader.str16()?,
            };
            if frame_type == FrameType::InitRequest {
                FrameBody::InitRequest(init)
            } else {
                FrameBody::InitResponse(init)
            }
        }
        FrameType::CallRequest => FrameBody::CallRequest(CallRequestBody {
            service: reader.str16()?,
            arg1: reader.bytes32()?,
            arg2: reader.bytes32()?,
            arg3: reader.bytes32()?,
        }),
        FrameType::CallResponse => FrameBody::CallResponse(CallResponseBody {
            code: ResponseCode::from_u8(reader.u8()?)?,
            arg1: reader.bytes32()?,
            arg2: reader.bytes32()?,
        }),
        FrameType::Error => FrameBody::Error(ErrorBody {
            code: ErrorCode::from_u8(reader.u8()?)?,
            message: reader.str16()?,
        }),
    };
    reader.finish()?;
    Ok(body)
}

/// Compute CRC32C checksum over type + id + body.
fn compute_checksum(payload: &[u8]) -> u32 {
    crc32c::crc32c(payload)
}

/// Serialize a frame to bytes suitable for a single socket write.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the serialized frame exceeds
/// [`MAX_FRAME_SIZE`], or `MalformedBody` if a string field is oversized.
pub fn serialize_frame(frame: &Frame) -> Result<Vec<u8>, WireError> {
    let mut data = vec![0u8; 8];
    data.push(frame.body.frame_type() as u8);
    data.extend_from_slice(&frame.id.to_le_bytes());
    encode_body(&frame.body, &mut data)?;

    if data.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge { size: data.len() });
    }

    let checksum = compute_checksum(&data[8..]);
    let length = data.len() as u32;
    data[0..4].copy_from_slice(&length.to_le_bytes());
    data[4..8].copy_from_slice(&checksum.to_le_bytes());
    Ok(data)
}

/// Try to deserialize a frame from a buffer that may contain partial data.
///
/// This is the streaming entry point: feed it the front of a read buffer
/// and drain `consumed` bytes on success.
///
/// # Returns
///
/// - `Ok(Some((frame, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if the data is malformed
pub fn try_deserialize_frame(data: &[u8]) -> Result<Option<(Frame, usize)>, WireError> {
    if data.len() < HEADER_SIZE {
        return Ok(None); // Need more data for header
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if (length as usize) < HEADER_SIZE {
        return Err(WireError::InvalidLength { length });
    }
    if length as usize > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: length as usize,
        });
    }

    let expected_len = length as usize;
    if data.len() < expected_len {
        return Ok(None); // Need more data for body
    }

    let expected_checksum = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let computed = compute_checksum(&data[8..expected_len]);
    if computed != expected_checksum {
        return Err(WireError::ChecksumMismatch {
            expected: expected_checksum,
            actual: computed,
        });
    }

    let frame_type = FrameType::from_u8(data[8])?;
    let id = u32::from_le_bytes([data[9], data[10], data[11], data[12]]);
    let body = decode_body(frame_type, &data[HEADER_SIZE..expected_len])?;

    Ok(Some((Frame { id, body }, expected_len)))
}

/// Deserialize a frame from a buffer holding exactly one whole frame.
///
/// # Errors
///
/// Returns `InsufficientData` if the buffer is shorter than the declared
/// frame, and the same errors as [`try_deserialize_frame`] otherwise.
pub fn deserialize_frame(data: &[u8]) -> Result<Frame, WireError> {
    match try_deserialize_frame(data)? {
        Some((frame, _consumed)) => Ok(frame),
        None => Err(WireError::InsufficientData {
            needed: HEADER_SIZE.max(if data.len() >= 4 {
                u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
            } else {
                HEADER_SIZE
            }),
            have: data.len(),
        }),
    }
}

impl From<&CallError> for ResponseCode {
    fn from(err: &CallError) -> Self {
        match err {
            CallError::UnknownEndpoint { .. } => ResponseCode::UnknownEndpoint,
            CallError::Busy { .. } | CallError::TooManyPending => ResponseCode::Busy,
            _ => ResponseCode::Declined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_frame() -> Frame {
        Frame {
            id: 1,
            body: FrameBody::InitRequest(InitBody {
                host_port: "127.0.0.1:4040".to_string(),
                process_name: "switchboard-test".to_string(),
            }),
        }
    }

    fn call_request_frame() -> Frame {
        Frame {
            id: 42,
            body: FrameBody::CallRequest(CallRequestBody {
                service: "keyvalue".to_string(),
                arg1: b"get".to_vec(),
                arg2: b"header bytes".to_vec(),
                arg3: b"body bytes".to_vec(),
            }),
        }
    }

    #[test]
    fn test_init_request_roundtrip() {
        let frame = init_frame();
        let bytes = serialize_frame(&frame).expect("serialize");
        let decoded = deserialize_frame(&bytes).expect("deserialize");
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_init_response_roundtrip() {
        let frame = Frame {
            id: 1,
            body: FrameBody::InitResponse(InitBody {
                host_port: "[::1]:9000".to_string(),
                process_name: "svc".to_string(),
            }),
        };
        let bytes = serialize_frame(&frame).expect("serialize");
        assert_eq!(deserialize_frame(&bytes).expect("deserialize"), frame);
    }

    #[test]
    fn test_call_request_roundtrip() {
        let frame = call_request_frame();
        let bytes = serialize_frame(&frame).expect("serialize");
        assert_eq!(deserialize_frame(&bytes).expect("deserialize"), frame);
    }

    #[test]
    fn test_call_response_roundtrip() {
        for code in [
            ResponseCode::Ok,
            ResponseCode::Declined,
            ResponseCode::UnknownEndpoint,
            ResponseCode::Busy,
        ] {
            let frame = Frame {
                id: 7,
                body: FrameBody::CallResponse(CallResponseBody {
                    code,
                    arg1: b"first".to_vec(),
                    arg2: b"second".to_vec(),
                }),
            };
            let bytes = serialize_frame(&frame).expect("serialize");
            assert_eq!(deserialize_frame(&bytes).expect("deserialize"), frame);
        }
    }

    #[test]
    fn test_error_frame_roundtrip() {
        let frame = Frame {
            id: CONNECTION_SCOPE_ID,
            body: FrameBody::Error(ErrorBody {
                code: ErrorCode::Protocol,
                message: "call frame before identify".to_string(),
            }),
        };
        let bytes = serialize_frame(&frame).expect("serialize");
        assert_eq!(deserialize_frame(&bytes).expect("deserialize"), frame);
    }

    #[test]
    fn test_empty_args_roundtrip() {
        let frame = Frame {
            id: 3,
            body: FrameBody::CallRequest(CallRequestBody {
                service: String::new(),
                arg1: Vec::new(),
                arg2: Vec::new(),
                arg3: Vec::new(),
            }),
        };
        let bytes = serialize_frame(&frame).expect("serialize");
        assert_eq!(deserialize_frame(&bytes).expect("deserialize"), frame);
    }

    #[test]
    fn test_args_are_opaque_bytes() {
        // Arguments must round-trip any byte values, not just UTF-8.
        let frame = Frame {
            id: 9,
            body: FrameBody::CallRequest(CallRequestBody {
                service: "raw".to_string(),
                arg1: vec![0x00, 0xFF, 0xFE],
                arg2: (0..=255u8).collect(),
                arg3: vec![0u8; 1024],
            }),
        };
        let bytes = serialize_frame(&frame).expect("serialize");
        assert_eq!(deserialize_frame(&bytes).expect("deserialize"), frame);
    }

    #[test]
    fn test_checksum_detects_body_corruption() {
        let bytes = serialize_frame(&call_request_frame()).expect("serialize");
        let mut corrupted = bytes.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let result = try_deserialize_frame(&corrupted);
        assert!(matches!(result, Err(WireError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_checksum_detects_id_corruption() {
        let bytes = serialize_frame(&call_request_frame()).expect("serialize");
        let mut corrupted = bytes.clone();
        corrupted[10] ^= 0xFF;

        let result = try_deserialize_frame(&corrupted);
        assert!(matches!(result, Err(WireError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_partial_header_needs_more() {
        let bytes = serialize_frame(&init_frame()).expect("serialize");
        let result = try_deserialize_frame(&bytes[..HEADER_SIZE - 1]).expect("partial");
        assert!(result.is_none());
    }

    #[test]
    fn test_partial_body_needs_more() {
        let bytes = serialize_frame(&call_request_frame()).expect("serialize");
        let result = try_deserialize_frame(&bytes[..bytes.len() - 3]).expect("partial");
        assert!(result.is_none());
    }

    #[test]
    fn test_consumed_ignores_trailing_data() {
        let bytes = serialize_frame(&init_frame()).expect("serialize");
        let mut extended = bytes.clone();
        extended.extend_from_slice(b"next frame bytes");

        let (frame, consumed) = try_deserialize_frame(&extended)
            .expect("deserialize")
            .expect("complete frame");
        assert_eq!(frame, init_frame());
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let first = serialize_frame(&init_frame()).expect("serialize");
        let second = serialize_frame(&call_request_frame()).expect("serialize");
        let mut buf = first.clone();
        buf.extend_from_slice(&second);

        let (frame_a, consumed_a) = try_deserialize_frame(&buf)
            .expect("first")
            .expect("complete");
        assert_eq!(frame_a, init_frame());
        let (frame_b, consumed_b) = try_deserialize_frame(&buf[consumed_a..])
            .expect("second")
            .expect("complete");
        assert_eq!(frame_b, call_request_frame());
        assert_eq!(consumed_a + consumed_b, buf.len());
    }

    #[test]
    fn test_invalid_length_too_small() {
        let mut bad = vec![0u8; HEADER_SIZE];
        bad[0..4].copy_from_slice(&5u32.to_le_bytes());
        let result = try_deserialize_frame(&bad);
        assert!(matches!(result, Err(WireError::InvalidLength { length: 5 })));
    }

    #[test]
    fn test_declared_length_too_large() {
        let mut bad = vec![0u8; HEADER_SIZE];
        bad[0..4].copy_from_slice(&((MAX_FRAME_SIZE + 1) as u32).to_le_bytes());
        let result = try_deserialize_frame(&bad);
        assert!(matches!(result, Err(WireError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_oversized_frame_rejected_on_serialize() {
        let frame = Frame {
            id: 1,
            body: FrameBody::CallRequest(CallRequestBody {
                service: String::new(),
                arg1: Vec::new(),
                arg2: Vec::new(),
                arg3: vec![0u8; MAX_FRAME_SIZE],
            }),
        };
        let result = serialize_frame(&frame);
        assert!(matches!(result, Err(WireError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_unknown_frame_type() {
        let frame = init_frame();
        let mut bytes = serialize_frame(&frame).expect("serialize");
        bytes[8] = 0x7E;
        // Fix up the checksum so the type byte is what fails.
        let len = bytes.len();
        let checksum = crc32c::crc32c(&bytes[8..len]);
        bytes[4..8].copy_from_slice(&checksum.to_le_bytes());

        let result = try_deserialize_frame(&bytes);
        assert!(matches!(
            result,
            Err(WireError::UnknownFrameType { value: 0x7E })
        ));
    }

    #[test]
    fn test_trailing_body_bytes_rejected() {
        let frame = init_frame();
        let mut bytes = serialize_frame(&frame).expect("serialize");
        bytes.push(0xAB);
        let len = bytes.len();
        bytes[0..4].copy_from_slice(&(len as u32).to_le_bytes());
        let checksum = crc32c::crc32c(&bytes[8..len]);
        bytes[4..8].copy_from_slice(&checksum.to_le_bytes());

        let result = try_deserialize_frame(&bytes);
        assert!(matches!(result, Err(WireError::MalformedBody { .. })));
    }

    #[test]
    fn test_deserialize_whole_buffer_insufficient() {
        let bytes = serialize_frame(&init_frame()).expect("serialize");
        let result = deserialize_frame(&bytes[..6]);
        assert!(matches!(result, Err(WireError::InsufficientData { .. })));
    }

    #[test]
    fn test_response_code_from_call_error() {
        let unknown = CallError::UnknownEndpoint {
            name: "missing".to_string(),
        };
        assert_eq!(ResponseCode::from(&unknown), ResponseCode::UnknownEndpoint);
        assert_eq!(
            ResponseCode::from(&CallError::TooManyPending),
            ResponseCode::Busy
        );
        assert_eq!(
            ResponseCode::from(&CallError::Timeout),
            ResponseCode::Declined
        );
    }
}
