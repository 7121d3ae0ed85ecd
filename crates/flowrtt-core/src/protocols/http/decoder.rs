use super::error::HttpError;
use super::layout;
use super::parser::{parse_request, parse_response};
use super::reader::HttpReader;
use crate::classify::{AppRequest, AppResponse, ClassificationEvent, DecodeError, Decoder};
use crate::segment::Timestamp;

pub const PROTOCOL: &str = "http";

/// HTTP/1.x decoder registered as `http`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDecoder;

impl HttpDecoder {
    fn decode_payload(
        &self,
        payload: &[u8],
        seen: Timestamp,
    ) -> Result<ClassificationEvent, HttpError> {
        let reader = HttpReader::new(payload);
        reader.require_len(layout::MIN_PAYLOAD_LEN)?;
        let prefix = reader.prefix()?;

        if prefix == layout::RESPONSE_PREFIX {
            let response = parse_response(payload)?;
            return Ok(ClassificationEvent::Response(AppResponse {
                protocol: PROTOCOL,
                status: response.status,
                reason: response.reason,
                seen,
            }));
        }

        if layout::REQUEST_PREFIXES.contains(&prefix) {
            let request = parse_request(payload)?;
            return Ok(ClassificationEvent::Request(AppRequest {
                protocol: PROTOCOL,
                method: request.method,
                target: request.target,
                host: request.host,
                seen,
            }));
        }

        Err(HttpError::NotHttp)
    }
}

impl Decoder for HttpDecoder {
    fn decode(&self, payload: &[u8], seen: Timestamp) -> Result<ClassificationEvent, DecodeError> {
        self.decode_payload(payload, seen).map_err(|err| match err {
            HttpError::TooShort { .. } | HttpError::NotHttp => DecodeError::NotRecognized,
            other => DecodeError::Malformed(other.to_string()),
        })
    }

    fn refines(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::HttpDecoder;
    use crate::classify::{ClassificationEvent, DecodeError, Decoder};
    use time::OffsetDateTime;

    #[test]
    fn request_event() {
        let event = HttpDecoder
            .decode(
                b"POST /submit HTTP/1.1\r\nHost: api.test\r\n\r\n{}",
                OffsetDateTime::UNIX_EPOCH,
            )
            .unwrap();
        let ClassificationEvent::Request(request) = event else {
            panic!("expected request");
        };
        assert_eq!(request.method, "POST");
        assert_eq!(request.host.as_deref(), Some("api.test"));
        assert_eq!(request.protocol, "http");
    }

    #[test]
    fn response_event() {
        let event = HttpDecoder
            .decode(b"HTTP/1.1 200 OK\r\n\r\n", OffsetDateTime::UNIX_EPOCH)
            .unwrap();
        assert!(matches!(event, ClassificationEvent::Response(r) if r.status == 200));
    }

    #[test]
    fn short_payload_not_recognized() {
        let err = HttpDecoder
            .decode(b"GET ", OffsetDateTime::UNIX_EPOCH)
            .unwrap_err();
        assert_eq!(err, DecodeError::NotRecognized);
    }

    #[test]
    fn binary_payload_not_recognized() {
        let err = HttpDecoder
            .decode(&[0x16, 0x03, 0x01, 0x00, 0xa5], OffsetDateTime::UNIX_EPOCH)
            .unwrap_err();
        assert_eq!(err, DecodeError::NotRecognized);
    }

    #[test]
    fn malformed_request_line() {
        let err = HttpDecoder
            .decode(b"GET nowhere\r\n", OffsetDateTime::UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
