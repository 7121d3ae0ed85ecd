use super::error::HttpError;
use super::layout;
use super::reader::HttpReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpVersion {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
    pub host: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

/// Parse `HTTP/<major>.<minor>`.
pub fn parse_version(value: &str) -> Result<HttpVersion, HttpError> {
    let invalid = || HttpError::InvalidVersion(value.to_string());
    let numbers = value.strip_prefix(layout::VERSION_PREFIX).ok_or_else(invalid)?;
    let (major, minor) = numbers.split_once('.').ok_or_else(invalid)?;
    let component = |digits: &str| {
        digits
            .parse::<u32>()
            .ok()
            .filter(|n| *n <= layout::MAX_VERSION_COMPONENT)
            .ok_or_else(invalid)
    };
    Ok(HttpVersion {
        major: component(major)?,
        minor: component(minor)?,
    })
}

/// Parse a request start line and its headers.
pub fn parse_request(payload: &[u8]) -> Result<HttpRequest, HttpError> {
    let mut reader = HttpReader::new(payload);
    let line = reader.start_line()?;

    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(target), Some(proto)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::MalformedRequestLine(line.to_string()));
    };
    if method.is_empty() || target.is_empty() {
        return Err(HttpError::MalformedRequestLine(line.to_string()));
    }
    let version = parse_version(proto)?;
    let authority = target_authority(target)?;

    let headers = reader.headers();
    let host = authority.or_else(|| {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(layout::HOST_HEADER))
            .map(|(_, value)| value.clone())
    });

    Ok(HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
        version,
        host,
        headers,
    })
}

/// Parse a status line and its headers.
pub fn parse_response(payload: &[u8]) -> Result<HttpResponse, HttpError> {
    let mut reader = HttpReader::new(payload);
    let line = reader.start_line()?;

    let mut parts = line.splitn(3, ' ');
    let (Some(proto), Some(code)) = (parts.next(), parts.next()) else {
        return Err(HttpError::MalformedStatusLine(line.to_string()));
    };
    let reason = parts.next().unwrap_or_default();

    if code.len() != layout::STATUS_CODE_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpError::InvalidStatusCode(code.to_string()));
    }
    let status = code
        .parse::<u16>()
        .map_err(|_| HttpError::InvalidStatusCode(code.to_string()))?;
    let version = parse_version(proto)?;

    Ok(HttpResponse {
        version,
        status,
        reason: reason.to_string(),
        headers: reader.headers(),
    })
}

/// Validate a request target; returns the authority of absolute targets.
fn target_authority(target: &str) -> Result<Option<String>, HttpError> {
    if target == "*" || target.starts_with('/') {
        return Ok(None);
    }
    if let Some((scheme, rest)) = target.split_once("://") {
        if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+') {
            return Err(HttpError::InvalidTarget(target.to_string()));
        }
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        return Ok((!authority.is_empty()).then(|| authority.to_string()));
    }
    // CONNECT uses authority-form.
    if target.contains(':') && !target.contains('/') {
        return Ok(Some(target.to_string()));
    }
    Err(HttpError::InvalidTarget(target.to_string()))
}
