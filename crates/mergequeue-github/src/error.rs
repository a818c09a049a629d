//! Maps the host's HTTP responses onto `mergequeue_core::Error`'s taxonomy.

use mergequeue_core::Error;
use reqwest::StatusCode;

/// Transport-level failure (DNS, connect, timeout) — always retryable by the
/// general HostAPI policy (spec §7.1).
pub fn from_transport(err: reqwest::Error) -> Error {
    Error::HostTransport(err.to_string())
}

/// Classifies a non-2xx response body against the specific conditions the
/// core reacts to (spec §4.2.2, §6.1, §7): 422 "Reference already exists",
/// 422 "Base does not exist"/merge conflict on the merges endpoint, 403/401
/// permission errors, and the generic transient/5xx/429 bucket.
pub fn from_response(status: StatusCode, body: &str, retry_after: Option<std::time::Duration>) -> Error {
    match status {
        StatusCode::UNPROCESSABLE_ENTITY => classify_422(body),
        StatusCode::CONFLICT => Error::MergeConflict(body.to_string()),
        StatusCode::NOT_FOUND => Error::NotFound(body.to_string()),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            Error::HostPermissionDenied(body.to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => Error::HostRateLimited(retry_after),
        s if s.is_server_error() => Error::HostServer(s.as_u16()),
        s => Error::HostServer(s.as_u16()),
    }
}

fn classify_422(body: &str) -> Error {
    let lower = body.to_ascii_lowercase();
    if lower.contains("reference already exists") {
        Error::ReferenceAlreadyExists(body.to_string())
    } else if lower.contains("base does not exist") || lower.contains("not a valid reference") {
        Error::BaseDoesNotExist(body.to_string())
    } else if lower.contains("reference does not exist") {
        Error::NotFound(body.to_string())
    } else if lower.contains("merge conflict") || lower.contains("not mergeable") {
        Error::MergeConflict(body.to_string())
    } else {
        Error::Other(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_422_reference_already_exists() {
        match classify_422("Reference already exists") {
            Error::ReferenceAlreadyExists(_) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classifies_422_base_does_not_exist() {
        match classify_422("Base does not exist") {
            Error::BaseDoesNotExist(_) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_other_for_unrecognized_422_bodies() {
        match classify_422("something else entirely") {
            Error::Other(_) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn maps_429_to_rate_limited_with_retry_after() {
        let dur = std::time::Duration::from_secs(3);
        match from_response(StatusCode::TOO_MANY_REQUESTS, "", Some(dur)) {
            Error::HostRateLimited(Some(d)) => assert_eq!(d, dur),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
