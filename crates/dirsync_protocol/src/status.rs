//! Reply status codes.

use std::fmt;

/// Status carried by every reply.
///
/// Codes follow the 2xx success, 4xx client error, 5xx server error
/// convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Command succeeded.
    Ok,
    /// Subscription cursor was reset by a repeated SUB.
    Reset,
    /// Malformed command.
    BadRequest,
    /// Authentication required.
    Unauthenticated,
    /// Directory or record not found.
    NotFound,
    /// Record exceeds a size limit.
    ResourceExhausted,
    /// Unexpected server failure.
    Internal,
    /// UNSUB for a directory that is not subscribed.
    NotSubscribed,
    /// The directory failed and was closed.
    Unavailable,
}

impl Status {
    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Reset => 201,
            Self::BadRequest => 400,
            Self::Unauthenticated => 401,
            Self::NotFound => 404,
            Self::ResourceExhausted => 413,
            Self::Internal => 500,
            Self::NotSubscribed => 501,
            Self::Unavailable => 503,
        }
    }

    /// Parses a numeric code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            200 => Self::Ok,
            201 => Self::Reset,
            400 => Self::BadRequest,
            401 => Self::Unauthenticated,
            404 => Self::NotFound,
            413 => Self::ResourceExhausted,
            500 => Self::Internal,
            501 => Self::NotSubscribed,
            503 => Self::Unavailable,
            _ => return None,
        })
    }

    /// Returns true for 2xx codes.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.code() / 100 == 2
    }

    /// Returns true for 4xx codes.
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        self.code() / 100 == 4
    }

    /// Returns true for 5xx codes.
    #[must_use]
    pub const fn is_server_error(self) -> bool {
        self.code() / 100 == 5
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 9] = [
        Status::Ok,
        Status::Reset,
        Status::BadRequest,
        Status::Unauthenticated,
        Status::NotFound,
        Status::ResourceExhausted,
        Status::Internal,
        Status::NotSubscribed,
        Status::Unavailable,
    ];

    #[test]
    fn codes_parse_back() {
        for status in ALL {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
        assert_eq!(Status::from_code(302), None);
    }

    #[test]
    fn classes() {
        assert!(Status::Reset.is_success());
        assert!(Status::NotFound.is_client_error());
        assert!(Status::NotSubscribed.is_server_error());
        assert!(!Status::Ok.is_client_error());
        for status in ALL {
            let classes = [
                status.is_success(),
                status.is_client_error(),
                status.is_server_error(),
            ];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1);
        }
    }
}
