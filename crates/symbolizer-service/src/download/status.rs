//! Classification of debuginfod response status codes.

/// What a status code means for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NotFound,
    Unauthorized,
    RateLimited,
    ClientError,
    ServerError,
    Other,
}

struct StatusRule {
    codes: std::ops::RangeInclusive<u16>,
    class: StatusClass,
}

/// First match wins.
const RULES: &[StatusRule] = &[
    StatusRule {
        codes: 200..=299,
        class: StatusClass::Success,
    },
    StatusRule {
        codes: 404..=404,
        class: StatusClass::NotFound,
    },
    StatusRule {
        codes: 401..=401,
        class: StatusClass::Unauthorized,
    },
    StatusRule {
        codes: 403..=403,
        class: StatusClass::Unauthorized,
    },
    StatusRule {
        codes: 429..=429,
        class: StatusClass::RateLimited,
    },
    StatusRule {
        codes: 400..=499,
        class: StatusClass::ClientError,
    },
    StatusRule {
        codes: 500..=599,
        class: StatusClass::ServerError,
    },
];

impl StatusClass {
    pub fn from_code(code: u16) -> Self {
        RULES
            .iter()
            .find(|rule| rule.codes.contains(&code))
            .map(|rule| rule.class)
            .unwrap_or(Self::Other)
    }

    /// The short name of the class.
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::Other => "other",
        }
    }

    /// The label of a fetch that ended with a status of this class.
    pub fn outcome_label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "error_not_found",
            Self::Unauthorized => "error_unauthorized",
            Self::RateLimited => "error_rate_limited",
            Self::ClientError => "error_client",
            Self::ServerError => "error_server",
            Self::Other => "error_http_other",
        }
    }

    /// Whether a response of this class is worth another attempt.
    pub fn retry(self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError)
    }
}
