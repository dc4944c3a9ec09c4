//! HTTP status codes as a typed enum.
//!
//! Use [`Status`] anywhere a status code is accepted (`Response::empty()`,
//! `Response::builder().status()`, or a bare handler return value).
//!
//! ```rust
//! use arbor::{Response, Status};
//!
//! // status-only, no body
//! Response::empty(Status::NoContent);
//!
//! // codes outside the registry survive intact
//! assert_eq!(Status::from(599).code(), 599);
//! assert!(Status::from(599).is_server_error());
//! ```

use std::fmt;

// One table drives the enum, the numeric mapping in both directions, and the
// reason phrases, so they cannot drift apart.
macro_rules! statuses {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal, $reason:literal; )+) => {
        /// All IANA-registered HTTP status codes, plus [`Status::Other`] for
        /// anything else.
        #[allow(clippy::enum_variant_names)]
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        pub enum Status {
            $( $(#[$doc])* $variant, )+
            /// An unregistered code, carried as-is.
            Other(u16),
        }

        impl Status {
            /// The numeric status code.
            pub fn code(self) -> u16 {
                match self {
                    $( Self::$variant => $code, )+
                    Self::Other(code) => code,
                }
            }

            /// The canonical reason phrase, or `""` for unregistered codes.
            pub fn reason(self) -> &'static str {
                match self {
                    $( Self::$variant => $reason, )+
                    Self::Other(_) => "",
                }
            }
        }

        impl From<u16> for Status {
            fn from(code: u16) -> Self {
                match code {
                    $( $code => Self::$variant, )+
                    other => Self::Other(other),
                }
            }
        }
    };
}

statuses! {
    // ── 1xx Informational ─────────────────────────────────────────────────────
    Continue                      = 100, "Continue";
    SwitchingProtocols            = 101, "Switching Protocols";
    Processing                    = 102, "Processing";
    EarlyHints                    = 103, "Early Hints";

    // ── 2xx Success ───────────────────────────────────────────────────────────
    Ok                            = 200, "OK";
    Created                       = 201, "Created";
    Accepted                      = 202, "Accepted";
    NonAuthoritativeInformation   = 203, "Non-Authoritative Information";
    NoContent                     = 204, "No Content";
    ResetContent                  = 205, "Reset Content";
    PartialContent                = 206, "Partial Content";
    MultiStatus                   = 207, "Multi-Status";
    AlreadyReported               = 208, "Already Reported";
    ImUsed                        = 226, "IM Used";

    // ── 3xx Redirection ───────────────────────────────────────────────────────
    MultipleChoices               = 300, "Multiple Choices";
    MovedPermanently              = 301, "Moved Permanently";
    Found                         = 302, "Found";
    SeeOther                      = 303, "See Other";
    NotModified                   = 304, "Not Modified";
    TemporaryRedirect             = 307, "Temporary Redirect";
    PermanentRedirect             = 308, "Permanent Redirect";

    // ── 4xx Client errors ─────────────────────────────────────────────────────
    BadRequest                    = 400, "Bad Request";
    Unauthorized                  = 401, "Unauthorized";
    PaymentRequired               = 402, "Payment Required";
    Forbidden                     = 403, "Forbidden";
    NotFound                      = 404, "Not Found";
    MethodNotAllowed              = 405, "Method Not Allowed";
    NotAcceptable                 = 406, "Not Acceptable";
    ProxyAuthenticationRequired   = 407, "Proxy Authentication Required";
    RequestTimeout                = 408, "Request Timeout";
    Conflict                      = 409, "Conflict";
    Gone                          = 410, "Gone";
    LengthRequired                = 411, "Length Required";
    PreconditionFailed            = 412, "Precondition Failed";
    ContentTooLarge               = 413, "Content Too Large";
    UriTooLong                    = 414, "URI Too Long";
    UnsupportedMediaType          = 415, "Unsupported Media Type";
    RangeNotSatisfiable           = 416, "Range Not Satisfiable";
    ExpectationFailed             = 417, "Expectation Failed";
    ImATeapot                     = 418, "I'm a Teapot";
    MisdirectedRequest            = 421, "Misdirected Request";
    UnprocessableContent          = 422, "Unprocessable Content";
    Locked                        = 423, "Locked";
    FailedDependency              = 424, "Failed Dependency";
    TooEarly                      = 425, "Too Early";
    UpgradeRequired               = 426, "Upgrade Required";
    PreconditionRequired          = 428, "Precondition Required";
    TooManyRequests               = 429, "Too Many Requests";
    RequestHeaderFieldsTooLarge   = 431, "Request Header Fields Too Large";
    UnavailableForLegalReasons    = 451, "Unavailable For Legal Reasons";

    // ── 5xx Server errors ─────────────────────────────────────────────────────
    InternalServerError           = 500, "Internal Server Error";
    NotImplemented                = 501, "Not Implemented";
    BadGateway                    = 502, "Bad Gateway";
    ServiceUnavailable            = 503, "Service Unavailable";
    GatewayTimeout                = 504, "Gateway Timeout";
    HttpVersionNotSupported       = 505, "HTTP Version Not Supported";
    VariantAlsoNegotiates         = 506, "Variant Also Negotiates";
    InsufficientStorage           = 507, "Insufficient Storage";
    LoopDetected                  = 508, "Loop Detected";
    NotExtended                   = 510, "Not Extended";
    NetworkAuthenticationRequired = 511, "Network Authentication Required";
}

impl Status {
    pub fn is_informational(self) -> bool { (100..200).contains(&self.code()) }
    pub fn is_successful(self) -> bool { (200..300).contains(&self.code()) }
    pub fn is_redirection(self) -> bool { (300..400).contains(&self.code()) }
    pub fn is_client_error(self) -> bool { (400..500).contains(&self.code()) }
    pub fn is_server_error(self) -> bool { (500..600).contains(&self.code()) }

    /// 4xx or 5xx.
    pub fn is_error(self) -> bool { self.is_client_error() || self.is_server_error() }
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 { s.code() }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            "" => write!(f, "{}", self.code()),
            reason => write!(f, "{} {reason}", self.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(200, Status::Ok)]
    #[case(404, Status::NotFound)]
    #[case(511, Status::NetworkAuthenticationRequired)]
    #[case(299, Status::Other(299))]
    fn maps_codes_to_variants(#[case] code: u16, #[case] status: Status) {
        assert_eq!(Status::from(code), status);
        assert_eq!(status.code(), code);
    }

    #[test]
    fn classifies_by_code_range() {
        assert!(Status::Continue.is_informational());
        assert!(Status::Created.is_successful());
        assert!(Status::SeeOther.is_redirection());
        assert!(Status::Other(499).is_client_error());
        assert!(Status::BadGateway.is_server_error());
        assert!(!Status::Ok.is_error());
    }

    #[test]
    fn displays_code_and_reason() {
        assert_eq!(Status::NotFound.to_string(), "404 Not Found");
        assert_eq!(Status::Other(599).to_string(), "599");
    }
}
