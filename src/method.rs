//! HTTP method as a typed enum.
//!
//! Covers RFC 9110 standard methods, WebDAV extensions (RFC 4918 / 4791 / 3253 / 5323),
//! and `PURGE` used by nginx and Varnish for cache invalidation. Any other token
//! is carried verbatim in [`Method::Other`].

use std::fmt;

/// An HTTP request method.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    // RFC 9110 ─────────────────────────────────────────────────────────────────
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
    // WebDAV RFC 4918 ──────────────────────────────────────────────────────────
    Copy,
    Lock,
    Mkcol,
    Move,
    Propfind,
    Proppatch,
    Unlock,
    // WebDAV extensions ────────────────────────────────────────────────────────
    Mkcalendar, // RFC 4791, CalDAV
    Report,     // RFC 3253
    Search,     // RFC 5323
    // Cache invalidation ───────────────────────────────────────────────────────
    Purge, // nginx / Varnish
    // Anything else ────────────────────────────────────────────────────────────
    Other(String),
}

impl Method {
    /// Returns the wire representation (e.g. `"GET"`).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect    => "CONNECT",
            Self::Copy       => "COPY",
            Self::Delete     => "DELETE",
            Self::Get        => "GET",
            Self::Head       => "HEAD",
            Self::Lock       => "LOCK",
            Self::Mkcalendar => "MKCALENDAR",
            Self::Mkcol      => "MKCOL",
            Self::Move       => "MOVE",
            Self::Options    => "OPTIONS",
            Self::Patch      => "PATCH",
            Self::Post       => "POST",
            Self::Propfind   => "PROPFIND",
            Self::Proppatch  => "PROPPATCH",
            Self::Purge      => "PURGE",
            Self::Put        => "PUT",
            Self::Report     => "REPORT",
            Self::Search     => "SEARCH",
            Self::Trace      => "TRACE",
            Self::Unlock     => "UNLOCK",
            Self::Other(s)   => s,
        }
    }
}

/// Parses a method token. Case-sensitive per RFC 9110 §9.1, so `"get"` is
/// `Method::Other("get")`, not `Method::Get`.
impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "CONNECT"    => Self::Connect,
            "COPY"       => Self::Copy,
            "DELETE"     => Self::Delete,
            "GET"        => Self::Get,
            "HEAD"       => Self::Head,
            "LOCK"       => Self::Lock,
            "MKCALENDAR" => Self::Mkcalendar,
            "MKCOL"      => Self::Mkcol,
            "MOVE"       => Self::Move,
            "OPTIONS"    => Self::Options,
            "PATCH"      => Self::Patch,
            "POST"       => Self::Post,
            "PROPFIND"   => Self::Propfind,
            "PROPPATCH"  => Self::Proppatch,
            "PURGE"      => Self::Purge,
            "PUT"        => Self::Put,
            "REPORT"     => Self::Report,
            "SEARCH"     => Self::Search,
            "TRACE"      => Self::Trace,
            "UNLOCK"     => Self::Unlock,
            other        => Self::Other(other.to_owned()),
        }
    }
}

impl From<&http::Method> for Method {
    fn from(m: &http::Method) -> Self {
        Self::from(m.as_str())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tokens_round_trip_through_as_str() {
        for token in ["GET", "POST", "PROPFIND", "PURGE"] {
            assert_eq!(Method::from(token).as_str(), token);
        }
    }

    #[test]
    fn unknown_and_lowercase_tokens_are_kept_verbatim() {
        assert_eq!(Method::from("BREW"), Method::Other("BREW".into()));
        assert_eq!(Method::from("get"), Method::Other("get".into()));
        assert_eq!(Method::from("BREW").to_string(), "BREW");
    }

    #[test]
    fn converts_from_http_method() {
        assert_eq!(Method::from(&http::Method::DELETE), Method::Delete);
    }
}
