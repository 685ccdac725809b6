//! Request-line lookahead.
//!
//! Only the first read of a connection is inspected, and only its first
//! eight bytes matter: `GET /` followed by the route token. No headers are
//! parsed.

use std::fmt;

const GET_PREFIX: &[u8] = b"GET /";

/// Response strategy chosen from the path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Any path starting with `s`, e.g. `/stream`.
    Stream,
    /// `/bmp`
    Bitmap,
    /// `/pgm`
    Graymap,
    /// `/get`
    Raw,
    /// Everything else.
    Info,
}

impl Route {
    pub fn is_stream(self) -> bool {
        self == Route::Stream
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Route::Stream => "stream",
            Route::Bitmap => "bmp",
            Route::Graymap => "pgm",
            Route::Raw => "get",
            Route::Info => "info",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer than five bytes arrived.
    ShortRequest { len: usize },
    /// The request does not start with `GET /`.
    NotGet,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::ShortRequest { len } => {
                write!(f, "request too short ({} bytes)", len)
            }
            ProtocolError::NotGet => write!(f, "not a GET request"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Picks the route from the first segment of a request.
pub fn parse_route(segment: &[u8]) -> Result<Route, ProtocolError> {
    if segment.len() < GET_PREFIX.len() {
        return Err(ProtocolError::ShortRequest { len: segment.len() });
    }
    let Some(path) = segment.strip_prefix(GET_PREFIX) else {
        return Err(ProtocolError::NotGet);
    };
    let route = match path {
        [b's', ..] => Route::Stream,
        _ if path.starts_with(b"bmp") => Route::Bitmap,
        _ if path.starts_with(b"pgm") => Route::Graymap,
        _ if path.starts_with(b"get") => Route::Raw,
        _ => Route::Info,
    };
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_token_after_slash() {
        let cases: [(&[u8], Route); 7] = [
            (b"GET /stream HTTP/1.1\r\n\r\n", Route::Stream),
            (b"GET /snapshot HTTP/1.1\r\n", Route::Stream),
            (b"GET /bmp HTTP/1.1\r\n", Route::Bitmap),
            (b"GET /pgm", Route::Graymap),
            (b"GET /get?x=1 HTTP/1.0\r\n", Route::Raw),
            (b"GET / HTTP/1.1\r\n", Route::Info),
            (b"GET /", Route::Info),
        ];
        for (request, route) in cases {
            assert_eq!(parse_route(request), Ok(route), "{:?}", request);
        }
    }

    #[test]
    fn rejects_short_and_non_get_requests() {
        assert_eq!(parse_route(b""), Err(ProtocolError::ShortRequest { len: 0 }));
        assert_eq!(parse_route(b"GET "), Err(ProtocolError::ShortRequest { len: 4 }));
        assert_eq!(parse_route(b"POST /bmp"), Err(ProtocolError::NotGet));
        assert_eq!(parse_route(b"get /bmp"), Err(ProtocolError::NotGet));
        assert_eq!(parse_route(b"GET  /bmp"), Err(ProtocolError::NotGet));
    }
}
