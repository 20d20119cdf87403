//! Cookie parsing and serialization for the `Cookie` and `Set-Cookie` headers.
//!
//! Only well-formed `name=value` pairs survive a parse. Everything that transits the gate is re-serialized from
//! these pairs rather than copied as raw header text.

use http::{header, HeaderMap, HeaderValue};
use std::fmt;

/// A single `name=value` cookie pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    /// Creates a new cookie pair. Returns `None` if either half is malformed.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let value = value.into();
        if is_valid_name(&name) && is_valid_value(&value) {
            Some(Self { name, value })
        } else {
            None
        }
    }

    /// Parses a single `name=value` pair, tolerating surrounding whitespace and a double-quoted value.
    fn parse_pair(pair: &str) -> Option<Self> {
        let (name, value) = pair.trim().split_once('=')?;
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Self::new(name.trim(), value)
    }
}

impl fmt::Display for Cookie {
    /// Values containing a space or a comma are double-quoted so the pair reads back unchanged.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.contains([' ', ',']) {
            write!(f, "{}=\"{}\"", self.name, self.value)
        } else {
            write!(f, "{}={}", self.name, self.value)
        }
    }
}

/// Reads every well-formed cookie from all `Cookie` headers, in order.
pub fn request_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(Cookie::parse_pair)
        .collect()
}

/// Reads the cookie pair from every well-formed `Set-Cookie` header, in order.
///
/// Attributes such as `Path` or `Max-Age` are discarded.
pub fn response_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(Cookie::parse_pair)
        .collect()
}

/// Serializes cookies into a single `Cookie` header value, or `None` if there are none.
pub fn cookie_header(cookies: &[Cookie]) -> Option<HeaderValue> {
    if cookies.is_empty() {
        return None;
    }
    let joined = cookies
        .iter()
        .map(Cookie::to_string)
        .collect::<Vec<String>>()
        .join("; ");
    // Names and values were validated on construction so this can't fail in practice.
    HeaderValue::from_str(&joined).ok()
}

/// Replaces every `Cookie` header with one serialized from `cookies`.
pub fn set_cookies(headers: &mut HeaderMap, cookies: &[Cookie]) {
    headers.remove(header::COOKIE);
    if let Some(value) = cookie_header(cookies) {
        headers.insert(header::COOKIE, value);
    }
}

/// Cookie names are RFC 7230 tokens.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

/// Cookie values are RFC 6265 cookie-octets. Spaces and commas are tolerated as browsers send them.
fn is_valid_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| (0x20..0x7f).contains(&b) && b != b'"' && b != b';' && b != b'\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("test=testing; session=\"abc\""),
        );
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));

        let cookies = request_cookies(&headers);
        assert_eq!(
            cookies,
            vec![
                Cookie::new("test", "testing").unwrap(),
                Cookie::new("session", "abc").unwrap(),
                Cookie::new("theme", "dark").unwrap(),
            ]
        );
    }

    #[test]
    fn test_request_cookies_drops_malformed_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("good=1; novalue; =anonymous; bad name=2; ok=2"),
        );

        let cookies = request_cookies(&headers);
        assert_eq!(
            cookies,
            vec![
                Cookie::new("good", "1").unwrap(),
                Cookie::new("ok", "2").unwrap(),
            ]
        );
    }

    #[test]
    fn test_response_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("user=alice; Path=/; HttpOnly"),
        );
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("role=admin; Max-Age=60"),
        );
        headers.append(header::SET_COOKIE, HeaderValue::from_static("Path=/"));

        let cookies = response_cookies(&headers);
        assert_eq!(
            cookies,
            vec![
                Cookie::new("user", "alice").unwrap(),
                Cookie::new("role", "admin").unwrap(),
                Cookie::new("Path", "/").unwrap(),
            ]
        );
    }

    #[test]
    fn test_cookie_header() {
        assert_eq!(cookie_header(&[]), None);
        assert_eq!(
            cookie_header(&[
                Cookie::new("a", "1").unwrap(),
                Cookie::new("b", "2").unwrap()
            ]),
            Some(HeaderValue::from_static("a=1; b=2"))
        );
    }

    #[test]
    fn test_quoted_values() {
        assert_eq!(Cookie::new("pref", "a b").unwrap().to_string(), "pref=\"a b\"");
        assert_eq!(Cookie::new("list", "x,y").unwrap().to_string(), "list=\"x,y\"");
        assert_eq!(Cookie::new("plain", "xyz").unwrap().to_string(), "plain=xyz");

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("pref=\"a b\"; list=x,y; plain=xyz"),
        );
        let cookies = request_cookies(&headers);
        set_cookies(&mut headers, &cookies);
        assert_eq!(
            headers.get(header::COOKIE).unwrap(),
            "pref=\"a b\"; list=\"x,y\"; plain=xyz"
        );
        assert_eq!(request_cookies(&headers), cookies);
    }

    #[test]
    fn test_set_cookies_replaces_raw_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; junk"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        let cookies = request_cookies(&headers);
        set_cookies(&mut headers, &cookies);
        assert_eq!(headers.get_all(header::COOKIE).iter().count(), 1);
        assert_eq!(headers.get(header::COOKIE).unwrap(), "a=1; b=2");

        set_cookies(&mut headers, &[]);
        assert!(headers.get(header::COOKIE).is_none());
    }

    #[test]
    fn test_cookie_validation() {
        assert!(Cookie::new("", "x").is_none());
        assert!(Cookie::new("a;b", "x").is_none());
        assert!(Cookie::new("name", "semi;colon").is_none());
        assert!(Cookie::new("name", "").is_some());
    }
}
