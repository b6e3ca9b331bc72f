//! Token-scoped PKCS#11 URIs (RFC 7512)
//!
//! Parses a `pkcs11:` URI into a [`TokenFilter`] and renders a token
//! descriptor back into its canonical URI. Only the token attributes
//! (`token`, `manufacturer`, `model`, `serial`) are understood; any other
//! path attribute marks the filter as unrecognized, and an unrecognized
//! filter matches nothing.

use miette::Diagnostic;
use std::str::FromStr;
use thiserror::Error;

use crate::core::pkcs11::{unpadded, TokenInfo};

const SCHEME: &str = "pkcs11:";

/// Characters written as-is in path attribute values
const VERBATIM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.~:[]@!$'()*+,=&";

/// Errors from parsing or formatting token URIs
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum UriError {
    #[error("URI does not start with the 'pkcs11:' scheme")]
    #[diagnostic(code(p11kit::uri::bad_scheme), help("token URIs look like 'pkcs11:token=My%20Token'"))]
    BadScheme,

    #[error("invalid percent-encoding in '{0}'")]
    #[diagnostic(code(p11kit::uri::bad_encoding))]
    BadEncoding(String),

    #[error("malformed URI attribute '{0}'")]
    #[diagnostic(code(p11kit::uri::bad_syntax))]
    BadSyntax(String),

    #[error("token {0} cannot be represented in a URI")]
    #[diagnostic(code(p11kit::uri::not_canonical))]
    NotCanonical(&'static str),
}

/// Which token attributes a filter constrains
///
/// Each value is compared against the matching token field with its space
/// padding removed. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenFilter {
    token: Option<Vec<u8>>,
    manufacturer: Option<Vec<u8>>,
    model: Option<Vec<u8>>,
    serial: Option<Vec<u8>>,
    unrecognized: bool,
}

impl TokenFilter {
    /// A filter matching every token
    pub fn any() -> Self {
        Self::default()
    }

    /// True when the URI named attributes outside the token scope
    pub fn has_unrecognized(&self) -> bool {
        self.unrecognized
    }

    /// Check a token descriptor against the filter
    pub fn matches(&self, info: &TokenInfo) -> bool {
        if self.unrecognized {
            return false;
        }

        let field_matches = |wanted: &Option<Vec<u8>>, field: &[u8]| match wanted {
            Some(value) => unpadded(field) == value.as_slice(),
            None => true,
        };

        field_matches(&self.token, &info.label[..])
            && field_matches(&self.manufacturer, &info.manufacturer_id[..])
            && field_matches(&self.model, &info.model[..])
            && field_matches(&self.serial, &info.serial_number[..])
    }

    fn set(&mut self, name: &str, value: Vec<u8>) {
        let (slot, max) = match name {
            "token" => (&mut self.token, 32),
            "manufacturer" => (&mut self.manufacturer, 32),
            "model" => (&mut self.model, 16),
            "serial" => (&mut self.serial, 16),
            _ => {
                self.unrecognized = true;
                return;
            }
        };

        // A value that cannot fit the field can never match it.
        if value.len() > max {
            self.unrecognized = true;
            return;
        }
        *slot = Some(value);
    }
}

impl FromStr for TokenFilter {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.get(..SCHEME.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(SCHEME) => &s[SCHEME.len()..],
            _ => return Err(UriError::BadScheme),
        };

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut filter = TokenFilter::default();
        for attr in path.split(';').filter(|a| !a.is_empty()) {
            let (name, value) = attr
                .split_once('=')
                .ok_or_else(|| UriError::BadSyntax(attr.to_string()))?;
            if name.is_empty() {
                return Err(UriError::BadSyntax(attr.to_string()));
            }
            let value = percent_decode(value)?;
            filter.set(name, value);
        }

        // Query attributes (pin-source, module-name, ...) don't select tokens
        if let Some(query) = query {
            for attr in query.split('&').filter(|a| !a.is_empty()) {
                let (_, value) = attr
                    .split_once('=')
                    .ok_or_else(|| UriError::BadSyntax(attr.to_string()))?;
                percent_decode(value)?;
            }
        }

        Ok(filter)
    }
}

/// Render the canonical token URI for a descriptor
///
/// All four attributes are written, in the order model, manufacturer,
/// serial, token. A blank field is written with an empty value so the URI
/// still pins it. Fails if a field is not valid UTF-8.
pub fn format_token_uri(info: &TokenInfo) -> Result<String, UriError> {
    let mut uri = String::from(SCHEME);
    let fields: [(&str, &[u8]); 4] = [
        ("model", &info.model[..]),
        ("manufacturer", &info.manufacturer_id[..]),
        ("serial", &info.serial_number[..]),
        ("token", &info.label[..]),
    ];

    for (i, (name, field)) in fields.into_iter().enumerate() {
        let value = unpadded(field);
        std::str::from_utf8(value).map_err(|_| UriError::NotCanonical(name))?;

        if i > 0 {
            uri.push(';');
        }
        uri.push_str(name);
        uri.push('=');
        percent_encode_into(&mut uri, value);
    }

    Ok(uri)
}

fn percent_encode_into(out: &mut String, value: &[u8]) {
    for &b in value {
        if VERBATIM.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
}

fn percent_decode(value: &str) -> Result<Vec<u8>, UriError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| UriError::BadEncoding(value.to_string()))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    Ok(out)
}
