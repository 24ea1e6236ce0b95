//! Distinguished names
//!
//! A small RFC 4514 parser, enough to pull usernames out of member
//! attribute values, plus the value escaping used when building DNs
//! (RFC 4514) and search filters (RFC 4515).

use std::fmt;
use std::str::FromStr;

use crate::error::{ConnectorError, ConnectorResult};

/// A single `type=value` pair of an RDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTypeAndValue {
    /// Attribute type as written (case preserved).
    pub attr_type: String,
    /// Unescaped value. Hex-string values (`#04...`) are kept verbatim.
    pub value: String,
}

/// Relative distinguished name. Multi-valued RDNs are joined with `+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub components: Vec<AttributeTypeAndValue>,
}

impl Rdn {
    /// First value whose type matches `attr_type` case-insensitively.
    #[must_use]
    pub fn value_of(&self, attr_type: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|c| c.attr_type.eq_ignore_ascii_case(attr_type))
            .map(|c| c.value.as_str())
    }
}

/// Parsed distinguished name, leftmost (most specific) RDN first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    /// Parse an RFC 4514 string.
    pub fn parse(dn: &str) -> ConnectorResult<Self> {
        Parser::new(dn).parse()
    }

    /// RDNs, leftmost first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Value of the leftmost RDN component of the given type.
    #[must_use]
    pub fn first_value_of(&self, attr_type: &str) -> Option<&str> {
        self.rdns.iter().find_map(|rdn| rdn.value_of(attr_type))
    }

    /// Value of the leftmost `cn` component.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.first_value_of("cn")
    }
}

impl FromStr for DistinguishedName {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            for (j, atv) in rdn.components.iter().enumerate() {
                if j > 0 {
                    f.write_str("+")?;
                }
                if atv.value.starts_with('#') && is_hex_string(&atv.value[1..]) {
                    write!(f, "{}={}", atv.attr_type, atv.value)?;
                } else {
                    write!(f, "{}={}", atv.attr_type, escape_dn_value(&atv.value))?;
                }
            }
        }
        Ok(())
    }
}

/// Extract the username carried by a member DN: the leftmost `cn` value.
///
/// Returns `Ok(None)` for a well-formed DN with no `cn` component.
pub fn leaf_common_name(dn: &str) -> ConnectorResult<Option<String>> {
    let parsed = DistinguishedName::parse(dn)?;
    Ok(parsed.common_name().map(str::to_string))
}

/// Escape an attribute value for use inside a DN (RFC 4514).
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len() * 2);
    let last = value.chars().count().saturating_sub(1);

    for (i, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if i == 0 || i == last => result.push_str("\\20"),
            '#' if i == 0 => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

/// Escape an assertion value for use inside a search filter (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => result.push_str("\\5c"),
            '*' => result.push_str("\\2a"),
            '(' => result.push_str("\\28"),
            ')' => result.push_str("\\29"),
            '\0' => result.push_str("\\00"),
            _ => result.push(ch),
        }
    }
    result
}

fn is_hex_string(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ConnectorError {
        ConnectorError::InvalidDn {
            dn: self.input.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> ConnectorResult<DistinguishedName> {
        let mut rdns = Vec::new();
        self.skip_spaces();
        if self.peek().is_none() {
            return Ok(DistinguishedName { rdns });
        }

        let mut components = Vec::new();
        loop {
            components.push(self.parse_attribute()?);
            match self.peek() {
                None => {
                    rdns.push(Rdn { components });
                    break;
                }
                Some(b'+') => {
                    self.pos += 1;
                }
                Some(b',' | b';') => {
                    self.pos += 1;
                    rdns.push(Rdn {
                        components: std::mem::take(&mut components),
                    });
                }
                Some(other) => {
                    return Err(self.error(format!(
                        "unexpected '{}' at offset {}",
                        other as char, self.pos
                    )))
                }
            }
        }

        Ok(DistinguishedName { rdns })
    }

    fn parse_attribute(&mut self) -> ConnectorResult<AttributeTypeAndValue> {
        self.skip_spaces();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let attr_type = &self.input[start..self.pos];
        if attr_type.is_empty() {
            let message = format!("missing attribute type at offset {start}");
            return Err(self.error(message));
        }

        self.skip_spaces();
        if self.peek() != Some(b'=') {
            return Err(self.error(format!("expected '=' after '{attr_type}'")));
        }
        self.pos += 1;
        self.skip_spaces();

        let value = match self.peek() {
            Some(b'"') => self.parse_quoted_value()?,
            Some(b'#') => self.parse_hex_value()?,
            _ => self.parse_string_value()?,
        };
        self.skip_spaces();

        Ok(AttributeTypeAndValue {
            attr_type: attr_type.to_string(),
            value,
        })
    }

    fn parse_hex_value(&mut self) -> ConnectorResult<String> {
        let start = self.pos;
        self.pos += 1;
        while let Some(b) = self.peek() {
            if b.is_ascii_hexdigit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let raw = &self.input[start..self.pos];
        if !is_hex_string(&raw[1..]) {
            return Err(self.error(format!("malformed hex value '{raw}'")));
        }
        Ok(raw.to_string())
    }

    fn parse_quoted_value(&mut self) -> ConnectorResult<String> {
        self.pos += 1;
        let mut value = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted value")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    self.parse_escape(&mut value)?;
                }
                Some(b) => {
                    value.push(b);
                    self.pos += 1;
                }
            }
        }
        String::from_utf8(value).map_err(|_| self.error("value is not valid UTF-8"))
    }

    fn parse_string_value(&mut self) -> ConnectorResult<String> {
        let mut value = Vec::new();
        // Length up to the last escaped or non-space byte; unescaped
        // trailing spaces are not part of the value.
        let mut significant = 0;

        while let Some(b) = self.peek() {
            match b {
                b',' | b';' | b'+' => break,
                b'"' => {
                    let offset = self.pos;
                    return Err(self.error(format!("unescaped '\"' at offset {offset}")));
                }
                b'\\' => {
                    self.pos += 1;
                    self.parse_escape(&mut value)?;
                    significant = value.len();
                }
                b' ' => {
                    value.push(b);
                    self.pos += 1;
                }
                _ => {
                    value.push(b);
                    self.pos += 1;
                    significant = value.len();
                }
            }
        }

        value.truncate(significant);
        String::from_utf8(value).map_err(|_| self.error("value is not valid UTF-8"))
    }

    /// Decode the escape following a backslash (already consumed).
    fn parse_escape(&mut self, value: &mut Vec<u8>) -> ConnectorResult<()> {
        let Some(first) = self.peek() else {
            return Err(self.error("dangling escape at end of input"));
        };

        if let Some(hi) = hex_value(first) {
            let offset = self.pos;
            let lo = self
                .bytes
                .get(offset + 1)
                .copied()
                .and_then(hex_value)
                .ok_or_else(|| self.error(format!("bad hex escape at offset {offset}")))?;
            value.push(hi << 4 | lo);
            self.pos += 2;
            return Ok(());
        }

        match first {
            b',' | b'+' | b'"' | b'\\' | b'<' | b'>' | b';' | b'=' | b' ' | b'#' => {
                value.push(first);
                self.pos += 1;
                Ok(())
            }
            other => Err(self.error(format!(
                "invalid escape '\\{}' at offset {}",
                other as char, self.pos
            ))),
        }
    }
}
