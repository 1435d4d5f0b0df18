//! Header storage for outgoing messages.

use bytes::BytesMut;

/// Header names generated by the message stream itself.
const GENERATED: [&str; 2] = ["Mime-Version", "Content-Transfer-Encoding"];

/// Ordered collection of outgoing headers.
///
/// Names are stored in canonical form (`content-type` becomes
/// `Content-Type`). Headers are written in the order their names were first
/// set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header value, replacing any existing value in place.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = canonical_name(name);
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Gets the value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = canonical_name(name);
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no headers are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over all headers in output order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Appends `Name: Value<eol>` lines to `out`.
    ///
    /// Headers the stream generates itself are skipped.
    pub(crate) fn write_to(&self, out: &mut BytesMut, eol: &str) {
        for (name, value) in self.iter() {
            if GENERATED.contains(&name) {
                tracing::warn!(header = name, "ignoring header generated by the message stream");
                continue;
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(eol.as_bytes());
        }
    }
}

/// Canonicalizes a header name (e.g., "content-type" -> "Content-Type").
#[must_use]
pub fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("content-type"), "Content-Type");
        assert_eq!(canonical_name("MESSAGE-ID"), "Message-Id");
        assert_eq!(canonical_name("subject"), "Subject");
        assert_eq!(canonical_name("MIME-Version"), "Mime-Version");
    }

    #[test]
    fn test_headers_set_get() {
        let mut headers = Headers::new();
        headers.set("content-type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn test_headers_replace_keeps_position() {
        let mut headers = Headers::new();
        headers.set("To", "alice@example.com");
        headers.set("Subject", "Hi");
        headers.set("to", "bob@example.com");

        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["To", "Subject"]);
        assert_eq!(headers.get("To"), Some("bob@example.com"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_headers_write_to() {
        let mut headers = Headers::new();
        headers.set("from", "sender@example.com");
        headers.set("mime-version", "2.0");
        headers.set("to", "recipient@example.com");

        let mut out = BytesMut::new();
        headers.write_to(&mut out, "\r\n");
        assert_eq!(
            &out[..],
            b"From: sender@example.com\r\nTo: recipient@example.com\r\n"
        );
    }

    #[test]
    fn test_headers_write_to_uses_given_eol() {
        let mut headers = Headers::new();
        headers.set("from", "sender@example.com");
        headers.set("to", "recipient@example.com");

        let mut out = BytesMut::new();
        headers.write_to(&mut out, "\n");
        assert_eq!(&out[..], b"From: sender@example.com\nTo: recipient@example.com\n");
    }
}
