use std::fmt::{Display, Formatter};

/// The delimiter between header parameters in From / To / Contact fields and between URI
///  parameters inside a SIP URI.
pub const PARAM_DELIMITER: char = ';';

/// The delimiter between URI headers (the part of a SIP URI after the `?`).
pub const HEADER_DELIMITER: char = '&';

/// An ordered list of `name[=value]` pairs as they appear in SIP URIs and header fields.
///
/// Names are compared case-insensitively (RFC 3261 section 7.3.1) but retain the spelling
///  they were first added with. Setting a name that is already present replaces its value in
///  place, so a duplicate in parsed input resolves to the *last* occurrence while keeping the
///  position of the first.
#[derive(Clone, Debug)]
pub struct SipParameters {
    delimiter: char,
    entries: Vec<(String, Option<String>)>,
}

impl SipParameters {
    pub fn new(delimiter: char) -> SipParameters {
        SipParameters {
            delimiter,
            entries: Vec::new(),
        }
    }

    /// Parses a delimited parameter list. A leading delimiter is skipped, empty segments are
    ///  ignored, and whitespace around names and values is trimmed.
    ///
    /// Delimiters inside double quotes do not split, so `foo="a;b"` is a single parameter.
    pub fn parse(s: &str, delimiter: char) -> SipParameters {
        let mut result = SipParameters::new(delimiter);

        let s = s.trim();
        let s = s.strip_prefix(delimiter).unwrap_or(s);

        for segment in split_unquoted(s, delimiter) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            match segment.split_once('=') {
                Some((name, value)) => {
                    let name = name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    result.set(name, Some(value.trim()));
                }
                None => result.set(segment, None),
            }
        }
        result
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// `None` if the parameter is absent, `Some(None)` if it is present without a value.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.position(name)
            .map(|idx| self.entries[idx].1.as_deref())
    }

    pub fn set(&mut self, name: &str, value: Option<&str>) {
        let value = value.map(str::to_string);
        match self.position(name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Option<String>> {
        self.position(name)
            .map(|idx| self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter()
            .map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Renders the list with `first_separator` in front of the first entry and the delimiter
    ///  between entries - URI headers start with `?`, everything else with the delimiter.
    pub(crate) fn write_with(&self, f: &mut Formatter<'_>, first_separator: char) -> std::fmt::Result {
        for (idx, (name, value)) in self.entries.iter().enumerate() {
            let separator = if idx == 0 { first_separator } else { self.delimiter };
            match value {
                Some(value) => write!(f, "{}{}={}", separator, name, value)?,
                None => write!(f, "{}{}", separator, name)?,
            }
        }
        Ok(())
    }
}

impl Display for SipParameters {
    /// Every entry is preceded by the delimiter, i.e. `;tag=abc;lr` - ready to be appended to
    ///  a URI or a `<...>` address.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.write_with(f, self.delimiter)
    }
}

/// Order does not matter for equality, but names are case-insensitive and values are not.
impl PartialEq for SipParameters {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().all(|(name, value)| other.get(name) == Some(value))
    }
}
impl Eq for SipParameters {}

pub(crate) fn split_unquoted(s: &str, delimiter: char) -> Vec<&str> {
    let mut result = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                result.push(&s[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    result.push(&s[start..]);
    result
}

/// Byte offset of the first occurrence of `needle` outside of a double-quoted section.
pub(crate) fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(idx),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::empty("", vec![])]
    #[case::single_flag("lr", vec![("lr", None)])]
    #[case::single_value("tag=xyz", vec![("tag", Some("xyz"))])]
    #[case::leading_delimiter(";tag=xyz;lr", vec![("tag", Some("xyz")), ("lr", None)])]
    #[case::whitespace(" tag = xyz ;  lr ", vec![("tag", Some("xyz")), ("lr", None)])]
    #[case::empty_segments("a=1;;b", vec![("a", Some("1")), ("b", None)])]
    #[case::last_wins("tag=1;x;tag=2", vec![("tag", Some("2")), ("x", None)])]
    #[case::last_wins_ignoring_case("Tag=1;TAG=2", vec![("Tag", Some("2"))])]
    #[case::quoted_delimiter("foo=\"a;b\";c", vec![("foo", Some("\"a;b\"")), ("c", None)])]
    #[case::empty_value("expires=", vec![("expires", Some(""))])]
    fn test_parse(#[case] s: &str, #[case] expected: Vec<(&str, Option<&str>)>) {
        let params = SipParameters::parse(s, PARAM_DELIMITER);
        assert_eq!(params.iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_parse_with_other_delimiter() {
        let params = SipParameters::parse("subject=project&priority=urgent", HEADER_DELIMITER);
        assert_eq!(params.get("subject"), Some(Some("project")));
        assert_eq!(params.get("priority"), Some(Some("urgent")));
        assert_eq!(params.to_string(), "&subject=project&priority=urgent");
    }

    #[test]
    fn test_get_set_remove() {
        let mut params = SipParameters::new(PARAM_DELIMITER);
        assert!(params.is_empty());
        assert_eq!(params.get("tag"), None);

        params.set("tag", Some("abc"));
        params.set("lr", None);
        assert_eq!(params.get("TAG"), Some(Some("abc")));
        assert_eq!(params.get("lr"), Some(None));
        assert!(params.contains("Lr"));

        assert_eq!(params.remove("tag"), Some(Some("abc".to_string())));
        assert_eq!(params.remove("tag"), None);
        assert_eq!(params.len(), 1);
    }

    #[rstest]
    #[case::empty("", "")]
    #[case::two("tag=xyz;lr", ";tag=xyz;lr")]
    #[case::normalized(" a = 1 ; b ", ";a=1;b")]
    fn test_display(#[case] s: &str, #[case] expected: &str) {
        assert_eq!(SipParameters::parse(s, PARAM_DELIMITER).to_string(), expected);
    }

    #[test]
    fn test_eq_ignores_order() {
        let a = SipParameters::parse("a=1;b", PARAM_DELIMITER);
        let b = SipParameters::parse("b;A=1", PARAM_DELIMITER);
        let c = SipParameters::parse("b;a=2", PARAM_DELIMITER);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[rstest]
    #[case::plain("a<b", '<', Some(1))]
    #[case::quoted("\"a<\" <b", '<', Some(5))]
    #[case::escaped_quote("\"a\\\"<\" <b", '<', Some(7))]
    #[case::missing("\"<\"", '<', None)]
    fn test_find_unquoted(#[case] s: &str, #[case] needle: char, #[case] expected: Option<usize>) {
        assert_eq!(find_unquoted(s, needle), expected);
    }
}
