use crate::error::{ExtractError, Result};

/// Splits an attribute list such as `METHOD=AES-128,URI="k,1"` into
/// `(name, value)` pairs. Commas inside double quotes do not separate
/// attributes; values are returned as written, quotes included.
pub fn parse_attributes(list: &str) -> Result<Vec<(&str, &str)>> {
    let mut attributes = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (index, char) in list.char_indices() {
        match char {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                push_attribute(&mut attributes, &list[start..index])?;
                start = index + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(ExtractError::format(format!(
            "unterminated quoted string in attribute list {list:?}"
        )));
    }
    push_attribute(&mut attributes, &list[start..])?;

    Ok(attributes)
}

fn push_attribute<'a>(attributes: &mut Vec<(&'a str, &'a str)>, raw: &'a str) -> Result<()> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }

    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            attributes.push((name.trim(), value.trim()));
            Ok(())
        }
        _ => Err(ExtractError::format(format!("malformed attribute {raw:?}"))),
    }
}

/// Looks up `name` in a parsed attribute list.
pub fn find<'a>(attributes: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
}

pub fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_outside_quotes() {
        let attributes =
            parse_attributes(r#"BANDWIDTH=1280000,CODECS="avc1.4d401f,mp4a.40.2",RESOLUTION=1280x720"#)
                .unwrap();

        assert_eq!(
            attributes,
            vec![
                ("BANDWIDTH", "1280000"),
                ("CODECS", r#""avc1.4d401f,mp4a.40.2""#),
                ("RESOLUTION", "1280x720"),
            ]
        );
        assert_eq!(find(&attributes, "RESOLUTION"), Some("1280x720"));
        assert_eq!(find(&attributes, "AUDIO"), None);
    }

    #[test]
    fn skips_empty_items() {
        assert_eq!(
            parse_attributes("METHOD=NONE,").unwrap(),
            vec![("METHOD", "NONE")]
        );
        assert!(parse_attributes("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_lists() {
        assert!(parse_attributes("METHOD").is_err());
        assert!(parse_attributes("=AES-128").is_err());
        assert!(parse_attributes(r#"URI="unterminated"#).is_err());
    }

    #[test]
    fn unquotes_values() {
        assert_eq!(unquote(r#""key.bin""#), "key.bin");
        assert_eq!(unquote("plain"), "plain");
    }
}
