use std::path::Path;

use tracing::debug;

use crate::error::{ExtractError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Domain the cookie is bound to, `None` sends it to every host.
    pub domain: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Whether this cookie should accompany a request to `host`.
    pub fn matches_host(&self, host: &str) -> bool {
        let Some(domain) = &self.domain else {
            return true;
        };
        let domain = domain.trim_start_matches('.');
        if domain.is_empty() || host.eq_ignore_ascii_case(domain) {
            return true;
        }

        host.len() > domain.len()
            && host[host.len() - domain.len()..].eq_ignore_ascii_case(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
    }
}

/// Parses the Netscape `cookies.txt` format exported by browsers and curl.
pub fn parse_cookies(content: &str) -> Result<Vec<Cookie>> {
    let mut cookies = Vec::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        let line = match line.strip_prefix("#HttpOnly_") {
            Some(rest) => rest,
            None if line.starts_with('#') || line.trim().is_empty() => continue,
            None => line,
        };

        let fields = line.split('\t').collect::<Vec<&str>>();
        if fields.len() < 7 {
            return Err(ExtractError::Config(format!(
                "cookie file line {}: expected 7 tab separated fields, found {}",
                number + 1,
                fields.len()
            )));
        }

        cookies.push(Cookie::new(fields[5], fields[6]).with_domain(fields[0]));
    }

    Ok(cookies)
}

pub fn load_cookie_file(path: &Path) -> Result<Vec<Cookie>> {
    let content = std::fs::read_to_string(path).map_err(|err| ExtractError::io(path, err))?;
    let cookies = parse_cookies(&content)?;
    debug!(count = cookies.len(), file = %path.display(), "loaded cookies");
    Ok(cookies)
}
