//! Allow-list for post-login redirects.
//!
//! Entries are either bare hosts (`good.test`), which accept any http or
//! https URL on that host, or origins (`https://good.test`), which also pin
//! scheme and port.

use crate::error::LoginError;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Allowed {
    Host(String),
    Origin(url::Origin),
}

/// Decides which `return_to` URLs a login may redirect to.
#[derive(Debug, Clone, Default)]
pub struct ReturnPolicy {
    allowed: Vec<Allowed>,
}

impl ReturnPolicy {
    /// Builds a policy from configured entries. Unparseable entries are
    /// skipped.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = entries
            .into_iter()
            .filter_map(|entry| {
                let entry = entry.as_ref().trim();
                if entry.is_empty() {
                    None
                } else if entry.contains("://") {
                    Url::parse(entry).ok().map(|url| Allowed::Origin(url.origin()))
                } else {
                    Some(Allowed::Host(entry.to_ascii_lowercase()))
                }
            })
            .collect();
        Self { allowed }
    }

    /// Checks `raw` against the allow-list and returns it normalized.
    pub fn check(&self, raw: &str) -> Result<String, LoginError> {
        let invalid = |reason: &str| LoginError::InvalidReturnUrl {
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|_| invalid("not an absolute url"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme is not allowed"));
        }
        let Some(host) = url.host_str() else {
            return Err(invalid("missing host"));
        };

        let origin = url.origin();
        let permitted = self.allowed.iter().any(|allowed| match allowed {
            Allowed::Host(allowed) => allowed == host,
            Allowed::Origin(allowed) => *allowed == origin,
        });
        if !permitted {
            return Err(invalid("host is not allowed"));
        }

        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_origin_passes() {
        let policy = ReturnPolicy::new(["https://good.test"]);
        assert_eq!(
            policy.check("https://good.test/home?tab=1"),
            Ok("https://good.test/home?tab=1".to_string())
        );
    }

    #[test]
    fn origin_entry_pins_scheme() {
        let policy = ReturnPolicy::new(["https://good.test"]);
        assert!(matches!(
            policy.check("http://good.test/"),
            Err(LoginError::InvalidReturnUrl { .. })
        ));
    }

    #[test]
    fn unlisted_host_is_rejected() {
        let policy = ReturnPolicy::new(["https://good.test"]);
        assert!(policy.check("http://evil.test").is_err());
        assert!(policy.check("https://good.test.evil.test/").is_err());
    }

    #[test]
    fn bare_host_entry_accepts_both_schemes() {
        let policy = ReturnPolicy::new(["Good.Test"]);
        assert!(policy.check("http://good.test/a").is_ok());
        assert!(policy.check("https://GOOD.test/b").is_ok());
        assert!(policy.check("ftp://good.test/c").is_err());
    }

    #[test]
    fn relative_and_scriptable_urls_are_rejected() {
        let policy = ReturnPolicy::new(["good.test"]);
        for raw in ["/home", "good.test", "//good.test/x", "javascript:alert(1)", ""] {
            let result = policy.check(raw);
            assert!(
                matches!(result, Err(LoginError::InvalidReturnUrl { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn empty_policy_rejects_everything() {
        let policy = ReturnPolicy::default();
        assert!(policy.check("https://good.test").is_err());
    }
}
