//! The authenticated caller identity (spec §4.8, glossary "Principal").

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::{fmt, str::FromStr};

const PREFIX: &str = "system:serviceaccount";

/// A decomposed `system:serviceaccount:<namespace>:<name>` identity.
///
/// Kept alongside the raw string so the original bearer-token subject can be
/// forwarded verbatim (e.g. as a gRPC/HTTP header) without re-assembling it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct Principal {
    pub namespace: String,
    pub service_account: String,
    raw: String,
}

impl Principal {
    /// The cache key used by `ClientCache`: `"namespace:principal"`.
    pub fn cache_key(&self, namespace: &str) -> String {
        format!("{}:{}", namespace, self.raw)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Principal {
    type Err = MalformedPrincipal;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let rest = source
            .strip_prefix(PREFIX)
            .and_then(|s| s.strip_prefix(':'))
            .ok_or_else(|| MalformedPrincipal {
                subject: source.to_string(),
            })?;
        let mut parts = rest.splitn(2, ':');
        let namespace = parts.next().filter(|s| !s.is_empty());
        let name = parts.next().filter(|s| !s.is_empty());
        match (namespace, name) {
            (Some(namespace), Some(name)) => Ok(Self {
                namespace: namespace.to_string(),
                service_account: name.to_string(),
                raw: source.to_string(),
            }),
            _ => Err(MalformedPrincipal {
                subject: source.to_string(),
            }),
        }
    }
}

/// Returned when a subject does not decompose into
/// `system:serviceaccount:<namespace>:<name>`; the auth gate maps this to 401.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
#[snafu(display("malformed principal subject '{}'", subject))]
pub struct MalformedPrincipal {
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_subject() {
        let p: Principal = "system:serviceaccount:default:my-sa".parse().unwrap();
        assert_eq!(p.namespace, "default");
        assert_eq!(p.service_account, "my-sa");
        assert_eq!(p.cache_key("ns1"), "ns1:system:serviceaccount:default:my-sa");
    }

    #[test]
    fn rejects_missing_name() {
        assert!("system:serviceaccount:default:".parse::<Principal>().is_err());
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!("system:anonymous".parse::<Principal>().is_err());
    }

    #[test]
    fn rejects_missing_namespace() {
        assert!("system:serviceaccount::name".parse::<Principal>().is_err());
    }
}
