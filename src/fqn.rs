//! Fully Qualified Name (FQN) support for attribute labels
//!
//! Access-control labels are attribute value FQNs:
//!
//! - Attribute: `https://<namespace>/attr/<name>`
//! - Value: `https://<namespace>/attr/<name>/value/<value>`
//!
//! Labels are checked here before any protect call so a malformed label is
//! reported as a configuration error instead of surfacing from the key
//! access server.
//!
//! # Example
//!
//! ```
//! use opentdf_batch::fqn::AttributeFqn;
//!
//! let fqn = AttributeFqn::parse("https://example.com/attr/classification/value/secret")?;
//! assert_eq!(fqn.namespace(), "example.com");
//! assert_eq!(fqn.name(), "classification");
//! assert_eq!(fqn.value(), Some("secret"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FqnError {
    #[error("Invalid URL scheme: expected '{expected}', found '{found}'")]
    InvalidScheme {
        expected: &'static str,
        found: String,
    },

    #[error("URL must use HTTPS scheme: {url}")]
    NotHttps { url: String },

    #[error("FQN missing required /attr/ structure: {url}")]
    MissingAttrStructure { url: String },

    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    #[error("Missing required component: {component}")]
    MissingComponent { component: &'static str },
}

/// Fully Qualified Name for an attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeFqn {
    namespace: String,
    name: String,
    value: Option<String>,
}

impl AttributeFqn {
    /// Parse an FQN string with the default (strict) rules
    pub fn parse(s: &str) -> Result<Self, FqnError> {
        Self::parse_with_rules(s, &FqnValidationRules::default())
    }

    /// Parse an FQN with custom validation rules
    pub fn parse_with_rules(s: &str, rules: &FqnValidationRules) -> Result<Self, FqnError> {
        if rules.require_https && s.starts_with("http://") {
            return Err(FqnError::NotHttps { url: s.to_string() });
        }

        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| FqnError::MalformedUrl("Missing scheme separator ://".to_string()))?;

        if scheme != "https" && scheme != "http" {
            return Err(FqnError::InvalidScheme {
                expected: "https",
                found: scheme.to_string(),
            });
        }

        let (namespace, path) = rest.split_once('/').unwrap_or((rest, ""));
        if namespace.is_empty() {
            return Err(FqnError::MissingComponent {
                component: "namespace",
            });
        }
        let namespace = namespace.to_lowercase();

        let Some(path) = path.strip_prefix("attr/") else {
            return Err(FqnError::MissingAttrStructure { url: s.to_string() });
        };

        let (name, value) = match path.split_once("/value/") {
            Some((name, value)) => (name, Some(value)),
            None => (path, None),
        };
        if name.is_empty() {
            return Err(FqnError::MissingComponent { component: "name" });
        }
        if value.is_some_and(str::is_empty) {
            return Err(FqnError::MissingComponent { component: "value" });
        }
        if rules.require_value && value.is_none() {
            return Err(FqnError::MissingComponent { component: "value" });
        }

        Ok(Self {
            namespace,
            name: percent_decode(name),
            value: value.map(percent_decode),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Convert to a full HTTPS URL string
    pub fn to_url(&self) -> String {
        match &self.value {
            Some(value) => format!(
                "https://{}/attr/{}/value/{}",
                self.namespace,
                percent_encode(&self.name),
                percent_encode(value)
            ),
            None => format!(
                "https://{}/attr/{}",
                self.namespace,
                percent_encode(&self.name)
            ),
        }
    }
}

impl std::fmt::Display for AttributeFqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl std::str::FromStr for AttributeFqn {
    type Err = FqnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// FQN validation rules
#[derive(Debug, Clone)]
pub struct FqnValidationRules {
    /// Reject `http://` namespaces
    pub require_https: bool,
    /// Require the `/value/<value>` component
    pub require_value: bool,
}

impl Default for FqnValidationRules {
    fn default() -> Self {
        Self {
            require_https: true,
            require_value: false,
        }
    }
}

/// Check every label, preserving order
///
/// Labels are kept verbatim in the policy; parsing only gates them.
pub fn validate_labels(labels: &[String], rules: &FqnValidationRules) -> Result<(), ConfigError> {
    for label in labels {
        AttributeFqn::parse_with_rules(label, rules).map_err(|source| {
            ConfigError::InvalidAttribute {
                label: label.clone(),
                source,
            }
        })?;
    }
    Ok(())
}

fn percent_encode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
