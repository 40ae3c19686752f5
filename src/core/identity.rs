//! Capability descriptors for both sides of a match.
//!
//! An [`Identity`] describes any participant in the matching protocol — a
//! worker resource offered to the pool or a pretender asking for one. Both
//! carry attributes (what they are) and interests (what they demand of their
//! counterpart); the affinity evaluator scores the two against each other.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::PoolError;

/// A single matching constraint: a pattern tested against one attribute of
/// the counterpart, plus a flag separating hard requirements from soft
/// preferences.
///
/// Patterns match the whole attribute value, not a substring: an interest in
/// `win` does not match a `darwin` worker.
#[derive(Debug, Clone)]
pub struct Interest {
    /// Compiled form, anchored to the full value.
    regex: Regex,
    /// Pattern as written; carries the value semantics.
    source: String,
    mandatory: bool,
}

impl Interest {
    /// Compile an interest from a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidPattern`] if the pattern does not compile.
    pub fn new(pattern: &str, mandatory: bool) -> Result<Self, PoolError> {
        let regex =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|source| PoolError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self {
            regex,
            source: pattern.to_string(),
            mandatory,
        })
    }

    /// Whether `value` satisfies this interest's pattern.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// The pattern source text.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.source
    }

    /// Whether a miss on this interest vetoes the match outright.
    #[must_use]
    pub const fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

// Value semantics: two interests are equal iff pattern text and flag match.
impl PartialEq for Interest {
    fn eq(&self, other: &Self) -> bool {
        self.mandatory == other.mandatory && self.source == other.source
    }
}

impl Eq for Interest {}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.mandatory { "mandatory" } else { "preferred" };
        write!(f, "~{} ({kind})", self.source)
    }
}

impl Serialize for Interest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Interest", 2)?;
        s.serialize_field("pattern", &self.source)?;
        s.serialize_field("mandatory", &self.mandatory)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Interest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct InterestVisitor;

        impl<'de> Visitor<'de> for InterestVisitor {
            type Value = Interest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a struct with `pattern` and `mandatory` fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Interest, A::Error> {
                let mut pattern: Option<String> = None;
                let mut mandatory: Option<bool> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "pattern" => pattern = Some(map.next_value()?),
                        "mandatory" => mandatory = Some(map.next_value()?),
                        other => return Err(de::Error::unknown_field(other, &["pattern", "mandatory"])),
                    }
                }
                let pattern = pattern.ok_or_else(|| de::Error::missing_field("pattern"))?;
                let mandatory = mandatory.ok_or_else(|| de::Error::missing_field("mandatory"))?;
                Interest::new(&pattern, mandatory).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_struct("Interest", &["pattern", "mandatory"], InterestVisitor)
    }
}

/// A capability descriptor: stable id, advertised attributes, and the
/// interests this side imposes on its counterpart.
///
/// Immutable from the pool's perspective; the pool stores identities behind
/// `Arc` and never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    id: String,
    attributes: HashMap<String, String>,
    interests: HashMap<String, Interest>,
}

impl Identity {
    /// New identity with a generated UUID id and no attributes or interests.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// New identity with an explicit id.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
            interests: HashMap::new(),
        }
    }

    /// Add an advertised attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add an interest keyed by the counterpart attribute it constrains.
    #[must_use]
    pub fn interest(mut self, key: impl Into<String>, interest: Interest) -> Self {
        self.interests.insert(key.into(), interest);
        self
    }

    /// Stable identifier, unique within the pool for workers.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Advertised properties.
    #[must_use]
    pub const fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Constraints imposed on the counterpart, keyed by attribute name.
    #[must_use]
    pub const fn interests(&self) -> &HashMap<String, Interest> {
        &self.interests
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.id, self.attributes)
    }
}
