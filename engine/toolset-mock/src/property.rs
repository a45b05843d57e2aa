use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadErrorCode};

/// One `key=value` build property, e.g. `variant=debug`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Property {
    key: String,
    value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let text = text.trim();
        let Some((key, value)) = text.split_once('=') else {
            return Err(LoadError::new(
                LoadErrorCode::InvalidProperty,
                format!("property '{text}' is not of the form key=value"),
                None,
            ));
        };
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(LoadError::new(
                LoadErrorCode::InvalidProperty,
                format!("property '{text}' has an invalid key"),
                None,
            ));
        }
        Ok(Self::new(key, value))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for Property {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Property::parse(s)
    }
}

impl TryFrom<String> for Property {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Property::parse(&value)
    }
}

impl From<Property> for String {
    fn from(value: Property) -> Self {
        value.to_string()
    }
}

/// The build configuration of one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet {
    properties: BTreeSet<Property>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(items: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        items
            .into_iter()
            .map(|item| Property::parse(item.as_ref()))
            .collect()
    }
}

impl FromIterator<Property> for PropertySet {
    fn from_iter<T: IntoIterator<Item = Property>>(iter: T) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_braced(f, self.properties.iter())
    }
}

/// Properties a configuration must contain for gated declarations to register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Gate {
    required: BTreeSet<Property>,
}

impl Gate {
    /// The empty gate: active under every configuration.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(items: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let required = items
            .into_iter()
            .map(|item| Property::parse(item.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { required })
    }

    pub fn is_unconditional(&self) -> bool {
        self.required.is_empty()
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.required.iter()
    }

    /// Subset test: extra properties in `current` never deactivate a gate.
    pub fn is_active(&self, current: &PropertySet) -> bool {
        self.required.is_subset(&current.properties)
    }

    /// Required properties absent from `current`.
    pub fn missing<'a>(&'a self, current: &'a PropertySet) -> impl Iterator<Item = &'a Property> {
        self.required.difference(&current.properties)
    }

    /// Conjunction of two gates; nested gated blocks require both.
    pub fn and(&self, other: &Gate) -> Gate {
        Gate {
            required: self.required.union(&other.required).cloned().collect(),
        }
    }
}

impl FromIterator<Property> for Gate {
    fn from_iter<T: IntoIterator<Item = Property>>(iter: T) -> Self {
        Self {
            required: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.required.is_empty() {
            return f.write_str("always");
        }
        write_braced(f, self.required.iter())
    }
}

fn write_braced<'a>(
    f: &mut fmt::Formatter<'_>,
    properties: impl Iterator<Item = &'a Property>,
) -> fmt::Result {
    f.write_str("{")?;
    for (idx, property) in properties.enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{property}")?;
    }
    f.write_str("}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(items: &[&str]) -> PropertySet {
        PropertySet::parse(items).expect("properties")
    }

    #[test]
    fn gate_is_a_subset_test() {
        let gate = Gate::parse(["variant=debug", "link=shared"]).expect("gate");
        assert!(!gate.is_active(&props(&["variant=release", "link=shared"])));
        assert!(gate.is_active(&props(&[
            "variant=debug",
            "link=shared",
            "architecture=x86"
        ])));
        assert!(!gate.is_active(&props(&["variant=debug"])));
    }

    #[test]
    fn empty_gate_is_always_active() {
        assert!(Gate::always().is_active(&PropertySet::new()));
        assert_eq!(Gate::always().to_string(), "always");
    }

    #[test]
    fn missing_lists_unsatisfied_properties() {
        let gate = Gate::parse(["variant=debug", "link=static"]).expect("gate");
        let current = props(&["variant=debug", "link=shared"]);
        let missing: Vec<String> = gate.missing(&current).map(ToString::to_string).collect();
        assert_eq!(missing, vec!["link=static".to_string()]);
    }

    #[test]
    fn malformed_properties_are_rejected() {
        for bad in ["variant", "=debug", "bad key=x"] {
            let err = Property::parse(bad).expect_err("should reject");
            assert_eq!(err.code, LoadErrorCode::InvalidProperty, "{bad}");
        }
        let define = Property::parse("define=A=1").expect("ok");
        assert_eq!((define.key(), define.value()), ("define", "A=1"));
    }

    #[test]
    fn property_set_serializes_as_strings() {
        let set = props(&["link=shared", "variant=debug"]);
        let json = serde_json::to_string(&set).expect("serialize");
        assert_eq!(json, r#"["link=shared","variant=debug"]"#);
        let back: PropertySet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, set);
    }
}
