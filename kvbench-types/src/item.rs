//! Items stored in the key-value store under test.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

/// Name of the attribute holding the primary key of every [`BenchmarkItem`].
pub const ID_ATTRIBUTE: &str = "id";

/// Name of the numeric attribute compared to confirm that an overwrite became visible.
const TRACKED_ATTRIBUTE: &str = "1";

/// Attribute compared instead of [`TRACKED_ATTRIBUTE`] when an item only carries one attribute.
const FALLBACK_TRACKED_ATTRIBUTE: &str = "0";

/// A typed attribute value.
///
/// Numbers are carried as their string representation, the same way the store transports them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A string attribute.
    #[serde(rename = "S")]
    S(String),
    /// A numeric attribute, formatted as a decimal string.
    #[serde(rename = "N")]
    N(String),
}

impl AttributeValue {
    /// Returns the string contents if this is a string attribute.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            Self::N(_) => None,
        }
    }

    /// Returns the numeric representation if this is a numeric attribute.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(n) => Some(n),
            Self::S(_) => None,
        }
    }
}

/// A record in the store: a mapping from attribute name to [`AttributeValue`].
///
/// Items created by the generator always contain an [`ID_ATTRIBUTE`]. Items returned by a
/// projected scan may contain nothing else.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BenchmarkItem(BTreeMap<String, AttributeValue>);

impl BenchmarkItem {
    /// Creates an empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an item holding only the given identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut item = Self::new();
        item.insert(ID_ATTRIBUTE, AttributeValue::S(id.into()));
        item
    }

    /// Returns the identifier of this item, if it has a string `id` attribute.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_ATTRIBUTE).and_then(AttributeValue::as_s)
    }

    /// Returns the attribute with the given name.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    /// Inserts an attribute, returning the previous value if there was one.
    pub fn insert(&mut self, name: impl Into<String>, value: AttributeValue) -> Option<AttributeValue> {
        self.0.insert(name.into(), value)
    }

    /// Returns the attribute compared when confirming an overwrite.
    ///
    /// This is the numeric attribute `"1"`, or the textual attribute `"0"` for items generated
    /// with a single attribute.
    pub fn tracked_value(&self) -> Option<&AttributeValue> {
        self.get(TRACKED_ATTRIBUTE)
            .or_else(|| self.get(FALLBACK_TRACKED_ATTRIBUTE))
    }

    /// Returns the number of attributes, including the identifier.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the item has no attributes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over all attributes in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, AttributeValue> {
        self.0.iter()
    }

    /// Consumes the item and returns the underlying attribute map.
    pub fn into_inner(self) -> BTreeMap<String, AttributeValue> {
        self.0
    }
}

impl From<BTreeMap<String, AttributeValue>> for BenchmarkItem {
    fn from(attributes: BTreeMap<String, AttributeValue>) -> Self {
        Self(attributes)
    }
}

impl FromIterator<(String, AttributeValue)> for BenchmarkItem {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a BenchmarkItem {
    type Item = (&'a String, &'a AttributeValue);
    type IntoIter = btree_map::Iter<'a, String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_string_attribute() {
        let item = BenchmarkItem::with_id("abc");
        assert_eq!(item.id(), Some("abc"));

        let mut numeric = BenchmarkItem::new();
        numeric.insert(ID_ATTRIBUTE, AttributeValue::N("12".into()));
        assert_eq!(numeric.id(), None);
    }

    #[test]
    fn tracked_value_falls_back_to_first_attribute() {
        let mut item = BenchmarkItem::with_id("abc");
        item.insert("0", AttributeValue::S("lorem ipsum".into()));
        assert_eq!(
            item.tracked_value(),
            Some(&AttributeValue::S("lorem ipsum".into()))
        );

        item.insert("1", AttributeValue::N("3.14".into()));
        assert_eq!(item.tracked_value(), Some(&AttributeValue::N("3.14".into())));
    }

    #[test]
    fn serializes_as_flat_map() {
        let mut item = BenchmarkItem::with_id("abc");
        item.insert("1", AttributeValue::N("1.50".into()));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": { "S": "abc" }, "1": { "N": "1.50" } })
        );
    }
}
