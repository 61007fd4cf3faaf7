//! Generation of synthetic [`BenchmarkItem`]s.
//!
//! Items carry a random UUID as identifier and a configurable number of attributes named by their
//! index. Even attributes hold a short sentence of lorem ipsum, odd attributes a number in
//! `[0, 32)` formatted with two decimals. All content is drawn from the RNG passed in, so a seeded
//! RNG produces reproducible items.

use std::ops::Range;

use fake::Fake;
use fake::faker::lorem::en::Sentence;
use kvbench_types::{AttributeValue, BenchmarkItem};
use rand::Rng;
use thiserror::Error;

/// Numeric attributes are drawn as whole cents below this bound, i.e. `0.00..=31.99`.
const NUMERIC_CENTS_BOUND: u32 = 32 * 100;

/// Number of words in a generated sentence.
const SENTENCE_WORDS: Range<usize> = 6..16;

/// Errors constructing an [`ItemGenerator`].
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Items need at least one attribute besides their identifier.
    #[error("items need at least one attribute besides the id, got {0}")]
    NoAttributes(u32),
}

/// Generates [`BenchmarkItem`]s with a fixed number of attributes.
#[derive(Clone, Copy, Debug)]
pub struct ItemGenerator {
    attributes: u32,
}

impl ItemGenerator {
    /// Creates a generator for items with `attributes` attributes besides the identifier.
    pub fn new(attributes: u32) -> Result<Self, GeneratorError> {
        if attributes < 1 {
            return Err(GeneratorError::NoAttributes(attributes));
        }
        Ok(Self { attributes })
    }

    /// The number of attributes of generated items, not counting the identifier.
    pub fn attributes(&self) -> u32 {
        self.attributes
    }

    /// Generates an item with a fresh identifier.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> BenchmarkItem {
        let id = new_id(rng);
        self.generate_with_id(&id, rng)
    }

    /// Generates an item with the given identifier.
    pub fn generate_with_id<R: Rng + ?Sized>(&self, id: &str, rng: &mut R) -> BenchmarkItem {
        let mut item = BenchmarkItem::with_id(id);
        for index in 0..self.attributes {
            let value = if index % 2 == 1 {
                AttributeValue::N(number(rng))
            } else {
                AttributeValue::S(sentence(rng))
            };
            item.insert(index.to_string(), value);
        }
        item
    }

    /// Generates replacement contents for an existing item.
    ///
    /// The tracked attribute of the result is guaranteed to differ from `previous`, so that the
    /// overwrite can be observed by a reader.
    pub fn generate_update<R: Rng + ?Sized>(
        &self,
        id: &str,
        previous: Option<&AttributeValue>,
        rng: &mut R,
    ) -> BenchmarkItem {
        loop {
            let item = self.generate_with_id(id, rng);
            if item.tracked_value() != previous {
                return item;
            }
        }
    }
}

/// Generates a random version 4 UUID from the given RNG.
pub fn new_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    uuid::Builder::from_random_bytes(rng.random())
        .into_uuid()
        .to_string()
}

fn number<R: Rng + ?Sized>(rng: &mut R) -> String {
    let cents = rng.random_range(0..NUMERIC_CENTS_BOUND);
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn sentence<R: Rng + ?Sized>(rng: &mut R) -> String {
    Sentence(SENTENCE_WORDS).fake_with_rng(rng)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn assert_shape(item: &BenchmarkItem, attributes: u32) {
        assert_eq!(item.len(), attributes as usize + 1);
        assert!(item.id().is_some_and(|id| uuid::Uuid::parse_str(id).is_ok()));

        for index in 0..attributes {
            let value = item.get(&index.to_string()).unwrap();
            if index % 2 == 1 {
                let n = value.as_n().expect("odd attributes are numeric");
                let (_, decimals) = n.split_once('.').unwrap();
                assert_eq!(decimals.len(), 2, "{n}");
                let n: f64 = n.parse().unwrap();
                assert!((0.0..32.0).contains(&n), "{n}");
            } else {
                let s = value.as_s().expect("even attributes are text");
                let words = s.split_whitespace().count();
                assert!(SENTENCE_WORDS.contains(&words), "{s}");
            }
        }
    }

    #[test]
    fn rejects_zero_attributes() {
        assert!(matches!(
            ItemGenerator::new(0),
            Err(GeneratorError::NoAttributes(0))
        ));
    }

    #[test]
    fn generated_items_have_expected_shape() {
        let mut rng = SmallRng::seed_from_u64(7);
        for attributes in [1, 2, 5, 12] {
            let generator = ItemGenerator::new(attributes).unwrap();
            for _ in 0..50 {
                assert_shape(&generator.generate(&mut rng), attributes);
            }
        }
    }

    #[test]
    fn single_attribute_is_text() {
        let mut rng = SmallRng::seed_from_u64(1);
        let item = ItemGenerator::new(1).unwrap().generate(&mut rng);

        assert_eq!(item.len(), 2);
        assert!(item.get("0").and_then(AttributeValue::as_s).is_some());
        assert_eq!(item.tracked_value(), item.get("0"));
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let generator = ItemGenerator::new(5).unwrap();
        let a = generator.generate(&mut SmallRng::seed_from_u64(42));
        let b = generator.generate(&mut SmallRng::seed_from_u64(42));
        assert_eq!(a, b);

        let c = generator.generate(&mut SmallRng::seed_from_u64(43));
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn updates_keep_id_and_change_tracked_value() {
        let mut rng = SmallRng::seed_from_u64(3);
        let generator = ItemGenerator::new(5).unwrap();

        for _ in 0..100 {
            let original = generator.generate(&mut rng);
            let id = original.id().unwrap();
            let updated = generator.generate_update(id, original.tracked_value(), &mut rng);

            assert_eq!(updated.id(), Some(id));
            assert_shape(&updated, 5);
            assert_ne!(updated.tracked_value(), original.tracked_value());
        }
    }
}
