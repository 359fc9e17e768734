use std::cmp::Ordering;

/// Total order over serialized keys. The tree never compares keys itself;
/// every search goes through the comparator the index was built with.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Compares two index keys in their on-page encoding.
    fn compare_keys(&self, a: u32, b: u32) -> Ordering {
        self.compare(&a.to_le_bytes(), &b.to_le_bytes())
    }
}

/// Orders keys as little-endian unsigned integers. Slices too short to
/// decode sort before anything decodable.
pub struct IntegerComparator;

impl IntegerComparator {
    fn decode(key: &[u8]) -> Option<u32> {
        let bytes: [u8; 4] = key.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (Self::decode(a), Self::decode(b)) {
            (Some(a_val), Some(b_val)) => a_val.cmp(&b_val),
            (a_val, b_val) => a_val.is_some().cmp(&b_val.is_some()),
        }
    }
}

/// Orders keys byte by byte.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Adapter that flips another comparator's ordering, for indexes scanned
/// newest-first.
pub struct ReverseComparator<C: KeyComparator>(pub C);

impl<C: KeyComparator> KeyComparator for ReverseComparator<C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.0.compare(b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_comparator() {
        let cmp = IntegerComparator;
        assert_eq!(cmp.compare_keys(1, 2), Ordering::Less);
        assert_eq!(cmp.compare_keys(2, 2), Ordering::Equal);
        assert_eq!(cmp.compare_keys(300, 2), Ordering::Greater);
        // A truncated key sorts before a decodable one
        assert_eq!(cmp.compare(&[1, 0], &0u32.to_le_bytes()), Ordering::Less);
    }

    #[test]
    fn test_bytewise_comparator() {
        let cmp = BytewiseComparator;
        assert_eq!(cmp.compare(b"abc", b"abd"), Ordering::Less);
        assert_eq!(cmp.compare(b"abc", b"abc"), Ordering::Equal);
    }

    #[test]
    fn test_reverse_comparator() {
        let cmp = ReverseComparator(IntegerComparator);
        assert_eq!(cmp.compare_keys(1, 2), Ordering::Greater);
        assert_eq!(cmp.compare_keys(2, 2), Ordering::Equal);
        assert_eq!(cmp.compare_keys(300, 2), Ordering::Less);
    }
}
