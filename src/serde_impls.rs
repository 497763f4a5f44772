use serde::de::{Error as _, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt::{self, Formatter};
use std::marker::PhantomData;

use crate::hash::BucketHash;
use crate::word::{Key, Word};
use crate::FerryMap;

struct MapVisitor<K, V, H, const B: usize> {
    _marker: PhantomData<(K, V, H)>,
}

impl<K, V, H, const B: usize> Serialize for FerryMap<K, V, H, B>
where
    K: Key + Serialize,
    V: Word + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.iter())
    }
}

impl<'de, K, V, H, const B: usize> Deserialize<'de> for FerryMap<K, V, H, B>
where
    K: Key + Deserialize<'de>,
    V: Word + Deserialize<'de>,
    H: BucketHash<K>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(MapVisitor {
            _marker: PhantomData,
        })
    }
}

impl<'de, K, V, H, const B: usize> Visitor<'de> for MapVisitor<K, V, H, B>
where
    K: Key + Deserialize<'de>,
    V: Word + Deserialize<'de>,
    H: BucketHash<K>,
{
    type Value = FerryMap<K, V, H, B>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let mut map = match access.size_hint() {
            Some(size) => FerryMap::with_size_power(size_power_for(size)),
            None => FerryMap::new(),
        };

        while let Some((key, value)) = access.next_entry()? {
            map.insert(key, value).map_err(M::Error::custom)?;
        }

        Ok(map)
    }
}

// Smallest size power giving a load factor of at most one half for `len`
// entries, floored at the default power.
fn size_power_for(len: usize) -> u8 {
    let buckets = (len.max(8) * 2).next_power_of_two();
    buckets.trailing_zeros() as u8
}

#[cfg(test)]
mod tests {
    use crate::FerryMap;

    #[test]
    fn map_round_trip() {
        let mut map: FerryMap<u32, u32> = FerryMap::new();
        for key in 0..5 {
            map.insert(key, 4 - key).unwrap();
        }

        let serialized = serde_json::to_string(&map).unwrap();
        let deserialized: FerryMap<u32, u32> = serde_json::from_str(&serialized).unwrap();

        assert_eq!(map, deserialized);
    }

    #[test]
    fn preallocates_from_size_hint() {
        assert_eq!(super::size_power_for(0), 4);
        assert_eq!(super::size_power_for(100), 8);
    }
}
