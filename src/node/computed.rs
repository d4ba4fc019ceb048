use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::Sum;

/// A node only known by its hash and sum.
///
/// Stored branches come back from the store in this shape, proofs shipped
/// between peers carry their siblings in this shape, and universe roots are
/// reported in this shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputedNode<const HASH_SIZE: usize> {
    #[serde(with = "hex_hash")]
    node_hash: [u8; HASH_SIZE],
    sum: Sum,
}

impl<const HASH_SIZE: usize> ComputedNode<HASH_SIZE> {
    pub fn new(node_hash: [u8; HASH_SIZE], sum: Sum) -> Self {
        Self { node_hash, sum }
    }

    pub fn hash(&self) -> [u8; HASH_SIZE] {
        self.node_hash
    }

    pub fn sum(&self) -> Sum {
        self.sum
    }
}

impl<const HASH_SIZE: usize> Display for ComputedNode<HASH_SIZE> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Computed {{ sum: {}, hash: {} }}",
            self.sum(),
            hex::encode(self.hash().as_slice())
        )
    }
}

mod hex_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        hash: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; N];
        hex::decode_to_slice(&s, &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::ComputedNode;

    #[test]
    fn test_computed_node_display() {
        let computed_node = ComputedNode::new([0; 32], 1);
        assert_eq!(
            format!("{}", computed_node),
            "Computed { sum: 1, hash: 0000000000000000000000000000000000000000000000000000000000000000 }"
        );
    }

    #[test]
    fn test_computed_node_json_uses_hex() {
        let computed_node = ComputedNode::new([0xab; 32], 7);
        let json = serde_json::to_string(&computed_node).unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        let back: ComputedNode<32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, computed_node);
    }
}
