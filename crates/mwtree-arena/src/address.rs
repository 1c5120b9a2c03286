//! Geometric addresses of tree nodes.
//!
//! A node sits at a dyadic scale `n` and integer translation `l` per axis,
//! covering `[l * 2^-n, (l + 1) * 2^-n)` in every dimension. The ordering
//! path gives siblings and subtrees a deterministic traversal order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scale and translation of one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIndex<const D: usize> {
    scale: i32,
    #[serde(with = "translation_serde")]
    translation: [i32; D],
}

impl<const D: usize> NodeIndex<D> {
    /// Cell at `scale` with the given translation.
    #[must_use]
    pub const fn new(scale: i32, translation: [i32; D]) -> Self {
        Self { scale, translation }
    }

    /// Dyadic scale.
    #[must_use]
    pub const fn scale(&self) -> i32 {
        self.scale
    }

    /// Translation per axis.
    #[must_use]
    pub const fn translation(&self) -> &[i32; D] {
        &self.translation
    }

    /// Index of child `position`; bit `d` of `position` selects the upper
    /// half along axis `d`.
    #[must_use]
    pub fn child(&self, position: usize) -> Self {
        let mut translation = self.translation;
        for (axis, l) in translation.iter_mut().enumerate() {
            *l = 2 * *l + i32::from((position >> axis) & 1 == 1);
        }
        Self {
            scale: self.scale + 1,
            translation,
        }
    }

    /// Like [`NodeIndex::child`], but `None` if the scale or a translation
    /// leaves the `i32` range.
    #[must_use]
    pub fn checked_child(&self, position: usize) -> Option<Self> {
        let mut translation = self.translation;
        for (axis, l) in translation.iter_mut().enumerate() {
            *l = l
                .checked_mul(2)?
                .checked_add(i32::from((position >> axis) & 1 == 1))?;
        }
        Some(Self {
            scale: self.scale.checked_add(1)?,
            translation,
        })
    }

    /// Index of the enclosing cell one scale up.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut translation = self.translation;
        for l in &mut translation {
            *l = l.div_euclid(2);
        }
        Self {
            scale: self.scale - 1,
            translation,
        }
    }

    /// Position of this cell among its siblings.
    #[must_use]
    pub fn child_position(&self) -> usize {
        self.translation
            .iter()
            .enumerate()
            .map(|(axis, l)| usize::from(l.rem_euclid(2) == 1) << axis)
            .sum()
    }
}

impl<const D: usize> fmt::Display for NodeIndex<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}", self.scale, self.translation)
    }
}

/// Z-order traversal key.
///
/// Each level appends the child position, so a parent's key is a prefix of
/// its descendants' keys. Deeper than `128 / D` levels the oldest levels
/// shift out; sibling order stays exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingPath {
    key: u128,
    depth: u32,
}

impl OrderingPath {
    /// Path of a root.
    #[must_use]
    pub const fn root() -> Self {
        Self { key: 0, depth: 0 }
    }

    /// Path of child `position` of the node with this path.
    #[must_use]
    pub fn child(&self, position: usize, dimension: usize) -> Self {
        let shifted = self.key.checked_shl(u32::try_from(dimension).unwrap_or(u32::MAX));
        Self {
            key: shifted.unwrap_or(0) | position as u128,
            depth: self.depth.wrapping_add(1),
        }
    }

    /// Like [`OrderingPath::child`], but `None` if the depth counter
    /// overflows.
    #[must_use]
    pub fn checked_child(&self, position: usize, dimension: usize) -> Option<Self> {
        let depth = self.depth.checked_add(1)?;
        Some(Self {
            depth,
            ..self.child(position, dimension)
        })
    }

    /// Levels below the root.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Position among siblings, recovered from the key.
    #[must_use]
    pub fn position(&self, dimension: usize) -> usize {
        let mask = (1u128 << dimension) - 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            (self.key & mask) as usize
        }
    }
}

/// `[i32; D]` through serde as a plain sequence.
mod translation_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const D: usize>(
        translation: &[i32; D],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(translation.iter())
    }

    pub fn deserialize<'de, De: Deserializer<'de>, const D: usize>(
        deserializer: De,
    ) -> Result<[i32; D], De::Error> {
        let values = Vec::<i32>::deserialize(deserializer)?;
        let len = values.len();
        values
            .try_into()
            .map_err(|_| De::Error::invalid_length(len, &"one translation per dimension"))
    }
}
