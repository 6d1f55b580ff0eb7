//! Dyadic bit intervals.
//!
//! A tile is a dyadic interval of 58-bit coordinates packed into a `u64`:
//!
//! ```text
//!  63      58 57                                  0
//! ┌──────────┬─────────────────────────────────────┐
//! │   rank   │                base                 │
//! └──────────┴─────────────────────────────────────┘
//! ```
//!
//! A tile of rank `r` covers the `2^r` coordinates sharing the base's bits
//! above `r`. Two tiles are either nested or disjoint.

/// Bits holding the rank.
pub const RANK_SHIFT: u32 = 58;

/// Bits holding the base.
pub const BASE_MASK: u64 = (1 << RANK_SHIFT) - 1;

/// Largest rank; a tile of this rank covers every coordinate.
pub const MAX_RANK: u32 = RANK_SHIFT;

/// Largest coordinate a tile can hold.
pub const MAX_COORDINATE: u64 = BASE_MASK;

const fn low_bits(rank: u32) -> u64 {
    if rank >= 64 {
        u64::MAX
    } else {
        (1 << rank) - 1
    }
}

/// A packed dyadic interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BitInterval(u64);

impl BitInterval {
    /// Creates the tile of `rank` containing `base`.
    pub const fn new(rank: u32, base: u64) -> Self {
        let rank = if rank > MAX_RANK { MAX_RANK } else { rank };
        let base = base & BASE_MASK & !low_bits(rank);
        Self(((rank as u64) << RANK_SHIFT) | base)
    }

    /// Creates the rank-0 tile of a single coordinate.
    pub const fn point(coordinate: u64) -> Self {
        Self::new(0, coordinate)
    }

    /// Wraps packed bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the packed bits.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Number of free low bits.
    pub const fn rank(self) -> u32 {
        (self.0 >> RANK_SHIFT) as u32
    }

    /// Lowest coordinate covered.
    pub const fn base(self) -> u64 {
        self.0 & BASE_MASK & !low_bits(self.rank())
    }

    /// Mask of the significant base bits.
    pub const fn mask(self) -> u64 {
        BASE_MASK & !low_bits(self.rank())
    }

    /// First coordinate of the upper half; the base itself for points.
    pub const fn split(self) -> u64 {
        match self.rank() {
            0 => self.base(),
            rank => self.base() | (1 << (rank - 1)),
        }
    }

    /// Returns true if `other` lies within this tile.
    pub const fn contains(self, other: BitInterval) -> bool {
        self.rank() >= other.rank() && other.base() & self.mask() == self.base()
    }

    /// Returns true if the tiles overlap.
    pub const fn intersects(self, other: BitInterval) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Smallest tile containing both tiles.
    #[must_use]
    pub fn union(self, other: BitInterval) -> BitInterval {
        let mut rank = self.rank().max(other.rank());
        while rank < MAX_RANK && (self.base() >> rank) != (other.base() >> rank) {
            rank += 1;
        }
        Self::new(rank, self.base())
    }

    /// Bounding tiles of a set of `(x, y)` tiles; `(0, 0)` when empty.
    pub fn bounds(tiles: impl IntoIterator<Item = (u64, u64)>) -> (u64, u64) {
        tiles
            .into_iter()
            .map(|(x, y)| (Self(x), Self(y)))
            .reduce(|(ax, ay), (bx, by)| (ax.union(bx), ay.union(by)))
            .map_or((0, 0), |(x, y)| (x.bits(), y.bits()))
    }
}

impl From<BitInterval> for u64 {
    fn from(tile: BitInterval) -> Self {
        tile.bits()
    }
}
