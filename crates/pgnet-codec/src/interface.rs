//! Bit-width interface: how a 32-bit normalized code is split into levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::packing::MAX_BIT_WIDTH;

/// Ordered bit widths, one per level, summing to at most 32.
///
/// Level 0 carries the most significant bits. For `[4, 4, 8, 16]` the
/// levels hold bits `31..28`, `27..24`, `23..16` and `15..0` of each code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct BitWidthInterface {
    widths: Vec<u32>,
}

impl BitWidthInterface {
    /// Validate and build an interface.
    pub fn new(widths: Vec<u32>) -> Result<Self, CodecError> {
        if widths.is_empty() {
            return Err(CodecError::InvalidInterface("no levels".into()));
        }
        if let Some(&w) = widths.iter().find(|&&w| w == 0 || w > MAX_BIT_WIDTH) {
            return Err(CodecError::InvalidBitWidth(w));
        }
        let total: u32 = widths.iter().sum();
        if total > MAX_BIT_WIDTH {
            return Err(CodecError::InvalidInterface(format!(
                "widths {widths:?} sum to {total}, more than {MAX_BIT_WIDTH}"
            )));
        }
        Ok(Self { widths })
    }

    /// Eight 2-bit levels, the converter's default.
    pub fn default_progressive() -> Self {
        Self { widths: vec![2; 8] }
    }

    pub fn levels(&self) -> &[u32] {
        &self.widths
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.widths.len()
    }

    /// Always false; an interface has at least one level.
    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    /// Bit width of level `j`.
    pub fn width(&self, level: usize) -> u32 {
        self.widths[level]
    }

    /// Bits carried by the levels before `level`.
    pub fn offset(&self, level: usize) -> u32 {
        self.widths[..level].iter().sum()
    }

    /// Bits carried by levels `0..=level`.
    pub fn bits_through(&self, level: usize) -> u32 {
        self.widths[..=level].iter().sum()
    }

    pub fn total_bits(&self) -> u32 {
        self.widths.iter().sum()
    }
}

impl TryFrom<Vec<u32>> for BitWidthInterface {
    type Error = CodecError;

    fn try_from(widths: Vec<u32>) -> Result<Self, Self::Error> {
        Self::new(widths)
    }
}

impl From<BitWidthInterface> for Vec<u32> {
    fn from(interface: BitWidthInterface) -> Self {
        interface.widths
    }
}

/// Parses the CLI form `4,4,8,16`.
impl FromStr for BitWidthInterface {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let widths = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<u32>()
                    .map_err(|_| CodecError::InvalidInterface(format!("'{part}' is not a bit width")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(widths)
    }
}

impl fmt::Display for BitWidthInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, w) in self.widths.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{w}")?;
        }
        Ok(())
    }
}
