//! Which label planes a segmentation target covers.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::types::LabelError;

/// The object classes a label stack carries.
///
/// A stack holds the nucleus plane first and the cell plane second when
/// both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetSegmentation {
    /// Nuclei only (`"N"`).
    #[default]
    Nuclei,
    /// Cells only (`"C"`).
    Cells,
    /// Nuclei and cells (`"NC"`).
    NucleiAndCells,
}

impl TargetSegmentation {
    /// Number of label planes this target produces.
    #[must_use]
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Nuclei | Self::Cells => 1,
            Self::NucleiAndCells => 2,
        }
    }

    /// Pick the planes for this target out of a two-plane
    /// `[nuclei, cells]` stack.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Shape`] if the stack does not have exactly two
    /// planes.
    pub fn select(self, stack: ArrayView3<'_, u32>) -> Result<Array3<u32>, LabelError> {
        if stack.len_of(Axis(0)) != 2 {
            return Err(LabelError::shape(
                stack.shape(),
                "expected a [nuclei, cells] label stack",
            ));
        }
        let planes: &[usize] = match self {
            Self::Nuclei => &[0],
            Self::Cells => &[1],
            Self::NucleiAndCells => &[0, 1],
        };
        Ok(stack.select(Axis(0), planes))
    }
}

impl fmt::Display for TargetSegmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nuclei => f.write_str("N"),
            Self::Cells => f.write_str("C"),
            Self::NucleiAndCells => f.write_str("NC"),
        }
    }
}

impl FromStr for TargetSegmentation {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N" => Ok(Self::Nuclei),
            "C" => Ok(Self::Cells),
            "NC" | "CN" => Ok(Self::NucleiAndCells),
            other => Err(LabelError::UnsupportedMode(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_targets() {
        assert_eq!("N".parse::<TargetSegmentation>().unwrap(), TargetSegmentation::Nuclei);
        assert_eq!("C".parse::<TargetSegmentation>().unwrap(), TargetSegmentation::Cells);
        assert_eq!(
            "CN".parse::<TargetSegmentation>().unwrap(),
            TargetSegmentation::NucleiAndCells
        );
        assert_eq!(TargetSegmentation::NucleiAndCells.to_string(), "NC");
    }

    #[test]
    fn unknown_target_is_unsupported() {
        let err = "NCX".parse::<TargetSegmentation>().unwrap_err();
        assert!(matches!(err, LabelError::UnsupportedMode(ref m) if m == "NCX"));
    }

    #[test]
    fn select_picks_planes() {
        let stack = Array3::from_shape_fn((2, 2, 2), |(p, _, _)| u32::try_from(p + 1).unwrap());
        let cells = TargetSegmentation::Cells.select(stack.view()).unwrap();
        assert_eq!(cells.dim(), (1, 2, 2));
        assert!(cells.iter().all(|&v| v == 2));
        let both = TargetSegmentation::NucleiAndCells.select(stack.view()).unwrap();
        assert_eq!(both.dim().0, TargetSegmentation::NucleiAndCells.plane_count());
    }

    #[test]
    fn select_rejects_single_plane_stack() {
        let stack = Array3::<u32>::zeros((1, 2, 2));
        assert!(TargetSegmentation::Nuclei.select(stack.view()).is_err());
    }
}
