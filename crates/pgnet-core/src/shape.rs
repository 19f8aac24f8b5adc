use smallvec::SmallVec;
use std::fmt;

/// Dimensions of a dense tensor, outermost first.
///
/// Streamed weights are at most rank 4 (conv filters), so the dims live
/// inline.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().copied().collect(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Element count, or `None` when the product does not fit in `usize`.
    /// An empty shape holds one element.
    pub fn checked_numel(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Element count; saturates at `usize::MAX` for shapes no buffer can hold.
    pub fn numel(&self) -> usize {
        self.checked_numel().unwrap_or(usize::MAX)
    }

    /// Innermost extent, 1 for a rank-0 shape.
    pub fn last_dim(&self) -> usize {
        self.dims.last().map_or(1, |&d| d)
    }

    /// Resolve a reshape target against this shape's element count.
    ///
    /// `-1` marks the one extent to infer; every other entry must be
    /// positive. Returns `None` when the target cannot hold exactly the
    /// same elements.
    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        let total = self.checked_numel()?;
        let mut hole = None;
        let mut dims: SmallVec<[usize; 4]> = SmallVec::with_capacity(target.len());
        for (axis, &d) in target.iter().enumerate() {
            match d {
                -1 if hole.is_none() => {
                    hole = Some(axis);
                    dims.push(1);
                }
                d if d > 0 => dims.push(d as usize),
                _ => return None,
            }
        }

        let known = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))?;
        if let Some(axis) = hole {
            if total % known != 0 {
                return None;
            }
            dims[axis] = total / known;
        } else if known != total {
            return None;
        }
        Some(Shape { dims })
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shape").field(&self.dims.as_slice()).finish()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
