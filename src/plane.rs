use rayon::prelude::*;

/// A row-major 2-D grid of samples.
///
/// All image data in this crate lives in a `Plane`: raw mosaic samples,
/// per-angle intensity channels, and derived floating point maps. The
/// buffer length always equals `width * height`.
#[derive(Clone, Debug, PartialEq)]
pub struct Plane<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

/// An interleaved RGB plane with one `[R, G, B]` triple per pixel.
pub type RgbPlane = Plane<[u16; 3]>;

impl<T> Plane<T> {
    /// Create a plane from a row-major buffer.
    ///
    /// Returns `None` if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }

        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Returns a reference to the sample at `(x, y)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x >= self.width {
            return None;
        }
        self.data.get(y * self.width + x)
    }

    pub fn as_slice(&self) -> &[T] {
        self.data.as_slice()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        self.data.chunks_exact(self.width)
    }
}

impl<T: Clone> Plane<T> {
    /// Create a plane with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }
}

impl<T: Send + Sync> Plane<T> {
    /// Apply `f` to every sample in parallel, preserving dimensions.
    pub fn map<U, F>(&self, f: F) -> Plane<U>
    where
        U: Send,
        F: Fn(&T) -> U + Sync,
    {
        Plane {
            width: self.width,
            height: self.height,
            data: self.data.par_iter().map(|v| f(v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_checks_length() {
        assert!(Plane::from_vec(2, 2, vec![0u16; 4]).is_some());
        assert!(Plane::from_vec(2, 2, vec![0u16; 3]).is_none());
    }

    #[test]
    fn get_is_bounds_checked() {
        let plane = Plane::from_vec(2, 2, vec![1u16, 2, 3, 4]).unwrap();
        assert_eq!(plane.get(1, 1), Some(&4));
        assert_eq!(plane.get(2, 0), None);
        assert_eq!(plane.get(0, 2), None);
    }

    #[test]
    fn map_preserves_dimensions() {
        let plane = Plane::from_vec(3, 2, vec![0u16, 1, 2, 3, 4, 5]).unwrap();
        let doubled = plane.map(|v| v * 2);
        assert_eq!(doubled.dimensions(), (3, 2));
        assert_eq!(doubled.as_slice(), &[0, 2, 4, 6, 8, 10]);
    }
}
