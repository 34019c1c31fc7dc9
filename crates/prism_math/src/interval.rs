/// A closed interval [min, max] on the ray parameter axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Interval {
    /// An empty interval (min > max, contains nothing).
    pub const EMPTY: Interval = Interval {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    /// An interval spanning every value.
    pub const UNIVERSE: Interval = Interval {
        min: f32::NEG_INFINITY,
        max: f32::INFINITY,
    };

    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Size of the interval (max - min).
    pub fn size(&self) -> f32 {
        self.max - self.min
    }

    /// True if x lies in [min, max] (inclusive).
    pub fn contains(&self, x: f32) -> bool {
        self.min <= x && x <= self.max
    }

    /// True if x lies strictly inside (min, max).
    pub fn surrounds(&self, x: f32) -> bool {
        self.min < x && x < self.max
    }

    /// Grow the interval by delta/2 on each side.
    pub fn expand(&self, delta: f32) -> Interval {
        let padding = delta / 2.0;
        Interval::new(self.min - padding, self.max + padding)
    }

    /// Smallest interval containing both inputs.
    pub fn surrounding(a: &Interval, b: &Interval) -> Interval {
        Interval::new(a.min.min(b.min), a.max.max(b.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_surrounds() {
        let i = Interval::new(0.0, 10.0);
        assert!(i.contains(0.0));
        assert!(i.contains(10.0));
        assert!(!i.surrounds(0.0));
        assert!(i.surrounds(5.0));
        assert!(!i.contains(-0.1));
    }

    #[test]
    fn test_empty_contains_nothing() {
        assert!(!Interval::EMPTY.contains(0.0));
        assert!(Interval::EMPTY.min > Interval::EMPTY.max);
    }

    #[test]
    fn test_surrounding() {
        let a = Interval::new(1.0, 3.0);
        let b = Interval::new(2.0, 7.0);
        let s = Interval::surrounding(&a, &b);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 7.0);
    }

    #[test]
    fn test_expand() {
        let e = Interval::new(0.0, 10.0).expand(4.0);
        assert_eq!(e.min, -2.0);
        assert_eq!(e.max, 12.0);
    }
}
