use serde::Serialize;

use crate::error::BookingError;

/// Полуинтервал `[from_order, to_order)` по порядковым номерам остановок.
///
/// Конструируется только через `Segment::new`, так что `from_order < to_order` всегда.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Segment {
    from_order: i32,
    to_order: i32,
}

impl Segment {
    pub fn new(from_order: i32, to_order: i32) -> Result<Self, BookingError> {
        if from_order < 0 || from_order >= to_order {
            return Err(BookingError::InvalidSegment {
                from_order,
                to_order,
            });
        }
        Ok(Self {
            from_order,
            to_order,
        })
    }

    /// Сегмент из уже сохранённой записи: хранилище проверяет `from < to` при вставке
    /// (CHECK в схеме), повторно не валидируем.
    pub(crate) fn stored(from_order: i32, to_order: i32) -> Self {
        Self {
            from_order,
            to_order,
        }
    }

    pub fn from_order(&self) -> i32 {
        self.from_order
    }

    pub fn to_order(&self) -> i32 {
        self.to_order
    }

    /// Касание границами (`[0,2)` и `[2,5)`) пересечением не считается.
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.from_order < other.to_order && other.from_order < self.to_order
    }

    /// Едет ли пассажир на участке, начинающемся с остановки `order`
    pub fn covers(&self, order: i32) -> bool {
        self.from_order <= order && order < self.to_order
    }

    pub fn stop_orders(&self) -> std::ops::Range<i32> {
        self.from_order..self.to_order
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.from_order, self.to_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seg(a: i32, b: i32) -> Segment {
        Segment::new(a, b).unwrap()
    }

    #[test]
    fn adjacent_segments_do_not_overlap() {
        assert!(!seg(0, 2).overlaps(&seg(2, 5)));
        assert!(!seg(2, 5).overlaps(&seg(0, 2)));
    }

    #[test]
    fn crossing_segments_overlap() {
        assert!(seg(0, 2).overlaps(&seg(1, 3)));
        assert!(seg(0, 6).overlaps(&seg(2, 3)));
    }

    #[test]
    fn empty_or_reversed_segment_is_rejected() {
        assert!(matches!(
            Segment::new(3, 3),
            Err(BookingError::InvalidSegment { from_order: 3, to_order: 3 })
        ));
        assert!(Segment::new(4, 1).is_err());
        assert!(Segment::new(-1, 1).is_err());
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in 0i32..20, la in 1i32..10, b in 0i32..20, lb in 1i32..10) {
            let x = seg(a, a + la);
            let y = seg(b, b + lb);
            prop_assert_eq!(x.overlaps(&y), y.overlaps(&x));
        }

        #[test]
        fn overlap_matches_shared_stop(a in 0i32..20, la in 1i32..10, b in 0i32..20, lb in 1i32..10) {
            let x = seg(a, a + la);
            let y = seg(b, b + lb);
            let shared = x.stop_orders().any(|o| y.covers(o));
            prop_assert_eq!(x.overlaps(&y), shared);
        }
    }
}
