/// Integer line stepping covering all octants, both endpoints included.
#[derive(Debug, Clone)]
pub struct Bresenham {
    x: i64,
    y: i64,
    dx1: i64,
    dy1: i64,
    dx2: i64,
    dy2: i64,
    longest: i64,
    shortest: i64,
    numerator: i64,
    remaining: i64,
}

impl Bresenham {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        let w = x1 - x0;
        let h = y1 - y0;
        let dx1 = w.signum();
        let dy1 = h.signum();
        let (mut dx2, mut dy2) = (w.signum(), 0);
        let (mut longest, mut shortest) = (w.abs(), h.abs());
        if longest <= shortest {
            longest = h.abs();
            shortest = w.abs();
            dy2 = h.signum();
            dx2 = 0;
        }
        Self {
            x: x0,
            y: y0,
            dx1,
            dy1,
            dx2,
            dy2,
            longest,
            shortest,
            numerator: longest >> 1,
            remaining: longest + 1,
        }
    }
}

impl Iterator for Bresenham {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = (self.x, self.y);
        self.numerator += self.shortest;
        if self.numerator >= self.longest {
            self.numerator -= self.longest;
            self.x += self.dx1;
            self.y += self.dy1;
        } else {
            self.x += self.dx2;
            self.y += self.dy2;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

impl ExactSizeIterator for Bresenham {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal() {
        let pixels: Vec<_> = Bresenham::new(0, 0, 3, 3).collect();
        assert_eq!(pixels, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_single_point() {
        assert_eq!(Bresenham::new(4, -2, 4, -2).collect::<Vec<_>>(), vec![(4, -2)]);
    }

    #[test]
    fn test_all_octants_are_connected() {
        let targets = [(5, 2), (2, 5), (-2, 5), (-5, 2), (-5, -2), (-2, -5), (2, -5), (5, -2)];
        for (tx, ty) in targets {
            let pixels: Vec<_> = Bresenham::new(0, 0, tx, ty).collect();
            assert_eq!(pixels.first(), Some(&(0, 0)));
            assert_eq!(pixels.last(), Some(&(tx, ty)));
            assert_eq!(pixels.len() as i64, tx.abs().max(ty.abs()) + 1);
            for pair in pixels.windows(2) {
                assert!((pair[0].0 - pair[1].0).abs() <= 1);
                assert!((pair[0].1 - pair[1].1).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_horizontal_and_vertical() {
        let pixels: Vec<_> = Bresenham::new(3, 1, 0, 1).collect();
        assert_eq!(pixels, vec![(3, 1), (2, 1), (1, 1), (0, 1)]);
        let pixels: Vec<_> = Bresenham::new(0, 0, 0, 2).collect();
        assert_eq!(pixels, vec![(0, 0), (0, 1), (0, 2)]);
    }
}
