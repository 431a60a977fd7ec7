//! Binary dilation with a square structuring element.

use common::BitBuffer2;

/// Dilates `mask` with a `(2 * radius + 1)` square, separably: a horizontal
/// pass followed by a vertical pass.
pub fn dilate_mask(mask: &BitBuffer2, radius: usize) -> BitBuffer2 {
    if radius == 0 || mask.is_empty() {
        return mask.clone();
    }

    let width = mask.width();
    let height = mask.height();

    let mut horizontal = BitBuffer2::new_default(width, height);
    let mut line = vec![false; width];
    let mut out = vec![false; width];
    for y in 0..height {
        for (x, v) in line.iter_mut().enumerate() {
            *v = mask.get(y * width + x);
        }
        dilate_line(&line, radius, &mut out);
        for (x, &v) in out.iter().enumerate() {
            if v {
                horizontal.set(y * width + x, true);
            }
        }
    }

    let mut result = BitBuffer2::new_default(width, height);
    let mut line = vec![false; height];
    let mut out = vec![false; height];
    for x in 0..width {
        for (y, v) in line.iter_mut().enumerate() {
            *v = horizontal.get(y * width + x);
        }
        dilate_line(&line, radius, &mut out);
        for (y, &v) in out.iter().enumerate() {
            if v {
                result.set(y * width + x, true);
            }
        }
    }

    result
}

/// 1D dilation: `out[i]` is set when any input within `radius` of `i` is set.
fn dilate_line(input: &[bool], radius: usize, out: &mut [bool]) {
    let n = input.len();
    // Distance to the nearest set element on the left, then on the right.
    let mut last: Option<usize> = None;
    for i in 0..n {
        if input[i] {
            last = Some(i);
        }
        out[i] = last.is_some_and(|l| i - l <= radius);
    }
    let mut next: Option<usize> = None;
    for i in (0..n).rev() {
        if input[i] {
            next = Some(i);
        }
        if next.is_some_and(|r| r - i <= radius) {
            out[i] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pixel_grows_to_square() {
        let mut mask = BitBuffer2::new_default(9, 9);
        mask.set_xy(4, 4, true);

        let dilated = dilate_mask(&mask, 2);
        assert_eq!(dilated.count_ones(), 25);
        assert!(dilated.get_xy(2, 2));
        assert!(dilated.get_xy(6, 6));
        assert!(!dilated.get_xy(1, 4));
        assert!(!dilated.get_xy(4, 7));
    }

    #[test]
    fn test_clipped_at_border() {
        let mut mask = BitBuffer2::new_default(5, 5);
        mask.set_xy(0, 0, true);
        let dilated = dilate_mask(&mask, 1);
        assert_eq!(dilated.count_ones(), 4);
    }

    #[test]
    fn test_zero_radius_is_identity() {
        let mask = BitBuffer2::from_fn(6, 3, |idx| idx % 4 == 0);
        assert_eq!(dilate_mask(&mask, 0), mask);
    }
}
