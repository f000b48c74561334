//=============================================
// solvra_substrate/src/numeric/fft.rs
//=============================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: In-place radix-2 FFT
// Objective: Iterative decimation-in-time transform over split real and
//            imaginary buffers; forward unscaled, inverse scaled by 1/N
// Formatting: Zobie.format (.solvraformat)
//=============================================

use std::f64::consts::PI;

use crate::{SubstrateError, SubstrateResult};

/// Transforms `re`/`im` in place.
///
/// The forward transform applies no scaling; the inverse divides by the length so that a forward
/// transform followed by an inverse one reproduces the input.
pub(crate) fn transform(re: &mut [f64], im: &mut [f64], inverse: bool) -> SubstrateResult<()> {
    let n = re.len();
    if im.len() != n {
        return Err(SubstrateError::LengthMismatch {
            left: n,
            right: im.len(),
        });
    }
    if n == 0 || !n.is_power_of_two() {
        return Err(SubstrateError::range(format!(
            "FFT length must be a non-zero power of two, got {n}"
        )));
    }

    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = if bits == 0 {
            0
        } else {
            i.reverse_bits() >> (usize::BITS - bits)
        };
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let step = sign * 2.0 * PI / size as f64;
        for start in (0..n).step_by(size) {
            for k in 0..half {
                let (sin, cos) = (step * k as f64).sin_cos();
                let a = start + k;
                let b = a + half;
                let tr = re[b] * cos - im[b] * sin;
                let ti = re[b] * sin + im[b] * cos;
                re[b] = re[a] - tr;
                im[b] = im[a] - ti;
                re[a] += tr;
                im[a] += ti;
            }
        }
        size *= 2;
    }

    if inverse {
        let scale = 1.0 / n as f64;
        for value in re.iter_mut().chain(im.iter_mut()) {
            *value *= scale;
        }
    }
    Ok(())
}
