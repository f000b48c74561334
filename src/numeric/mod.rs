//=============================================
// solvra_substrate/src/numeric/mod.rs
//=============================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Numeric array algorithms
// Objective: Sum, variance, convolution, FFT and interpolation over any
//            array or typed view, promoting every element to f64
// Formatting: Zobie.format (.solvraformat)
//=============================================

mod fft;
mod scalar;

pub use scalar::{clip, hsb_to_rgb, reverse_byte};

use tracing::{instrument, trace};

use crate::memory::{Payload, Value};
use crate::view::{load_numbers, store_numbers};
use crate::{SubstrateError, SubstrateResult};

fn numbers(array: &Value) -> SubstrateResult<Vec<f64>> {
    let state = array.arena().lock();
    load_numbers(&state, array.id())
}

/// Sum of every element. An empty array sums to 0.
pub fn sum(array: &Value) -> SubstrateResult<f64> {
    Ok(numbers(array)?.iter().sum())
}

/// Population variance around a caller-supplied mean. An empty array has variance 0.
pub fn variance(array: &Value, mean: f64) -> SubstrateResult<f64> {
    let values = numbers(array)?;
    if values.is_empty() {
        return Ok(0.0);
    }
    let total: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Ok(total / values.len() as f64)
}

/// One sample of the convolution of `a` with `b`, with `b` shifted left by `offset`.
///
/// Computes `Σ a[i] * b[i + offset]`; samples outside either array count as zero, so an offset of
/// `len(a)` or more (or `-len(b)` or less) has no overlap.
pub fn convolve(a: &Value, b: &Value, offset: i64) -> SubstrateResult<f64> {
    let a = numbers(a)?;
    let b = numbers(b)?;
    let total = a
        .iter()
        .enumerate()
        .filter_map(|(i, sample)| {
            let index = (i as i64).checked_add(offset)?;
            usize::try_from(index)
                .ok()
                .and_then(|index| b.get(index))
                .map(|weight| sample * weight)
        })
        .sum();
    Ok(total)
}

/// In-place radix-2 FFT.
///
/// With `imag` the real and imaginary parts are written back to both containers. Without it the
/// imaginary input is zero and `real` receives the magnitude of each bin. Array containers get
/// fresh number cells; views are encoded in place (and therefore truncated to their element
/// type). Nothing is written unless the whole transform can be stored.
#[instrument(level = "debug", skip(real, imag), fields(split = imag.is_some()))]
pub fn fft(real: &Value, imag: Option<&Value>, inverse: bool) -> SubstrateResult<()> {
    let arena = real.arena();
    if let Some(imag) = imag {
        arena.ensure_owned(imag)?;
    }

    let mut state = arena.lock();
    let mut re = load_numbers(&state, real.id())?;
    let mut im = match imag {
        Some(imag) => load_numbers(&state, imag.id())?,
        None => vec![0.0; re.len()],
    };
    fft::transform(&mut re, &mut im, inverse)?;

    let n = re.len();
    let targets: Vec<_> = std::iter::once(real).chain(imag).collect();
    let needed = targets
        .iter()
        .filter(|target| matches!(state.payload(target.id()), Payload::Array(_)))
        .count()
        * n;
    let available = state.free_cells();
    if needed > available {
        return Err(SubstrateError::OutOfMemory {
            resource: "cells",
            requested: needed,
            available,
        });
    }

    match imag {
        Some(imag) => {
            store_numbers(&mut state, real.id(), &re)?;
            store_numbers(&mut state, imag.id(), &im)?;
        }
        None => {
            let magnitude: Vec<f64> = re.iter().zip(&im).map(|(r, i)| r.hypot(*i)).collect();
            store_numbers(&mut state, real.id(), &magnitude)?;
        }
    }
    trace!(len = n, inverse, "fft stored");
    Ok(())
}

/// Linear interpolation at a fractional index, clamped to the first and last element.
/// An empty array yields 0.
pub fn interpolate(array: &Value, findex: f64) -> SubstrateResult<f64> {
    let values = numbers(array)?;
    Ok(sample_linear(&values, findex))
}

fn sample_linear(values: &[f64], findex: f64) -> f64 {
    let Some(last) = values.len().checked_sub(1) else {
        return 0.0;
    };
    let (index, frac) = clamp_axis(findex, last);
    match values.get(index + 1) {
        Some(next) if frac > 0.0 => values[index] * (1.0 - frac) + next * frac,
        _ => values[index],
    }
}

/// Splits a coordinate into an integer cell and a fraction, clamped to `0..=last`.
fn clamp_axis(position: f64, last: usize) -> (usize, f64) {
    if position.is_nan() || position <= 0.0 {
        return (0, 0.0);
    }
    if position >= last as f64 {
        return (last, 0.0);
    }
    let index = position.floor();
    (index as usize, position - index)
}

/// Bilinear interpolation over row-major data `width` elements wide. Each axis is clamped to the
/// grid independently; an empty array yields 0.
pub fn interpolate2d(array: &Value, width: usize, x: f64, y: f64) -> SubstrateResult<f64> {
    if width == 0 {
        return Err(SubstrateError::range("interpolate2d width must be positive"));
    }
    let values = numbers(array)?;
    if values.is_empty() {
        return Ok(0.0);
    }
    let height = values.len() / width;
    if height == 0 {
        return Err(SubstrateError::range(format!(
            "array of {} elements holds no complete row of width {width}",
            values.len()
        )));
    }
    let (x0, fx) = clamp_axis(x, width - 1);
    let (y0, fy) = clamp_axis(y, height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let at = |col: usize, row: usize| values[row * width + col];
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    Ok(top * (1.0 - fy) + bottom * fy)
}
