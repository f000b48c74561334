//==============================================
// File: tests/numeric.rs
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Exercise the numeric array algorithms
// Objective: Verify FFT reconstruction, convolution and interpolation edges
//==============================================

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use solvra_substrate::numeric::{self, convolve, fft, interpolate, interpolate2d, variance};
use solvra_substrate::view::{ElementType, typed_array_from};
use solvra_substrate::{Arena, ErrorKind, Value};

const TOLERANCE: f64 = 1e-9;

fn arena() -> Arena {
    Arena::new(8192, 64 * 1024)
}

fn numbers(value: &Value) -> Vec<f64> {
    value.elements().iter().map(Value::to_number).collect()
}

#[test]
fn forward_then_inverse_reconstructs_the_input() {
    let mut rng = StdRng::seed_from_u64(42);
    let arena = arena();
    for exponent in 1..=10 {
        let n = 1usize << exponent;
        let re: Vec<f64> = (0..n).map(|_| rng.gen_range(-100.0..100.0)).collect();
        let im: Vec<f64> = (0..n).map(|_| rng.gen_range(-100.0..100.0)).collect();
        let real = arena.number_array(&re).expect("real");
        let imag = arena.number_array(&im).expect("imag");
        fft(&real, Some(&imag), false).expect("forward");
        fft(&real, Some(&imag), true).expect("inverse");
        for (got, want) in numbers(&real).iter().zip(&re) {
            assert!((got - want).abs() < 1e-6, "n={n}: {got} vs {want}");
        }
        for (got, want) in numbers(&imag).iter().zip(&im) {
            assert!((got - want).abs() < 1e-6, "n={n}: {got} vs {want}");
        }
    }
}

#[test]
fn forward_is_unscaled_inverse_divides_by_n() {
    let arena = arena();
    let real = arena.number_array(&[1.0; 4]).expect("real");
    let imag = arena.number_array(&[0.0; 4]).expect("imag");
    fft(&real, Some(&imag), false).expect("forward");
    assert_eq!(numbers(&real)[0], 4.0);

    let real = arena.number_array(&[4.0, 0.0, 0.0, 0.0]).expect("real");
    let imag = arena.number_array(&[0.0; 4]).expect("imag");
    fft(&real, Some(&imag), true).expect("inverse");
    assert!(numbers(&real).iter().all(|v| (v - 1.0).abs() < TOLERANCE));
}

#[test]
fn fft_rejects_bad_shapes() {
    let arena = arena();
    let three = arena.number_array(&[1.0, 2.0, 3.0]).expect("three");
    assert_eq!(fft(&three, None, false).unwrap_err().kind(), ErrorKind::Range);
    let empty = arena.number_array(&[]).expect("empty");
    assert_eq!(fft(&empty, None, false).unwrap_err().kind(), ErrorKind::Range);
    let four = arena.number_array(&[0.0; 4]).expect("four");
    let eight = arena.number_array(&[0.0; 8]).expect("eight");
    assert_eq!(
        fft(&four, Some(&eight), false).unwrap_err().kind(),
        ErrorKind::LengthMismatch
    );
}

#[test]
fn fft_writes_float_views_in_place() {
    let arena = arena();
    let real = typed_array_from(&arena, ElementType::FLOAT64, &[0.0, 1.0, 0.0, -1.0]).expect("re");
    let imag = typed_array_from(&arena, ElementType::FLOAT64, &[0.0; 4]).expect("im");
    let live = arena.live_cells();
    fft(&real, Some(&imag), false).expect("fft");
    assert_eq!(arena.live_cells(), live);
    assert!((imag.read_element(1).expect("bin 1") + 2.0).abs() < TOLERANCE);
    assert!((imag.read_element(3).expect("bin 3") - 2.0).abs() < TOLERANCE);
}

#[test]
fn convolution_zero_pads_both_arrays() {
    let arena = arena();
    let ones = arena.number_array(&[1.0, 1.0, 1.0]).expect("ones");
    assert_eq!(convolve(&ones, &ones, 0).expect("full overlap"), 3.0);
    assert_eq!(convolve(&ones, &ones, -1).expect("left partial"), 2.0);
    assert_eq!(convolve(&ones, &ones, 1).expect("right partial"), 2.0);
    assert_eq!(convolve(&ones, &ones, 3).expect("past the end"), 0.0);
    assert_eq!(convolve(&ones, &ones, -3).expect("before the start"), 0.0);
    assert_eq!(convolve(&ones, &ones, i64::MAX).expect("far away"), 0.0);

    let signal = arena.number_array(&[1.0, 2.0, 3.0, 4.0]).expect("signal");
    let kernel = typed_array_from(&arena, ElementType::INT8, &[1.0, -1.0]).expect("kernel");
    // a[1] * b[0] + a[2] * b[1]
    assert_eq!(convolve(&signal, &kernel, -1).expect("difference"), -1.0);
}

#[test]
fn variance_of_constant_data_is_zero() {
    let mut rng = StdRng::seed_from_u64(7);
    let arena = arena();
    for _ in 0..16 {
        let value: f64 = rng.gen_range(-1e3..1e3);
        let len = rng.gen_range(1..64);
        let array = arena.number_array(&vec![value; len]).expect("array");
        assert_eq!(variance(&array, value).expect("variance"), 0.0);
    }
    let uint8 = typed_array_from(&arena, ElementType::UINT8, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])
        .expect("view");
    assert_eq!(variance(&uint8, 5.0).expect("variance"), 4.0);
}

#[test]
fn interpolation_clamps_to_the_endpoints() {
    let arena = arena();
    let pair = arena.number_array(&[10.0, 20.0]).expect("pair");
    assert_eq!(interpolate(&pair, 0.5).expect("middle"), 15.0);
    assert_eq!(interpolate(&pair, 5.0).expect("past end"), 20.0);
    assert_eq!(interpolate(&pair, -1.0).expect("before start"), 10.0);
    let empty = arena.number_array(&[]).expect("empty");
    assert_eq!(interpolate(&empty, 0.5).expect("empty"), 0.0);

    let grid = arena
        .number_array(&[0.0, 1.0, 2.0, 10.0, 11.0, 12.0])
        .expect("grid");
    assert_eq!(interpolate2d(&grid, 3, 1.5, 0.5).expect("inside"), 6.5);
    assert_eq!(interpolate2d(&grid, 3, -4.0, 7.0).expect("corner"), 10.0);
}

#[test]
fn sum_promotes_every_element() {
    let arena = arena();
    let mixed = arena
        .array(vec![
            arena.integer(3).expect("int"),
            arena.number(0.5).expect("float"),
            arena.string("1.5").expect("numeric text"),
        ])
        .expect("mixed");
    assert_eq!(numeric::sum(&mixed).expect("sum"), 5.0);
    let halves = typed_array_from(&arena, ElementType::FLOAT32, &[0.25, 0.25]).expect("view");
    assert_eq!(numeric::sum(&halves).expect("sum"), 0.5);
}

#[test]
fn scalar_helpers() {
    assert_eq!(numeric::clip(12.0, 0.0, 10.0), 10.0);
    assert_eq!(numeric::reverse_byte(0b1100_0000), 0b0000_0011);
    assert_eq!(numeric::hsb_to_rgb(0.0, 0.0, 0.0), 0);
}

//==============================================
// End of file
//==============================================
