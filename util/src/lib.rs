use nalgebra::{DMatrix, RealField};

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Checks that `values` contains every index in `0 .. values.len()` exactly once.
pub fn is_permutation(values: &[usize]) -> bool {
    let mut seen = vec![false; values.len()];
    for &v in values {
        if v >= values.len() || seen[v] {
            return false;
        }
        seen[v] = true;
    }
    true
}

/// Checks that a square matrix equals its transpose up to an absolute tolerance.
pub fn is_symmetric<T: RealField + Copy>(matrix: &DMatrix<T>, abstol: T) -> bool {
    matrix.is_square()
        && (0..matrix.nrows())
            .all(|i| (0..i).all(|j| (matrix[(i, j)] - matrix[(j, i)]).abs() <= abstol))
}
