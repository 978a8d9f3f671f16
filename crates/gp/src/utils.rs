use ndarray::{Array1, Array2, ArrayBase, Data, Ix2, Zip};

/// Computes euclidean distances between each row of x and each row of y
/// resulting in a 2d array of shape (nrows(x), nrows(y));
/// *Panics* if x and y have not the same column numbers
pub fn pairwise_distances(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Array2<f64> {
    assert!(x.ncols() == y.ncols());

    let y = y.view();
    let mut result = Array2::zeros((x.nrows(), y.nrows()));
    Zip::from(result.rows_mut())
        .and(x.rows())
        .par_for_each(|mut row, x_row| {
            Zip::from(&mut row).and(y.rows()).for_each(|d, y_row| {
                *d = Zip::from(&x_row)
                    .and(&y_row)
                    .fold(0., |acc, a, b| acc + (a - b) * (a - b))
                    .sqrt();
            });
        });
    result
}

/// Count pairs of rows of x which are identical (zero distance apart).
pub(crate) fn duplicated_rows(distances: &Array2<f64>) -> usize {
    let n = distances.nrows();
    (0..n)
        .map(|i| ((i + 1)..n).filter(|&j| distances[[i, j]] == 0.).count())
        .sum()
}

/// Evenly spaced values over [0, 1], both ends included.
pub(crate) fn unit_linspace(n: usize) -> Array1<f64> {
    Array1::linspace(0., 1., n)
}
