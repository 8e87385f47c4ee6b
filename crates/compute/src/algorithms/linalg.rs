use super::forecast::ForecastError;

/// Solve the ridge-regularised least-squares problem
///
/// `min_beta (1/n) * sum_i (y_i - x_i . beta)^2 + sum_j penalty_j * beta_j^2`
///
/// via its normal equations. `rows` are the design-matrix rows, all of
/// length `penalty.len()`.
pub fn ridge_solve(rows: &[Vec<f64>], y: &[f64], penalty: &[f64]) -> Result<Vec<f64>, ForecastError> {
    let p = penalty.len();
    let n = rows.len().max(1) as f64;

    let mut a = vec![vec![0.0; p]; p];
    let mut b = vec![0.0; p];
    for (row, &yi) in rows.iter().zip(y) {
        for i in 0..p {
            b[i] += row[i] * yi / n;
            for j in i..p {
                a[i][j] += row[i] * row[j] / n;
            }
        }
    }
    for i in 0..p {
        for j in 0..i {
            a[i][j] = a[j][i];
        }
        a[i][i] += penalty[i];
    }

    solve(a, b)
}

/// Gaussian elimination with partial pivoting. Consumes the system.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, ForecastError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .ok_or(ForecastError::Singular)?;
        if a[pivot][col].abs() < 1e-14 {
            return Err(ForecastError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}
