//! Least-squares polynomial fits over short trace windows. These fits are
//! used to extrapolate the true pulse maximum (third order) and by the
//! polynomial CFD to interpolate the threshold crossing (second order). The
//! x values are absolute sample indices so that roots come out directly in
//! trace coordinates.

use super::error::TimingError;

/// Fit a second order polynomial to the three samples starting at
/// `start_bin`. Returns the value of the fit at its vertex and the
/// coefficients in ascending power order.
pub fn calculate_poly2<T: Copy + Into<f64>>(
    data: &[T],
    start_bin: usize,
) -> Result<(f64, [f64; 3]), TimingError> {
    if data.len() < 3 {
        return Err(TimingError::TraceTooShort(data.len(), 3));
    }
    if start_bin + 2 >= data.len() {
        return Err(TimingError::MaxOutOfRange(start_bin + 2, data.len()));
    }

    let mut x1 = [0.0; 3];
    let mut x2 = [0.0; 3];
    for i in 0..3 {
        x1[i] = (start_bin + i) as f64;
        x2[i] = x1[i] * x1[i];
    }
    let d: [f64; 3] = [
        data[start_bin].into(),
        data[start_bin + 1].into(),
        data[start_bin + 2].into(),
    ];

    let denom = (x1[1] * x2[2] - x2[1] * x1[2]) - x1[0] * (x2[2] - x2[1])
        + x2[0] * (x1[2] - x1[1]);

    let p0 = (d[0] * (x1[1] * x2[2] - x2[1] * x1[2]) - x1[0] * (d[1] * x2[2] - x2[1] * d[2])
        + x2[0] * (d[1] * x1[2] - x1[1] * d[2]))
        / denom;
    let p1 = ((d[1] * x2[2] - x2[1] * d[2]) - d[0] * (x2[2] - x2[1]) + x2[0] * (d[2] - d[1]))
        / denom;
    let p2 = ((x1[1] * d[2] - d[1] * x1[2]) - x1[0] * (d[2] - d[1]) + d[0] * (x1[2] - x1[1]))
        / denom;

    Ok((p0 - ((p1 * p1) / (4.0 * p2)), [p0, p1, p2]))
}

/// Fit a third order polynomial to the four samples starting at `start_bin`.
/// Returns the value of the fit at its local maximum and the coefficients in
/// ascending power order.
pub fn calculate_poly3<T: Copy + Into<f64>>(
    data: &[T],
    start_bin: usize,
) -> Result<(f64, [f64; 4]), TimingError> {
    if data.len() < 4 {
        return Err(TimingError::TraceTooShort(data.len(), 4));
    }
    if start_bin + 3 >= data.len() {
        return Err(TimingError::MaxOutOfRange(start_bin + 3, data.len()));
    }

    let mut x1 = [0.0; 4];
    let mut x2 = [0.0; 4];
    let mut x3 = [0.0; 4];
    for i in 0..4 {
        x1[i] = (start_bin + i) as f64;
        x2[i] = x1[i] * x1[i];
        x3[i] = x2[i] * x1[i];
    }
    let d: [f64; 4] = [
        data[start_bin].into(),
        data[start_bin + 1].into(),
        data[start_bin + 2].into(),
        data[start_bin + 3].into(),
    ];

    let denom = (x1[1] * (x2[2] * x3[3] - x2[3] * x3[2])
        - x1[2] * (x2[1] * x3[3] - x2[3] * x3[1])
        + x1[3] * (x2[1] * x3[2] - x2[2] * x3[1]))
        - (x1[0] * (x2[2] * x3[3] - x2[3] * x3[2]) - x1[2] * (x2[0] * x3[3] - x2[3] * x3[0])
            + x1[3] * (x2[0] * x3[2] - x2[2] * x3[0]))
        + (x1[0] * (x2[1] * x3[3] - x2[3] * x3[1]) - x1[1] * (x2[0] * x3[3] - x2[3] * x3[0])
            + x1[3] * (x2[0] * x3[1] - x2[1] * x3[0]))
        - (x1[0] * (x2[1] * x3[2] - x2[2] * x3[1]) - x1[1] * (x2[0] * x3[2] - x2[2] * x3[0])
            + x1[2] * (x2[0] * x3[1] - x2[1] * x3[0]));

    let p0 = (d[0]
        * (x1[1] * (x2[2] * x3[3] - x2[3] * x3[2]) - x1[2] * (x2[1] * x3[3] - x2[3] * x3[1])
            + x1[3] * (x2[1] * x3[2] - x2[2] * x3[1]))
        - d[1] * (x1[0] * (x2[2] * x3[3] - x2[3] * x3[2])
            - x1[2] * (x2[0] * x3[3] - x2[3] * x3[0])
            + x1[3] * (x2[0] * x3[2] - x2[2] * x3[0]))
        + d[2] * (x1[0] * (x2[1] * x3[3] - x2[3] * x3[1])
            - x1[1] * (x2[0] * x3[3] - x2[3] * x3[0])
            + x1[3] * (x2[0] * x3[1] - x2[1] * x3[0]))
        - d[3] * (x1[0] * (x2[1] * x3[2] - x2[2] * x3[1])
            - x1[1] * (x2[0] * x3[2] - x2[2] * x3[0])
            + x1[2] * (x2[0] * x3[1] - x2[1] * x3[0])))
        / denom;

    let p1 = ((d[1] * (x2[2] * x3[3] - x2[3] * x3[2]) - d[2] * (x2[1] * x3[3] - x2[3] * x3[1])
        + d[3] * (x2[1] * x3[2] - x2[2] * x3[1]))
        - (d[0] * (x2[2] * x3[3] - x2[3] * x3[2]) - d[2] * (x2[0] * x3[3] - x2[3] * x3[0])
            + d[3] * (x2[0] * x3[2] - x2[2] * x3[0]))
        + (d[0] * (x2[1] * x3[3] - x2[3] * x3[1]) - d[1] * (x2[0] * x3[3] - x2[3] * x3[0])
            + d[3] * (x2[0] * x3[1] - x2[1] * x3[0]))
        - (d[0] * (x2[1] * x3[2] - x2[2] * x3[1]) - d[1] * (x2[0] * x3[2] - x2[2] * x3[0])
            + d[2] * (x2[0] * x3[1] - x2[1] * x3[0])))
        / denom;

    let p2 = ((x1[1] * (d[2] * x3[3] - d[3] * x3[2]) - x1[2] * (d[1] * x3[3] - d[3] * x3[1])
        + x1[3] * (d[1] * x3[2] - d[2] * x3[1]))
        - (x1[0] * (d[2] * x3[3] - d[3] * x3[2]) - x1[2] * (d[0] * x3[3] - d[3] * x3[0])
            + x1[3] * (d[0] * x3[2] - d[2] * x3[0]))
        + (x1[0] * (d[1] * x3[3] - d[3] * x3[1]) - x1[1] * (d[0] * x3[3] - d[3] * x3[0])
            + x1[3] * (d[0] * x3[1] - d[1] * x3[0]))
        - (x1[0] * (d[1] * x3[2] - d[2] * x3[1]) - x1[1] * (d[0] * x3[2] - d[2] * x3[0])
            + x1[2] * (d[0] * x3[1] - d[1] * x3[0])))
        / denom;

    let p3 = ((x1[1] * (x2[2] * d[3] - x2[3] * d[2]) - x1[2] * (x2[1] * d[3] - x2[3] * d[1])
        + x1[3] * (x2[1] * d[2] - x2[2] * d[1]))
        - (x1[0] * (x2[2] * d[3] - x2[3] * d[2]) - x1[2] * (x2[0] * d[3] - x2[3] * d[0])
            + x1[3] * (x2[0] * d[2] - x2[2] * d[0]))
        + (x1[0] * (x2[1] * d[3] - x2[3] * d[1]) - x1[1] * (x2[0] * d[3] - x2[3] * d[0])
            + x1[3] * (x2[0] * d[1] - x2[1] * d[0]))
        - (x1[0] * (x2[1] * d[2] - x2[2] * d[1]) - x1[1] * (x2[0] * d[2] - x2[2] * d[0])
            + x1[2] * (x2[0] * d[1] - x2[1] * d[0])))
        / denom;

    // The extremum of the cubic with negative curvature is the maximum.
    let root = (4.0 * p2 * p2 - 12.0 * p3 * p1).sqrt();
    let node1 = (-2.0 * p2 + root) / (6.0 * p3);
    let node2 = (-2.0 * p2 - root) / (6.0 * p3);
    let xmax = if 2.0 * p2 + 6.0 * p3 * node1 < 0.0 {
        node1
    } else {
        node2
    };

    Ok((
        p0 + p1 * xmax + p2 * xmax * xmax + p3 * xmax * xmax * xmax,
        [p0, p1, p2, p3],
    ))
}
