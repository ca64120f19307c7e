/// Enumerations for centrality classes and analysis variants.
pub mod enums;
/// A small Cartesian 3-vector type with the kinematic helpers used for tracks.
pub mod vectors;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
///
/// # See Also
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of the bin where a value should go in a histogram with
/// evenly spaced `bins` over a given `range`, using the ROOT convention where `0` is the underflow
/// bin, `1..=bins` are the regular bins and `bins + 1` is the overflow bin.
///
/// `NaN` values land in the overflow bin.
///
/// # See Also
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, range: (f64, f64)) -> usize {
    if value < range.0 {
        0
    } else if value >= range.1 || value.is_nan() {
        bins + 1
    } else {
        let bin_width = (range.1 - range.0) / bins as f64;
        let bin_index = ((value - range.0) / bin_width).floor() as usize;
        1 + bin_index.min(bins - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bin_edges() {
        let edges = get_bin_edges(4, (0.0, 2.0));
        assert_eq!(edges.len(), 5);
        assert_relative_eq!(edges[0], 0.0);
        assert_relative_eq!(edges[2], 1.0);
        assert_relative_eq!(edges[4], 2.0);
    }

    #[test]
    fn test_bin_index_flows() {
        assert_eq!(get_bin_index(-0.1, 4, (0.0, 2.0)), 0);
        assert_eq!(get_bin_index(0.0, 4, (0.0, 2.0)), 1);
        assert_eq!(get_bin_index(0.49, 4, (0.0, 2.0)), 1);
        assert_eq!(get_bin_index(0.5, 4, (0.0, 2.0)), 2);
        assert_eq!(get_bin_index(1.99, 4, (0.0, 2.0)), 4);
        assert_eq!(get_bin_index(2.0, 4, (0.0, 2.0)), 5);
        assert_eq!(get_bin_index(f64::NAN, 4, (0.0, 2.0)), 5);
    }

    #[test]
    fn test_integer_bins_centered() {
        // refMult-style binning: 500 bins over [-0.5, 499.5)
        assert_eq!(get_bin_index(0.0, 500, (-0.5, 499.5)), 1);
        assert_eq!(get_bin_index(19.0, 500, (-0.5, 499.5)), 20);
        assert_eq!(get_bin_index(499.0, 500, (-0.5, 499.5)), 500);
        assert_eq!(get_bin_index(500.0, 500, (-0.5, 499.5)), 501);
    }
}
