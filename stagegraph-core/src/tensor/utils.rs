/// Calculates the strides for a given shape.
/// Strides represent the number of elements to skip in the flattened data array
/// to move one step along each dimension.
///
/// Example:
/// shape = [2, 3] -> strides = [3, 1]
/// shape = [2, 2, 2] -> strides = [4, 2, 1]
pub fn calculate_strides(shape: &[usize]) -> Vec<usize> {
    if shape.is_empty() {
        return vec![];
    }
    let rank = shape.len();
    let mut strides = vec![1; rank];
    for i in (0..rank - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Converts a linear row-major index into multi-dimensional coordinates.
///
/// Works from the innermost dimension outwards so shapes containing zeros never
/// divide by a zero stride.
pub fn index_to_coord(index: usize, shape: &[usize]) -> Vec<usize> {
    let mut coord = vec![0; shape.len()];
    let mut remaining = index;
    for i in (0..shape.len()).rev() {
        let dim = shape[i];
        if dim == 0 {
            continue;
        }
        coord[i] = remaining % dim;
        remaining /= dim;
    }
    coord
}

/// Converts multi-dimensional coordinates into a linear index given strides.
pub fn coord_to_index(coord: &[usize], strides: &[usize]) -> usize {
    coord.iter().zip(strides.iter()).map(|(&c, &s)| c * s).sum()
}
