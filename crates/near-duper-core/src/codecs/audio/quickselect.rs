/// Reorders `indices` so that position `k` holds the index of the k-th largest
/// `|values[i]|` (0-based), every earlier position holds one at least as large
/// and every later position one no larger. Expected O(n).
pub fn select_by_magnitude(indices: &mut [usize], values: &[f32], k: usize) {
    if indices.is_empty() || k >= indices.len() {
        return;
    }
    let mag = |i: usize| values[i].abs();

    let (mut lo, mut hi) = (0usize, indices.len() - 1);
    while lo < hi {
        let p = partition(indices, lo, hi, &mag);
        match p.cmp(&k) {
            std::cmp::Ordering::Equal => return,
            std::cmp::Ordering::Greater => hi = p - 1,
            std::cmp::Ordering::Less => lo = p + 1,
        }
    }
}

/// Indices of the `count` largest-magnitude values, in no particular order.
pub fn top_magnitudes(values: &[f32], count: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    let count = count.min(values.len());
    if count == 0 {
        return Vec::new();
    }
    select_by_magnitude(&mut indices, values, count - 1);
    indices.truncate(count);
    indices
}

/// Lomuto partition in descending order around a median-of-three pivot.
/// Returns the pivot's final position.
fn partition(indices: &mut [usize], lo: usize, hi: usize, mag: &impl Fn(usize) -> f32) -> usize {
    let mid = lo + (hi - lo) / 2;
    if mag(indices[mid]) > mag(indices[lo]) {
        indices.swap(mid, lo);
    }
    if mag(indices[hi]) > mag(indices[lo]) {
        indices.swap(hi, lo);
    }
    if mag(indices[hi]) > mag(indices[mid]) {
        indices.swap(hi, mid);
    }
    // lo >= mid >= hi now; mid is the median.
    indices.swap(mid, hi);
    let pivot = mag(indices[hi]);

    let mut store = lo;
    for i in lo..hi {
        if mag(indices[i]) > pivot {
            indices.swap(i, store);
            store += 1;
        }
    }
    indices.swap(store, hi);
    store
}
