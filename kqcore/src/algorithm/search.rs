use std::ops::Range;

/// First index whose key satisfies `pred`, or `None` if no key does.
///
/// `pred` must be monotone over `keys` (false for a prefix, true afterwards).
///
/// # Example
///
/// ```rust
/// # use kqcore::algorithm::search::lower_bound;
/// let keys = [1.0, 2.0, 3.0];
/// assert_eq!(lower_bound(&keys, |k| *k >= 1.5), Some(1));
/// assert_eq!(lower_bound(&keys, |k| *k >= 3.5), None);
/// ```
pub fn lower_bound<T, F>(keys: &[T], pred: F) -> Option<usize>
where
    F: Fn(&T) -> bool,
{
    let idx = keys.partition_point(|k| !pred(k));
    if idx < keys.len() { Some(idx) } else { None }
}

/// First absolute index at or after `range_start` whose key no longer satisfies `pred`.
///
/// `pred` must be monotone over `keys[range_start..]` (true for a prefix, false afterwards).
/// Returns `keys.len()` if every key from `range_start` on satisfies it.
pub fn upper_bound<T, F>(keys: &[T], range_start: usize, pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let start = range_start.min(keys.len());
    start + keys[start..].partition_point(|k| pred(k))
}

/// Indices of the ascending `keys` with `lo <= key <= hi`.
///
/// `None` when no key reaches `lo`; an empty range when keys jump over `[lo, hi]`.
pub fn mz_range(keys: &[f64], lo: f64, hi: f64) -> Option<Range<usize>> {
    let start = lower_bound(keys, |k| *k >= lo)?;
    let end = upper_bound(keys, start, |k| *k <= hi);
    Some(start..end)
}
