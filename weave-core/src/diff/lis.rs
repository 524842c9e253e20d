//! Longest increasing subsequence.
//!
//! Patience sorting with predecessor links: O(n log n) time, O(n) space.

/// Positions in `seq` of one longest strictly increasing subsequence.
///
/// The positions are returned in ascending order. Ties between equally long
/// subsequences resolve towards smaller trailing values.
pub fn longest_increasing_subsequence<T: Ord>(seq: &[T]) -> Vec<usize> {
    // tails[k] is the position of the smallest tail of any increasing
    // subsequence of length k + 1 seen so far.
    let mut tails: Vec<usize> = Vec::new();
    let mut predecessors: Vec<Option<usize>> = vec![None; seq.len()];

    for (position, value) in seq.iter().enumerate() {
        let length = tails.partition_point(|&tail| seq[tail] < *value);
        if length > 0 {
            predecessors[position] = Some(tails[length - 1]);
        }
        if length == tails.len() {
            tails.push(position);
        } else {
            tails[length] = position;
        }
    }

    let mut result = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        result.push(position);
        cursor = predecessors[position];
    }
    result.reverse();
    result
}
