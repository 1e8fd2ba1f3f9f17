//! Selection, crossover and mutation over flattened chromosomes.

use std::collections::HashMap;

use crate::LayoutError;

/// k-tournament: draws `k` individuals uniformly with replacement and keeps
/// the fittest, `count` times. Returns population indices.
pub fn tournament_selection(
    scores: &[u64],
    k: usize,
    count: usize,
    rng: &mut fastrand::Rng,
) -> Vec<usize> {
    (0..count)
        .map(|_| {
            let mut winner = rng.usize(..scores.len());
            for _ in 1..k {
                let contender = rng.usize(..scores.len());
                if scores[contender] > scores[winner] {
                    winner = contender;
                }
            }
            winner
        })
        .collect()
}

/// With probability `prob` recombines the parents with order crossover,
/// otherwise returns them unchanged.
pub fn crossover_pair(
    first: &[u32],
    second: &[u32],
    prob: f64,
    rng: &mut fastrand::Rng,
) -> Result<(Vec<u32>, Vec<u32>), LayoutError> {
    if rng.f64() >= prob {
        return Ok((first.to_vec(), second.to_vec()));
    }
    let n = first.len();
    let a = rng.usize(..=n);
    let b = rng.usize(..=n);
    let (start, end) = (a.min(b), a.max(b));
    Ok((
        order_crossover(first, second, start, end)?,
        order_crossover(second, first, start, end)?,
    ))
}

/// Order crossover: the child copies `keep[start..end]` in place and fills
/// the remaining positions with the values of `fill` in their order,
/// skipping values already copied. Duplicated lags are matched by count.
pub fn order_crossover(
    keep: &[u32],
    fill: &[u32],
    start: usize,
    end: usize,
) -> Result<Vec<u32>, LayoutError> {
    let n = keep.len();
    if fill.len() != n || start > end || end > n {
        return Err(LayoutError::BrokenPermutation);
    }

    let slice = &keep[start..end];
    let mut placed: HashMap<u32, usize> = HashMap::new();
    for &value in slice {
        *placed.entry(value).or_default() += 1;
    }
    let mut to_place = Vec::with_capacity(n - slice.len());
    for &value in fill {
        match placed.get_mut(&value) {
            Some(count) if *count > 0 => *count -= 1,
            _ => to_place.push(value),
        }
    }
    if to_place.len() != n - slice.len() {
        return Err(LayoutError::BrokenPermutation);
    }

    let mut child = Vec::with_capacity(n);
    child.extend_from_slice(&to_place[..start]);
    child.extend_from_slice(slice);
    child.extend_from_slice(&to_place[start..]);

    if !same_multiset(&child, keep) {
        return Err(LayoutError::BrokenPermutation);
    }
    Ok(child)
}

/// Swaps each cell, with probability `prob`, with a different uniformly
/// chosen cell.
pub fn mutate(cells: &mut [u32], prob: f64, rng: &mut fastrand::Rng) {
    let n = cells.len();
    if n < 2 {
        return;
    }
    for i in 0..n {
        if rng.f64() < prob {
            let mut j = rng.usize(..n - 1);
            if j >= i {
                j += 1;
            }
            cells.swap(i, j);
        }
    }
}

pub(crate) fn same_multiset(a: &[u32], b: &[u32]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

#[cfg(test)]
#[path = "tests/operators_tests.rs"]
mod tests;
