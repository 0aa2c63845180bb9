//! In-memory run sorter.
//!
//! Quicksort with a random pivot that stops partitioning small ranges and finishes with a single
//! insertion sort pass over the whole (by then nearly sorted) buffer. The sort is not stable.
//! Large partitions are sorted in parallel on the current rayon thread pool.

use std::cmp::Ordering;

use rand::Rng;
use rayon;

/// Ranges shorter than this are left for the final insertion sort pass.
pub const MIN_PARTITION_LEN: usize = 10;

/// Partitions longer than this recurse on both sides in parallel.
const PARALLEL_PARTITION_LEN: usize = 8 * 1024;

/// Sorts `data` using the type's natural order.
pub fn sort<T>(data: &mut [T])
where
    T: Ord + Copy + Send,
{
    sort_with_min_partition(data, MIN_PARTITION_LEN)
}

pub fn sort_with_min_partition<T>(data: &mut [T], min_partition_len: usize)
where
    T: Ord + Copy + Send,
{
    quicker_sort(data, min_partition_len, &|a: &T, b: &T| a < b)
}

/// Sorts `data` using a compare function.
pub fn sort_by<T, F>(data: &mut [T], compare: F)
where
    T: Copy + Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    sort_by_with_min_partition(data, compare, MIN_PARTITION_LEN)
}

pub fn sort_by_with_min_partition<T, F>(data: &mut [T], compare: F, min_partition_len: usize)
where
    T: Copy + Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    quicker_sort(data, min_partition_len, &|a: &T, b: &T| compare(a, b) == Ordering::Less)
}

fn quicker_sort<T, F>(data: &mut [T], min_partition_len: usize, is_less: &F)
where
    T: Copy + Send,
    F: Fn(&T, &T) -> bool + Sync,
{
    quick_sort(data, std::cmp::max(2, min_partition_len), is_less);
    insertion_sort(data, is_less);
}

fn quick_sort<T, F>(data: &mut [T], min_partition_len: usize, is_less: &F)
where
    T: Copy + Send,
    F: Fn(&T, &T) -> bool + Sync,
{
    if data.len() < min_partition_len {
        return;
    }

    // everything at or below the partition index is less than or equal to everything above it
    let part_index = partition(data, is_less);
    let (low, high) = data.split_at_mut(part_index + 1);

    if low.len() + high.len() > PARALLEL_PARTITION_LEN {
        rayon::join(
            || quick_sort(low, min_partition_len, is_less),
            || quick_sort(high, min_partition_len, is_less),
        );
    } else {
        quick_sort(low, min_partition_len, is_less);
        quick_sort(high, min_partition_len, is_less);
    }
}

/// Hoare partition around a randomly chosen pivot. Returns an index in `[0, len - 2]` for `len >= 2`.
fn partition<T, F>(data: &mut [T], is_less: &F) -> usize
where
    T: Copy,
    F: Fn(&T, &T) -> bool,
{
    let pivot_index = rand::thread_rng().gen_range(0..data.len());
    data.swap(0, pivot_index);
    let pivot = data[0];

    let mut p = 0;
    let mut q = data.len() - 1;
    loop {
        while is_less(&pivot, &data[q]) {
            q -= 1;
        }
        while is_less(&data[p], &pivot) {
            p += 1;
        }

        if p < q {
            data.swap(p, q);
            p += 1;
            q -= 1;
        } else {
            return q;
        }
    }
}

fn insertion_sort<T, F>(data: &mut [T], is_less: &F)
where
    T: Copy,
    F: Fn(&T, &T) -> bool,
{
    for i in 1..data.len() {
        let test = data[i];
        let mut j = i;
        while j > 0 && is_less(&test, &data[j - 1]) {
            data[j] = data[j - 1];
            j -= 1;
        }
        data[j] = test;
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{partition, sort, sort_by, sort_by_with_min_partition, sort_with_min_partition};

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![1], vec![1])]
    #[case(vec![2, 1], vec![1, 2])]
    #[case(vec![5, 3, 3, 1, 4, 1, 5, 9, 2, 6], vec![1, 1, 2, 3, 3, 4, 5, 5, 6, 9])]
    #[case(vec![7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7], vec![7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7])]
    fn test_sort(#[case] mut data: Vec<i32>, #[case] expected: Vec<i32>) {
        sort(&mut data);
        assert_eq!(data, expected);
    }

    #[rstest]
    #[case(2)]
    #[case(10)]
    #[case(1000)]
    fn test_min_partition(#[case] min_partition_len: usize) {
        let mut rng = StdRng::seed_from_u64(min_partition_len as u64);
        let mut data = Vec::from_iter((0..500).map(|_| rng.gen_range(0..100)));
        let mut expected = data.clone();
        expected.sort();

        sort_with_min_partition(&mut data, min_partition_len);
        assert_eq!(data, expected);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_sort_by(#[case] reversed: bool) {
        let mut data = Vec::from_iter((0..20_000).map(|i| (i % 97, i)));
        data.shuffle(&mut StdRng::seed_from_u64(7));

        let compare = if reversed {
            |a: &(i32, i32), b: &(i32, i32)| a.0.cmp(&b.0).reverse()
        } else {
            |a: &(i32, i32), b: &(i32, i32)| a.0.cmp(&b.0)
        };
        sort_by(&mut data, compare);

        assert!(data.windows(2).all(|pair| compare(&pair[0], &pair[1]).is_le()));

        let mut seconds = Vec::from_iter(data.iter().map(|item| item.1));
        seconds.sort();
        assert_eq!(seconds, Vec::from_iter(0..20_000));
    }

    #[rstest]
    fn test_sorted_input() {
        let mut data = Vec::from_iter(0..50_000u64);
        sort_by_with_min_partition(&mut data, |a, b| b.cmp(a), 16);
        assert_eq!(data, Vec::from_iter((0..50_000u64).rev()));
    }

    #[rstest]
    fn test_partition() {
        let mut rng = StdRng::seed_from_u64(3);
        for len in 2..50 {
            let mut data = Vec::from_iter((0..len).map(|_| rng.gen_range(0..10)));
            let index = partition(&mut data, &|a: &i32, b: &i32| a < b);

            assert!(index < len - 1);
            let max_low = data[..=index].iter().max().unwrap();
            let min_high = data[index + 1..].iter().min().unwrap();
            assert!(max_low <= min_high);
        }
    }
}
