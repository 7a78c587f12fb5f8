//! Integration tests for non-zero sector run detection.

use vhdtool_core::sparse::{find_runs, SectorRun, SectorRuns};

const SECTOR: usize = 512;

/// Builds a chunk of `sectors` sectors where only the listed ones are non-zero.
fn chunk(sectors: usize, nonzero: &[usize]) -> Vec<u8> {
    let mut data = vec![0u8; sectors * SECTOR];
    for &i in nonzero {
        // Touch the last byte so an early exit on the first byte would miss it.
        data[(i + 1) * SECTOR - 1] = 1;
    }
    data
}

fn runs(data: &[u8]) -> Vec<(usize, usize)> {
    find_runs(data, SECTOR)
        .unwrap()
        .into_iter()
        .map(|r| (r.start, r.end))
        .collect()
}

#[test]
fn test_all_zero_chunk_has_no_runs() {
    assert!(runs(&chunk(16, &[])).is_empty());
}

#[test]
fn test_single_nonzero_sector() {
    for k in [0, 7, 15] {
        assert_eq!(runs(&chunk(16, &[k])), vec![(k, k + 1)]);
    }
}

#[test]
fn test_separated_sectors_stay_separate() {
    assert_eq!(runs(&chunk(8, &[2, 4])), vec![(2, 3), (4, 5)]);
}

#[test]
fn test_adjacent_sectors_merge() {
    assert_eq!(runs(&chunk(8, &[2, 3])), vec![(2, 4)]);
}

#[test]
fn test_fully_populated_chunk_is_one_run() {
    let data = vec![0xFFu8; 4 * SECTOR];
    assert_eq!(runs(&data), vec![(0, 4)]);
}

#[test]
fn test_runs_cover_exactly_nonzero_sectors() {
    let nonzero = [0, 1, 2, 5, 9, 10, 15];
    let data = chunk(16, &nonzero);
    let covered: Vec<usize> = find_runs(&data, SECTOR)
        .unwrap()
        .iter()
        .flat_map(|r| r.start..r.end)
        .collect();
    assert_eq!(covered, nonzero);
}

#[test]
fn test_runs_are_maximal() {
    let data = chunk(16, &[1, 2, 3, 8, 9, 14]);
    let found = find_runs(&data, SECTOR).unwrap();
    for pair in found.windows(2) {
        assert!(
            pair[0].end < pair[1].start,
            "runs {:?} and {:?} should have been merged",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_iterator_matches_collected() {
    let data = chunk(32, &[3, 4, 20, 31]);
    let iterated: Vec<SectorRun> = SectorRuns::new(&data, SECTOR).unwrap().collect();
    assert_eq!(iterated, find_runs(&data, SECTOR).unwrap());
}

#[test]
fn test_byte_ranges_reconstruct_data() {
    let data = chunk(8, &[1, 2, 6]);
    let mut rebuilt = vec![0u8; data.len()];
    for run in find_runs(&data, SECTOR).unwrap() {
        let range = run.byte_range(SECTOR);
        rebuilt[range.clone()].copy_from_slice(&data[range]);
    }
    assert_eq!(rebuilt, data);
}

#[test]
fn test_other_sector_sizes() {
    let mut data = vec![0u8; 4 * 4096];
    data[4096] = 1;
    assert_eq!(
        find_runs(&data, 4096).unwrap(),
        vec![SectorRun::new(1, 2)]
    );
}
