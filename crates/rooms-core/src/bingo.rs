use std::collections::HashSet;

use rand::seq::SliceRandom;

/// Allowed board sizes. A board holds the numbers `1..=size²`.
pub const MIN_SIZE: u32 = 5;
pub const MAX_SIZE: u32 = 10;

/// Completed lines needed to win.
pub const TARGET_LINES: u32 = 5;

/// Allowed values for the per-turn draw timeout hint.
pub const DRAW_TIMEOUT_CHOICES: [u32; 6] = [3, 5, 7, 10, 15, 20];

pub fn valid_size(size: u32) -> bool {
    (MIN_SIZE..=MAX_SIZE).contains(&size)
}

pub fn valid_draw_timeout(seconds: u32) -> bool {
    DRAW_TIMEOUT_CHOICES.contains(&seconds)
}

/// Generate a `size × size` board: a uniform shuffle of `1..=size²` laid out
/// row-major. Every board is a permutation of the full number range.
pub fn generate_board(size: u32) -> Vec<Vec<u32>> {
    let mut numbers: Vec<u32> = (1..=size * size).collect();
    let mut rng = rand::rng();
    numbers.shuffle(&mut rng);
    numbers
        .chunks(size as usize)
        .map(|row| row.to_vec())
        .collect()
}

/// Count completed lines on a board: rows, columns and the two main
/// diagonals whose every cell has been called.
pub fn count_lines(board: &[Vec<u32>], called: &HashSet<u32>) -> u32 {
    let n = board.len();
    let mut lines = 0;

    for row in board {
        if row.iter().all(|v| called.contains(v)) {
            lines += 1;
        }
    }
    for c in 0..n {
        if (0..n).all(|r| called.contains(&board[r][c])) {
            lines += 1;
        }
    }
    if (0..n).all(|i| called.contains(&board[i][i])) {
        lines += 1;
    }
    if (0..n).all(|i| called.contains(&board[i][n - 1 - i])) {
        lines += 1;
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential_board(size: u32) -> Vec<Vec<u32>> {
        (0..size)
            .map(|r| (1..=size).map(|c| r * size + c).collect())
            .collect()
    }

    #[test]
    fn generated_board_is_a_permutation() {
        for size in [5u32, 7, 10] {
            let board = generate_board(size);
            assert_eq!(board.len(), size as usize);
            let mut flat: Vec<u32> = board.iter().flatten().copied().collect();
            flat.sort_unstable();
            let expected: Vec<u32> = (1..=size * size).collect();
            assert_eq!(flat, expected);
        }
    }

    #[test]
    fn empty_call_set_has_no_lines() {
        let board = sequential_board(5);
        assert_eq!(count_lines(&board, &HashSet::new()), 0);
    }

    #[test]
    fn counts_a_single_row() {
        let board = sequential_board(5);
        let called: HashSet<u32> = (1..=5).collect();
        assert_eq!(count_lines(&board, &called), 1);
    }

    #[test]
    fn counts_columns_and_diagonals() {
        let board = sequential_board(5);
        // First column: 1, 6, 11, 16, 21.
        let called: HashSet<u32> = (0..5).map(|r| r * 5 + 1).collect();
        assert_eq!(count_lines(&board, &called), 1);

        // Main diagonal: 1, 7, 13, 19, 25.
        let called: HashSet<u32> = (0..5).map(|i| i * 6 + 1).collect();
        assert_eq!(count_lines(&board, &called), 1);

        // Anti-diagonal: 5, 9, 13, 17, 21.
        let called: HashSet<u32> = (0..5).map(|i| 5 + i * 4).collect();
        assert_eq!(count_lines(&board, &called), 1);
    }

    #[test]
    fn full_call_set_completes_every_line() {
        let board = sequential_board(5);
        let called: HashSet<u32> = (1..=25).collect();
        // 5 rows + 5 columns + 2 diagonals.
        assert_eq!(count_lines(&board, &called), 12);
    }

    #[test]
    fn size_bounds() {
        assert!(!valid_size(4));
        assert!(valid_size(5));
        assert!(valid_size(10));
        assert!(!valid_size(11));
        assert!(valid_draw_timeout(10));
        assert!(!valid_draw_timeout(4));
    }
}
