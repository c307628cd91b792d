// Copyright (C) 2026 Marquee Developers <devs@marquee.example>
//
// This file is part of marquee.
//
// marquee is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// marquee is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with marquee.  If not,
// see <http://www.gnu.org/licenses/>.

//! # rating aggregation
//!
//! The pure heart of the catalog's denormalization: given a movie's current review set, compute
//! the `average_rating`/`total_review_count` pair persisted on the movie. Callers (the storage
//! backends) are responsible for invoking this inside the same transaction as the triggering
//! review mutation, so a reader never observes a committed review without the matching
//! aggregates.

use crate::entities::Rating;

/// Compute `(average_rating, total_review_count)` for a review set
///
/// An empty set yields `(0.0, 0)`. Otherwise the mean is rounded to one decimal place, half away
/// from zero (a mean of 7.25 rounds to 7.3). The function is a pure fold over its input:
/// recomputing over an unchanged review set is bit-identical, any number of times.
pub fn aggregate(ratings: impl IntoIterator<Item = Rating>) -> (f64, u64) {
    let (sum, count) = ratings
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), rating| {
            (sum + rating.get() as u64, count + 1)
        });
    if count == 0 {
        (0.0, 0)
    } else {
        let mean = sum as f64 / count as f64;
        ((mean * 10.0).round() / 10.0, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings(ns: &[u8]) -> Vec<Rating> {
        ns.iter().map(|&n| Rating::new(n).unwrap()).collect()
    }

    #[test]
    fn empty_review_set() {
        let (avg, count) = aggregate([]);
        assert_eq!(avg, 0.0);
        assert_eq!(count, 0);
    }

    #[test]
    fn single_review() {
        assert_eq!(aggregate(ratings(&[10])), (10.0, 1));
    }

    #[test]
    fn mean_rounds_to_one_decimal() {
        // (10 + 5) / 2 = 7.5
        assert_eq!(aggregate(ratings(&[10, 5])), (7.5, 2));
        // (1 + 1 + 2) / 3 = 1.333... => 1.3
        assert_eq!(aggregate(ratings(&[1, 1, 2])), (1.3, 3));
        // (2 + 2 + 1) / 3 = 1.666... => 1.7
        assert_eq!(aggregate(ratings(&[2, 2, 1])), (1.7, 3));
        // 29 / 4 = 7.25, half away from zero => 7.3
        assert_eq!(aggregate(ratings(&[10, 10, 8, 1])), (7.3, 4));
    }

    #[test]
    fn idempotent_over_unchanged_set() {
        let rs = ratings(&[3, 7, 8, 8, 9]);
        let first = aggregate(rs.clone());
        let second = aggregate(rs);
        assert_eq!(first.0.to_bits(), second.0.to_bits());
        assert_eq!(first.1, second.1);
    }
}
