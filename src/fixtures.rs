//! Seed data shared by the scenarios and their tests.

use crate::record::NewRecord;

/// Rating the writer actor sets in the rating-based scenarios.
pub const NEW_RATING: i32 = 10;

const AUTHOR: &str = "Donald Knuth";

/// The record every scenario is seeded with. Its rating starts at 0.
pub fn book1() -> NewRecord {
    NewRecord::new(
        "Art of Computer Programming, Volume 1: Fundamental Algorithms",
        AUTHOR,
        0,
    )
}

pub fn book2() -> NewRecord {
    NewRecord::new(
        "Art of Computer Programming, Volume 2: Seminumerical Algorithms",
        AUTHOR,
        5,
    )
}

pub fn book3() -> NewRecord {
    NewRecord::new(
        "Art of Computer Programming, Volume 3: Sorting and Searching",
        AUTHOR,
        5,
    )
}

/// Rows the writer inserts in the phantom read scenario.
pub fn phantom_rows() -> Vec<NewRecord> {
    vec![book2(), book3()]
}
