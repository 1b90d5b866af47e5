#![allow(dead_code)]

use std::path::Path;

/// Number of entries left in a directory; used to verify that sort and
/// map/reduce calls leave no temp files behind.
pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
