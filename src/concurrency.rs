//! Concurrency helper: limit how many items (dump shards, page-id chunks,
//! archive members) are processed in parallel at once.

use anyhow::Result;
use rayon::prelude::*;

/// Runs `f` over `items` with at most `limit` in flight at a time. `limit <=
/// 1` runs sequentially; otherwise items are processed in chunks of `limit`
/// via rayon, with a `try_for_each` short-circuit on the first error.
pub fn for_each_limited<T, F>(items: &[T], limit: usize, f: F) -> Result<()>
where
    T: Sync,
    F: Sync + Fn(&T) -> Result<()>,
{
    if limit <= 1 {
        for item in items {
            f(item)?;
        }
        return Ok(());
    }
    for chunk in items.chunks(limit) {
        chunk.par_iter().try_for_each(|item| f(item))?;
    }
    Ok(())
}
