//! Bounded parallel driver (C8): runs one task per work item (dump shard,
//! page-id chunk) with at most `file_concurrency` in flight, aggregating
//! per-item [`BuildStats`] and deciding abort-vs-skip on a per-item error
//! according to `strict`.

use anyhow::Result;
use rayon::prelude::*;

use crate::aggregate::{merge_all, BuildStats};
use crate::config::WikidatedOptions;
use crate::progress::ProgressScope;

/// Runs `f` over `items`, one call per item, at most `opts.file_concurrency`
/// concurrently. Each call returns its own [`BuildStats`]; results are merged
/// with [`merge_all`]. When `opts.strict` is `true` the first error aborts
/// the whole run; otherwise the item is skipped, its failure recorded under
/// `exceptions["driver_task_failed"]`, and the run continues.
pub fn run_build<T, F>(items: &[T], opts: &WikidatedOptions, label: &str, f: F) -> Result<BuildStats>
where
    T: Sync,
    F: Sync + Fn(&T) -> Result<BuildStats>,
{
    let progress = if opts.progress {
        Some(ProgressScope::count(label.to_string(), items.len() as u64))
    } else {
        None
    };
    let done = std::sync::atomic::AtomicU64::new(0);

    let run_one = |item: &T| -> Result<BuildStats> {
        let result = f(item);
        let n = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        if let Some(p) = &progress {
            p.set(n, items.len() as u64);
        }
        match result {
            Ok(stats) => Ok(stats),
            Err(e) if opts.strict => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "task failed, skipping (strict mode disabled)");
                let mut stats = BuildStats::default();
                stats.record_exception("driver_task_failed");
                Ok(stats)
            }
        }
    };

    let parts: Vec<BuildStats> = if opts.file_concurrency <= 1 {
        items.iter().map(run_one).collect::<Result<Vec<_>>>()?
    } else {
        let mut parts = Vec::with_capacity(items.len());
        for chunk in items.chunks(opts.file_concurrency) {
            parts.extend(chunk.par_iter().map(run_one).collect::<Result<Vec<_>>>()?);
        }
        parts
    };

    if let Some(p) = &progress {
        p.finish(format!("{label}: done"));
    }

    Ok(merge_all(parts))
}

/// Like [`run_build`] but for stages whose per-item result isn't a
/// [`BuildStats`] (e.g. sorted-entity-streams, which only ever
/// resumes-or-rebuilds one file per input with no exception bookkeeping of
/// its own). Always strict: these stages have nothing sensible to skip to.
pub fn for_each_build_one<T, U, F>(items: &[T], opts: &WikidatedOptions, label: &str, f: F) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Sync + Fn(&T) -> Result<U>,
{
    let progress = if opts.progress {
        Some(ProgressScope::count(label.to_string(), items.len() as u64))
    } else {
        None
    };
    let done = std::sync::atomic::AtomicU64::new(0);

    let run_one = |item: &T| -> Result<U> {
        let result = f(item);
        let n = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        if let Some(p) = &progress {
            p.set(n, items.len() as u64);
        }
        result
    };

    let results = if opts.file_concurrency <= 1 {
        items.iter().map(run_one).collect::<Result<Vec<_>>>()?
    } else {
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(opts.file_concurrency) {
            results.extend(chunk.par_iter().map(run_one).collect::<Result<Vec<_>>>()?);
        }
        results
    };

    if let Some(p) = &progress {
        p.finish(format!("{label}: done"));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_stats_across_items() {
        let opts = WikidatedOptions::new().file_concurrency(2).progress(false);
        let items = vec![1, 2, 3, 4, 5];
        let stats = run_build(&items, &opts, "test", |n| {
            let mut s = BuildStats::default();
            s.pages_processed = *n as u64;
            Ok(s)
        })
        .unwrap();
        assert_eq!(stats.pages_processed, 15);
    }

    #[test]
    fn strict_mode_aborts_on_first_error() {
        let opts = WikidatedOptions::new().file_concurrency(1).strict(true).progress(false);
        let items = vec![1, 2, 3];
        let result = run_build(&items, &opts, "test", |n| {
            if *n == 2 {
                anyhow::bail!("boom");
            }
            Ok(BuildStats::default())
        });
        assert!(result.is_err());
    }

    #[test]
    fn non_strict_mode_skips_failures() {
        let opts = WikidatedOptions::new().file_concurrency(1).strict(false).progress(false);
        let items = vec![1, 2, 3];
        let stats = run_build(&items, &opts, "test", |n| {
            if *n == 2 {
                anyhow::bail!("boom");
            }
            let mut s = BuildStats::default();
            s.pages_processed = 1;
            Ok(s)
        })
        .unwrap();
        assert_eq!(stats.pages_processed, 2);
        assert_eq!(stats.exceptions.get("driver_task_failed"), Some(&1));
    }
}
