//! Chunked cascade application on a rayon pool.
//!
//! The tree is only read while workers run. Results are merged on the
//! calling thread in chunk order, so the outcome is identical to the
//! sequential pass whatever the scheduling.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::cascade::{CascadeStats, MatchBatch, apply_cascade_with, cascade_node, merge_results};
use crate::debug::DebugLogger;
use crate::error::StyleError;
use crate::node::{NodeId, Tree};
use crate::perf::{MetricsCollector, timed};
use crate::rule_index::{RuleIndex, RuleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelPhase {
    Idle,
    Indexing,
    Partitioning,
    Dispatch,
    Collect,
    Merge,
    Done,
}

/// How a parallel run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParallelOutcome {
    /// Every chunk came back from the pool.
    Parallel,
    /// The collection deadline passed; missing chunks were recomputed on the
    /// calling thread.
    Recovered { recomputed_chunks: usize },
    /// A worker failed and the whole tree was recomputed sequentially.
    Fallback { reason: String },
}

/// A node with its path, which stays stable across runs on the same tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKey {
    pub id: NodeId,
    pub path: String,
}

/// A contiguous, document-ordered slice of nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub keys: Vec<NodeKey>,
}

/// Everything a worker needs for one chunk. All of it is read-only.
pub(crate) struct ChunkJob<'a> {
    pub tree: &'a Tree,
    pub rules: &'a RuleSet,
    pub index: &'a RuleIndex,
    pub chunk: &'a Chunk,
    pub cancel: &'a AtomicBool,
    pub time_nodes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelResult {
    pub outcome: ParallelOutcome,
    pub stats: CascadeStats,
    pub chunks: usize,
}

/// Splits `ids` into at most `count` contiguous chunks whose sizes differ by
/// at most one. Order is preserved within and across chunks.
pub fn partition(tree: &Tree, ids: &[NodeId], count: usize) -> Vec<Chunk> {
    if ids.is_empty() {
        return Vec::new();
    }
    let count = count.clamp(1, ids.len());
    let base = ids.len() / count;
    let extra = ids.len() % count;
    let paths = tree.paths();
    let mut chunks = Vec::with_capacity(count);
    let mut start = 0usize;
    for index in 0..count {
        let len = base + usize::from(index < extra);
        let keys = ids[start..start + len]
            .iter()
            .map(|&id| NodeKey {
                id,
                path: paths[id.index()].clone(),
            })
            .collect();
        chunks.push(Chunk { index, keys });
        start += len;
    }
    chunks
}

/// Matches every node of a chunk. Returns `None` when cancelled part way.
pub(crate) fn match_chunk(job: ChunkJob<'_>) -> Option<MatchBatch> {
    let mut batch = MatchBatch {
        results: Vec::with_capacity(job.chunk.keys.len()),
        ..MatchBatch::default()
    };
    for key in &job.chunk.keys {
        if job.cancel.load(Ordering::Relaxed) {
            return None;
        }
        let start = job.time_nodes.then(Instant::now);
        let cascade = cascade_node(job.rules, job.index, job.tree.get(key.id), &mut batch.stats);
        if let Some(start) = start {
            batch.timings.record(start.elapsed().as_secs_f64() * 1000.0);
        }
        batch.results.push((key.id, cascade));
    }
    Some(batch)
}

struct Collected {
    batches: BTreeMap<usize, MatchBatch>,
    failure: Option<StyleError>,
    timed_out: bool,
}

/// Drives the Idle → Indexing → Partitioning → Dispatch → Collect → Merge →
/// Done sequence for one tree.
pub struct ParallelApplier {
    workers: usize,
    chunk_timeout: Duration,
    metrics: Option<MetricsCollector>,
    phase: ParallelPhase,
}

impl ParallelApplier {
    pub fn new(workers: usize, chunk_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            chunk_timeout,
            metrics: None,
            phase: ParallelPhase::Idle,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn phase(&self) -> ParallelPhase {
        self.phase
    }

    /// Applies the cascade to `tree`. `index` is built here when not given.
    pub fn apply(&mut self, tree: &mut Tree, rules: &RuleSet, index: Option<&RuleIndex>) -> ParallelResult {
        self.apply_with(tree, rules, index, None)
    }

    pub(crate) fn apply_with(
        &mut self,
        tree: &mut Tree,
        rules: &RuleSet,
        index: Option<&RuleIndex>,
        debug: Option<&DebugLogger>,
    ) -> ParallelResult {
        self.run(tree, rules, index, debug, &match_chunk)
    }

    fn enter(&mut self, phase: ParallelPhase) {
        log::debug!("parallel cascade: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn run<W>(
        &mut self,
        tree: &mut Tree,
        rules: &RuleSet,
        index: Option<&RuleIndex>,
        debug: Option<&DebugLogger>,
        work: &W,
    ) -> ParallelResult
    where
        W: Fn(ChunkJob<'_>) -> Option<MatchBatch> + Sync,
    {
        let metrics = self.metrics.clone();
        let metrics = metrics.as_ref();

        self.enter(ParallelPhase::Indexing);
        let built;
        let index = match index {
            Some(index) => index,
            None => {
                built = timed(metrics, "index", || RuleIndex::build(rules));
                &built
            }
        };

        self.enter(ParallelPhase::Partitioning);
        let chunks = timed(metrics, "parallel.partition", || {
            partition(tree, &tree.preorder(), self.workers)
        });

        self.enter(ParallelPhase::Dispatch);
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("docstyle-cascade-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                let err = StyleError::Worker(format!("thread pool: {err}"));
                return self.fall_back(tree, rules, index, debug, chunks.len(), err);
            }
        };
        let time_nodes = metrics.is_some();
        let collected = {
            let view: &Tree = tree;
            let timeout = self.chunk_timeout;
            self.enter(ParallelPhase::Collect);
            timed(metrics, "parallel.collect", || {
                dispatch(&pool, &chunks, timeout, |chunk, cancel| {
                    work(ChunkJob {
                        tree: view,
                        rules,
                        index,
                        chunk,
                        cancel,
                        time_nodes,
                    })
                })
            })
        };

        if let Some(err) = collected.failure {
            return self.fall_back(tree, rules, index, debug, chunks.len(), err);
        }

        let mut batches = collected.batches;
        let mut outcome = ParallelOutcome::Parallel;
        if collected.timed_out {
            let missing: Vec<&Chunk> = chunks
                .iter()
                .filter(|chunk| !batches.contains_key(&chunk.index))
                .collect();
            let err = StyleError::Timeout {
                pending: missing.len(),
                total: chunks.len(),
            };
            log::warn!("{err}; recomputing missing chunks sequentially");
            if let Some(debug) = debug {
                debug.log_json(&format!(
                    "{{\"type\":\"parallel.timeout\",\"pending\":{},\"total\":{}}}",
                    missing.len(),
                    chunks.len()
                ));
            }
            if let Some(metrics) = metrics {
                metrics.add_count("parallel.recomputed_chunks", missing.len() as u64);
            }
            let idle = AtomicBool::new(false);
            for chunk in &missing {
                let job = ChunkJob {
                    tree,
                    rules,
                    index,
                    chunk,
                    cancel: &idle,
                    time_nodes,
                };
                if let Some(batch) = match_chunk(job) {
                    batches.insert(chunk.index, batch);
                }
            }
            outcome = ParallelOutcome::Recovered {
                recomputed_chunks: missing.len(),
            };
        }

        self.enter(ParallelPhase::Merge);
        let mut stats = CascadeStats::default();
        timed(metrics, "parallel.merge", || {
            for (_, batch) in batches {
                stats.absorb(&batch.stats);
                if let Some(metrics) = metrics {
                    metrics.record_nodes(&batch.timings);
                }
                merge_results(tree, batch.results, debug);
            }
        });

        self.enter(ParallelPhase::Done);
        ParallelResult {
            outcome,
            stats,
            chunks: chunks.len(),
        }
    }

    fn fall_back(
        &mut self,
        tree: &mut Tree,
        rules: &RuleSet,
        index: &RuleIndex,
        debug: Option<&DebugLogger>,
        chunks: usize,
        err: StyleError,
    ) -> ParallelResult {
        log::warn!("parallel cascade failed ({err}); recomputing the whole tree sequentially");
        if let Some(debug) = debug {
            debug.log_json(&format!(
                "{{\"type\":\"parallel.fallback\",\"reason\":\"{}\"}}",
                crate::debug::json_escape(&err.to_string())
            ));
        }
        let metrics = self.metrics.clone();
        if let Some(metrics) = metrics.as_ref() {
            metrics.add_count("parallel.fallbacks", 1);
        }
        self.enter(ParallelPhase::Merge);
        let stats = timed(metrics.as_ref(), "cascade", || {
            apply_cascade_with(tree, rules, index, metrics.as_ref(), debug)
        });
        self.enter(ParallelPhase::Done);
        ParallelResult {
            outcome: ParallelOutcome::Fallback {
                reason: err.to_string(),
            },
            stats,
            chunks,
        }
    }
}

type ChunkMessage = (usize, Result<MatchBatch, StyleError>);

/// Runs `work` for every chunk on `pool` and gathers results until all are
/// in, one fails, or `timeout` passes. Cancelled chunks send nothing.
fn dispatch<F>(pool: &rayon::ThreadPool, chunks: &[Chunk], timeout: Duration, work: F) -> Collected
where
    F: Fn(&Chunk, &AtomicBool) -> Option<MatchBatch> + Sync,
{
    let (tx, rx) = mpsc::channel::<ChunkMessage>();
    let cancel = AtomicBool::new(false);
    let mut collected = Collected {
        batches: BTreeMap::new(),
        failure: None,
        timed_out: false,
    };

    thread::scope(|scope| {
        // Dropped at the end of this closure, before the scope joins, so late
        // senders see a closed channel.
        let rx = rx;
        let cancel = &cancel;
        let work = &work;

        scope.spawn(move || {
            pool.install(|| {
                chunks.par_iter().for_each_with(tx, |tx, chunk| {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let message = match panic::catch_unwind(AssertUnwindSafe(|| work(chunk, cancel))) {
                        Ok(Some(batch)) => Ok(batch),
                        Ok(None) => return,
                        Err(payload) => Err(StyleError::Worker(format!(
                            "chunk {} panicked: {}",
                            chunk.index,
                            panic_message(payload.as_ref())
                        ))),
                    };
                    let _ = tx.send((chunk.index, message));
                });
            });
        });

        let deadline = Instant::now() + timeout;
        while collected.batches.len() < chunks.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((index, Ok(batch))) => {
                    collected.batches.insert(index, batch);
                }
                Ok((_, Err(err))) => {
                    collected.failure = Some(err);
                    cancel.store(true, Ordering::Relaxed);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    collected.timed_out = true;
                    cancel.store(true, Ordering::Relaxed);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    collected.failure = Some(StyleError::Worker(format!(
                        "workers stopped after {} of {} chunks",
                        collected.batches.len(),
                        chunks.len()
                    )));
                    break;
                }
            }
        }
    });
    collected
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{apply_cascade, apply_inheritance};
    use crate::rule_index::Origin;

    const CSS: &str = r#"
        div { color: red; padding: 1px }
        .note { color: blue }
        section > div + div { margin-top: 4px }
        #special { color: green }
        li:nth-child(odd) { background: #eee }
        ul li.item ~ li { font-weight: bold }
        [data-k] { text-align: center }
        * { line-height: 1.4 }
    "#;

    fn build_tree() -> Tree {
        let mut tree = Tree::new();
        let html = tree.add_element(None, "html");
        let body = tree.add_element(Some(html), "body");
        for s in 0..6 {
            let section = tree.add_element(Some(body), "section");
            for d in 0..5 {
                let div = tree.add_element(Some(section), "div");
                if d % 2 == 0 {
                    tree.set_attribute(div, "class", "note");
                }
                if s == 3 && d == 1 {
                    tree.set_attribute(div, "id", "special");
                    tree.set_attribute(div, "style", "color: purple");
                }
                tree.add_text(div, "text");
            }
            let list = tree.add_element(Some(section), "ul");
            for i in 0..4 {
                let li = tree.add_element(Some(list), "li");
                if i == 1 {
                    tree.set_attribute(li, "class", "item");
                }
                if i == 3 {
                    tree.set_attribute(li, "data-k", "v");
                }
            }
        }
        tree
    }

    fn rules() -> RuleSet {
        let mut rules = RuleSet::new();
        rules.add_stylesheet(CSS, Origin::Author);
        rules
    }

    fn snapshot(tree: &Tree) -> Vec<(String, Vec<(String, String)>)> {
        tree.preorder()
            .into_iter()
            .map(|id| {
                let node = tree.node(id);
                let mut entries: Vec<(String, String)> = node
                    .computed()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                entries.extend(node.declared().iter().map(|(k, v)| (format!("declared:{k}"), v.clone())));
                (tree.get(id).path(), entries)
            })
            .collect()
    }

    fn sequential() -> Vec<(String, Vec<(String, String)>)> {
        let mut tree = build_tree();
        let rules = rules();
        let index = RuleIndex::build(&rules);
        apply_cascade(&mut tree, &rules, &index, None);
        apply_inheritance(&mut tree);
        snapshot(&tree)
    }

    #[test]
    fn partition_is_balanced_and_ordered() {
        let tree = build_tree();
        let ids = tree.preorder();
        let chunks = partition(&tree, &ids, 4);
        assert_eq!(chunks.len(), 4);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.keys.len()).collect();
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
        let flat: Vec<NodeId> = chunks.iter().flat_map(|c| c.keys.iter().map(|k| k.id)).collect();
        assert_eq!(flat, ids);
        assert_eq!(chunks[0].keys[0].path, "/html");
        assert!(partition(&tree, &[], 4).is_empty());
        assert_eq!(partition(&tree, &ids[..2], 8).len(), 2);
    }

    #[test]
    fn parallel_matches_sequential() {
        let expected = sequential();
        for workers in [1, 2, 3, 7] {
            let mut tree = build_tree();
            let rules = rules();
            let mut applier = ParallelApplier::new(workers, Duration::from_secs(30));
            let result = applier.apply(&mut tree, &rules, None);
            apply_inheritance(&mut tree);
            assert_eq!(result.outcome, ParallelOutcome::Parallel);
            assert_eq!(applier.phase(), ParallelPhase::Done);
            assert_eq!(snapshot(&tree), expected, "workers={workers}");
        }
    }

    #[test]
    fn inline_declarations_survive_parallel_merge() {
        let mut tree = build_tree();
        let rules = rules();
        ParallelApplier::new(3, Duration::from_secs(30)).apply(&mut tree, &rules, None);
        let special = tree
            .elements()
            .into_iter()
            .find(|id| tree.get(*id).element_id() == Some("special"))
            .unwrap();
        assert_eq!(tree.node(special).declared().get("color").map(String::as_str), Some("purple"));
    }

    #[test]
    fn worker_panic_falls_back_to_sequential() {
        let expected = sequential();
        let mut tree = build_tree();
        let rules = rules();
        let mut applier = ParallelApplier::new(4, Duration::from_secs(30));
        let result = applier.run(&mut tree, &rules, None, None, &|job: ChunkJob<'_>| {
            if job.chunk.index == 1 {
                panic!("injected failure");
            }
            match_chunk(job)
        });
        apply_inheritance(&mut tree);
        match &result.outcome {
            ParallelOutcome::Fallback { reason } => assert!(reason.contains("injected failure")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(snapshot(&tree), expected);
    }

    #[test]
    fn timeout_recomputes_missing_chunks() {
        let expected = sequential();
        let mut tree = build_tree();
        let rules = rules();
        let metrics = MetricsCollector::new();
        let mut applier =
            ParallelApplier::new(2, Duration::from_millis(100)).with_metrics(Some(metrics.clone()));
        let result = applier.run(&mut tree, &rules, None, None, &|job: ChunkJob<'_>| {
            if job.chunk.index == 0 {
                thread::sleep(Duration::from_millis(400));
            }
            match_chunk(job)
        });
        apply_inheritance(&mut tree);
        match result.outcome {
            ParallelOutcome::Recovered { recomputed_chunks } => assert!(recomputed_chunks >= 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(snapshot(&tree), expected);
        assert!(metrics.snapshot().counter("parallel.recomputed_chunks") >= 1);
    }

    #[test]
    fn stats_cover_every_node() {
        let mut tree = build_tree();
        let rules = rules();
        let result = ParallelApplier::new(3, Duration::from_secs(30)).apply(&mut tree, &rules, None);
        assert_eq!(result.stats.nodes, tree.len());
        assert_eq!(result.chunks, 3);
    }
}
