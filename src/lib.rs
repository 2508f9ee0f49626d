mod box_model;
mod cascade;
mod config;
mod debug;
mod declaration;
mod error;
mod html;
mod metrics;
mod node;
mod parallel;
mod perf;
mod rule_index;
mod selector;
mod types;
mod typography;
mod units;

pub use box_model::{BorderEdge, BoxModel};
pub use cascade::{
    CascadeStats, INHERITED_PROPERTIES, NodeCascade, apply_cascade, apply_inheritance, cascade_node,
    initial_value, is_inherited, merge_declared,
};
pub use config::{ENV_DEBUG_PATH, ENV_MONITOR, ENV_PARALLEL, ENV_WORKERS, EngineConfig};
pub use declaration::{
    ParsedStylesheet, SkipReason, SkippedRule, SourceRule, expand_shorthand, media_applies,
    parse_inline, parse_stylesheet, static_selector,
};
pub use error::{Result, StyleError};
pub use html::{HtmlDocument, parse_document};
pub use metrics::{NodeTimings, PhaseTiming, StyleMetrics};
pub use node::{AttributeMap, ClassList, Node, NodeId, NodeKind, NodeRef, StyleMap, Tree};
pub use parallel::{Chunk, NodeKey, ParallelApplier, ParallelOutcome, ParallelPhase, ParallelResult, partition};
pub use perf::MetricsCollector;
pub use rule_index::{IndexStats, Origin, Rule, RuleId, RuleIndex, RuleSet};
pub use selector::{
    Combinator, ComplexSelector, CompoundSelector, SelectorList, Specificity, calculate_specificity,
    matches,
};
pub use types::{BoxSizingMode, Color, Edges, Pt};
pub use typography::{
    FontStyleMode, LineHeightSpec, TextAlignMode, TextDecorationMode, TextStyle, TextTransformMode,
    VerticalAlignMode, parse_font_family, parse_font_weight, parse_line_height, resolve_font_sizes,
};
pub use units::{
    BorderWidthProfile, DEFAULT_FONT_SIZE_PT, UnitContext, parse_color, resolve_border_width,
    resolve_font_size, resolve_length,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use debug::DebugLogger;
use perf::timed;

/// How the cascade ran for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleMode {
    Sequential,
    Parallel,
    /// Parallel, with chunks that missed the deadline recomputed in place.
    ParallelWithRecovery,
    /// A worker failed and the whole tree was recomputed sequentially.
    SequentialFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleReport {
    pub mode: StyleMode,
    pub rules: usize,
    pub nodes: usize,
    pub elements: usize,
    pub skipped_rules: usize,
    pub unparsed_selectors: usize,
    pub recomputed_chunks: usize,
    pub index_cache_hit: bool,
    pub fallback_reason: Option<String>,
    pub metrics: Option<StyleMetrics>,
}

/// A styled tree with its per-node annexes. Read-only once built.
#[derive(Debug, Clone)]
pub struct StyledDocument {
    tree: Tree,
    font_sizes: Vec<Pt>,
    boxes: Vec<Option<BoxModel>>,
    text: Vec<TextStyle>,
    report: StyleReport,
}

impl StyledDocument {
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn computed(&self, id: NodeId) -> &StyleMap {
        self.tree.node(id).computed()
    }

    pub fn computed_value(&self, id: NodeId, property: &str) -> Option<&str> {
        self.computed(id).get(property).map(String::as_str)
    }

    /// `None` for text nodes.
    pub fn box_model(&self, id: NodeId) -> Option<&BoxModel> {
        self.boxes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn text_style(&self, id: NodeId) -> Option<&TextStyle> {
        self.text.get(id.index())
    }

    pub fn font_size(&self, id: NodeId) -> Pt {
        self.font_sizes
            .get(id.index())
            .copied()
            .unwrap_or(Pt::from_f32(DEFAULT_FONT_SIZE_PT))
    }

    pub fn report(&self) -> &StyleReport {
        &self.report
    }

    pub fn into_tree(self) -> Tree {
        self.tree
    }
}

pub struct StyleEngine {
    config: EngineConfig,
    debug: Option<DebugLogger>,
    index_cache: Mutex<HashMap<[u8; 32], Arc<RuleIndex>>>,
}

impl StyleEngine {
    pub fn builder() -> StyleEngineBuilder {
        StyleEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parses stylesheets in order into one ruleset, after the user-agent
    /// defaults when those are enabled.
    pub fn compile<'a>(&self, stylesheets: impl IntoIterator<Item = &'a str>) -> RuleSet {
        let mut rules = if self.config.user_agent_defaults {
            RuleSet::with_user_agent_defaults()
        } else {
            RuleSet::new()
        };
        for css in stylesheets {
            rules.add_stylesheet_with(css, Origin::Author, self.debug.as_ref());
        }
        rules
    }

    /// Parses markup and styles it with its `<style>` blocks followed by
    /// `extra_css`.
    pub fn style_html(&self, html: &str, extra_css: &str) -> StyledDocument {
        let metrics = self.new_metrics();
        let (doc, rules) = timed(metrics.as_ref(), "parse", || {
            let doc = parse_document(html);
            let sheets = doc
                .stylesheets
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(extra_css));
            let rules = self.compile(sheets);
            (doc, rules)
        });
        self.run(doc.tree, &rules, metrics)
    }

    pub fn style_tree<'a>(&self, tree: Tree, stylesheets: impl IntoIterator<Item = &'a str>) -> StyledDocument {
        let metrics = self.new_metrics();
        let rules = timed(metrics.as_ref(), "parse", || self.compile(stylesheets));
        self.run(tree, &rules, metrics)
    }

    /// Styles `tree` with an already compiled ruleset.
    pub fn style_with_rules(&self, tree: Tree, rules: &RuleSet) -> StyledDocument {
        self.run(tree, rules, self.new_metrics())
    }

    /// Number of distinct rulesets with a cached index.
    pub fn cached_indexes(&self) -> usize {
        self.index_cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn new_metrics(&self) -> Option<MetricsCollector> {
        if !self.config.metrics {
            return None;
        }
        let Some(path) = self.config.metrics_path.as_ref() else {
            return Some(MetricsCollector::new());
        };
        match MetricsCollector::with_output(path) {
            Ok(collector) => Some(collector),
            Err(err) => {
                log::warn!("metrics output {} unavailable: {err}", path.display());
                Some(MetricsCollector::new())
            }
        }
    }

    fn index_for(&self, rules: &RuleSet) -> (Arc<RuleIndex>, bool) {
        let key = rules.fingerprint();
        let Ok(mut cache) = self.index_cache.lock() else {
            return (Arc::new(RuleIndex::build(rules)), false);
        };
        if let Some(index) = cache.get(&key) {
            return (Arc::clone(index), true);
        }
        let index = Arc::new(RuleIndex::build(rules));
        cache.insert(key, Arc::clone(&index));
        (index, false)
    }

    fn run(&self, mut tree: Tree, rules: &RuleSet, metrics: Option<MetricsCollector>) -> StyledDocument {
        let started = Instant::now();
        let metrics_ref = metrics.as_ref();
        let debug = self.debug.as_ref();
        log::info!("style pass: {} nodes, {} rules", tree.len(), rules.len());

        let (index, index_cache_hit) = timed(metrics_ref, "index", || self.index_for(rules));

        let use_parallel = self.config.parallel && tree.len() >= self.config.min_nodes_for_parallel;
        let mut mode = StyleMode::Sequential;
        let mut recomputed_chunks = 0usize;
        let mut fallback_reason = None;
        let stats = if use_parallel {
            let mut applier = ParallelApplier::new(self.config.workers, self.config.chunk_timeout)
                .with_metrics(metrics.clone());
            let result = applier.apply_with(&mut tree, rules, Some(&index), debug);
            match result.outcome {
                ParallelOutcome::Parallel => mode = StyleMode::Parallel,
                ParallelOutcome::Recovered { recomputed_chunks: n } => {
                    mode = StyleMode::ParallelWithRecovery;
                    recomputed_chunks = n;
                }
                ParallelOutcome::Fallback { reason } => {
                    mode = StyleMode::SequentialFallback;
                    fallback_reason = Some(reason);
                }
            }
            result.stats
        } else {
            timed(metrics_ref, "cascade", || {
                cascade::apply_cascade_with(&mut tree, rules, &index, metrics_ref, debug)
            })
        };

        timed(metrics_ref, "inheritance", || apply_inheritance(&mut tree));

        let font_sizes = resolve_font_sizes(&tree);
        let boxes = timed(metrics_ref, "box_model", || self.resolve_boxes(&tree, &font_sizes));
        let text = timed(metrics_ref, "typography", || {
            tree.ids()
                .map(|id| TextStyle::resolve(tree.node(id).computed(), font_sizes[id.index()]))
                .collect::<Vec<_>>()
        });

        if let Some(metrics) = metrics_ref {
            metrics.add_count("rules", rules.len() as u64);
            metrics.add_count("nodes", stats.nodes as u64);
            metrics.add_count("candidates", stats.candidates as u64);
            metrics.add_count("matches", stats.matches as u64);
            metrics.add_count("index.cache_hits", u64::from(index_cache_hit));
            metrics.add_count("fallbacks", u64::from(mode == StyleMode::SequentialFallback));
            metrics.flush();
        }
        if let Some(debug) = debug {
            debug.increment("style.nodes", stats.nodes as u64);
            debug.emit_summary("style");
            debug.flush();
        }

        log::info!(
            "style pass done in {:.2?}: {:?}, {} elements, {} matches",
            started.elapsed(),
            mode,
            stats.elements,
            stats.matches
        );

        let report = StyleReport {
            mode,
            rules: rules.len(),
            nodes: stats.nodes,
            elements: stats.elements,
            skipped_rules: rules.skipped().len(),
            unparsed_selectors: rules.unparsed_selectors(),
            recomputed_chunks,
            index_cache_hit,
            fallback_reason,
            metrics: metrics.as_ref().map(MetricsCollector::snapshot),
        };
        StyledDocument {
            tree,
            font_sizes,
            boxes,
            text,
            report,
        }
    }

    fn resolve_boxes(&self, tree: &Tree, font_sizes: &[Pt]) -> Vec<Option<BoxModel>> {
        let default = Pt::from_f32(DEFAULT_FONT_SIZE_PT);
        let root_size = tree.root().map(|root| font_sizes[root.index()]).unwrap_or(default);
        let mut ctx = UnitContext::new().with_root_font_size(root_size);
        ctx.percentage_base = self.config.percentage_base.map(Pt::from_f32);
        tree.ids()
            .map(|id| {
                let node = tree.node(id);
                if !node.is_element() {
                    return None;
                }
                let parent_size = node.parent().map(|p| font_sizes[p.index()]).unwrap_or(default);
                let ctx = ctx.with_parent_font_size(parent_size);
                Some(BoxModel::resolve(node.computed(), &ctx, self.config.border_width_profile))
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct StyleEngineBuilder {
    config: EngineConfig,
}

impl StyleEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn from_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Starts from [`EngineConfig::from_env`].
    pub fn from_env() -> Self {
        Self::from_config(EngineConfig::from_env())
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.config.parallel = enabled;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.metrics = enabled;
        self
    }

    pub fn min_nodes_for_parallel(mut self, nodes: usize) -> Self {
        self.config.min_nodes_for_parallel = nodes;
        self
    }

    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.config.chunk_timeout = timeout;
        self
    }

    // Percentages resolve to zero unless a base is set.
    pub fn percentage_base(mut self, points: f32) -> Self {
        self.config.percentage_base = Some(points);
        self
    }

    pub fn border_width_profile(mut self, profile: BorderWidthProfile) -> Self {
        self.config.border_width_profile = profile;
        self
    }

    pub fn user_agent_defaults(mut self, enabled: bool) -> Self {
        self.config.user_agent_defaults = enabled;
        self
    }

    pub fn debug_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.debug_path = Some(path.into());
        self
    }

    /// Implies `metrics(true)`.
    pub fn metrics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metrics_path = Some(path.into());
        self.config.metrics = true;
        self
    }

    pub fn build(self) -> Result<StyleEngine> {
        self.config.validate()?;
        let debug = match self.config.debug_path.as_ref() {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        Ok(StyleEngine {
            config: self.config,
            debug,
            index_cache: Mutex::new(HashMap::new()),
        })
    }
}

impl Default for StyleEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    const PAGE: &str = r#"<!doctype html>
<html><head><style>
  body { font-family: "Times New Roman", serif; color: #222; font-size: 16px }
  div { color: red; margin: 10px 20px }
  .x { color: blue; border: 1px solid currentcolor }
  table td { padding: 4px }
  a:hover { color: orange }
</style></head>
<body>
  <div class="x" id="blue">one</div>
  <div class="x" id="green" style="color: green">two</div>
  <table><tr><td id="cell">cell</td></tr></table>
</body></html>"#;

    fn engine() -> StyleEngine {
        StyleEngine::builder().parallel(false).build().expect("engine")
    }

    fn by_id(doc: &StyledDocument, id: &str) -> NodeId {
        doc.tree()
            .elements()
            .into_iter()
            .find(|node| doc.tree().get(*node).element_id() == Some(id))
            .expect("element with id")
    }

    fn temp_path(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("docstyle_{name}_{}_{stamp}.jsonl", std::process::id()))
    }

    #[test]
    fn class_beats_type_and_inline_beats_everything() {
        let doc = engine().style_html(PAGE, "");
        assert_eq!(doc.computed_value(by_id(&doc, "blue"), "color"), Some("blue"));
        assert_eq!(doc.computed_value(by_id(&doc, "green"), "color"), Some("green"));
        assert_eq!(doc.report().mode, StyleMode::Sequential);
        assert_eq!(doc.report().skipped_rules, 1);
    }

    #[test]
    fn annexes_are_attached() {
        let doc = engine().style_html(PAGE, "");
        let blue = by_id(&doc, "blue");
        let model = doc.box_model(blue).expect("box");
        assert_eq!(model.margin.top, Pt::from_f32(7.5));
        assert_eq!(model.margin.left, Pt::from_f32(15.0));
        assert!(model.has_border());
        assert_eq!(model.border.top.color.to_hex(), "#0000ff");

        let text = doc.text_style(blue).expect("text");
        assert_eq!(text.font_family, vec!["Times New Roman", "serif"]);
        assert_eq!(text.font_size, Pt::from_f32(12.0));
        assert_eq!(doc.font_size(blue), Pt::from_f32(12.0));

        let cell = by_id(&doc, "cell");
        assert_eq!(doc.box_model(cell).unwrap().padding.left, Pt::from_f32(3.0));
        assert_eq!(doc.computed_value(cell, "color"), Some("#222"));

        let text_node = doc.tree().get(blue).children().next().unwrap().id();
        assert!(doc.box_model(text_node).is_none());
        assert_eq!(doc.computed(text_node), doc.computed(blue));
    }

    #[test]
    fn extra_css_comes_after_style_blocks() {
        let doc = engine().style_html(PAGE, ".x { color: black }");
        assert_eq!(doc.computed_value(by_id(&doc, "blue"), "color"), Some("black"));
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mut html = String::from("<html><body>");
        for i in 0..40 {
            html.push_str(&format!(
                "<section class=\"s{}\"><div class=\"x\">a</div><p>b <span>c</span></p></section>",
                i % 3
            ));
        }
        html.push_str("</body></html>");
        let css = ".s1 > div { color: blue } section p span { font-weight: bold } div + p { margin: 1pt }";

        let sequential = engine().style_html(&html, css);
        let parallel = StyleEngine::builder()
            .workers(3)
            .min_nodes_for_parallel(1)
            .build()
            .expect("engine")
            .style_html(&html, css);
        assert_eq!(parallel.report().mode, StyleMode::Parallel);
        for id in sequential.tree().preorder() {
            assert_eq!(sequential.computed(id), parallel.computed(id));
            assert_eq!(sequential.box_model(id), parallel.box_model(id));
        }
    }

    #[test]
    fn small_trees_stay_sequential() {
        let engine = StyleEngine::builder().min_nodes_for_parallel(10_000).build().expect("engine");
        let doc = engine.style_html(PAGE, "");
        assert_eq!(doc.report().mode, StyleMode::Sequential);
    }

    #[test]
    fn index_is_cached_per_ruleset() {
        let engine = engine();
        let first = engine.style_html(PAGE, "");
        let second = engine.style_html(PAGE, "");
        let other = engine.style_html(PAGE, "p { color: red }");
        assert!(!first.report().index_cache_hit);
        assert!(second.report().index_cache_hit);
        assert!(!other.report().index_cache_hit);
        assert_eq!(engine.cached_indexes(), 2);
    }

    #[test]
    fn user_agent_defaults_lose_to_author_rules() {
        let engine = StyleEngine::builder()
            .parallel(false)
            .user_agent_defaults(true)
            .build()
            .expect("engine");
        let doc = engine.style_html(
            "<html><body><h1>Title</h1><h2 class=plain>Sub</h2></body></html>",
            ".plain { font-weight: normal }",
        );
        let h1 = doc.tree().find_by_tag("h1")[0];
        let h2 = doc.tree().find_by_tag("h2")[0];
        assert_eq!(doc.computed_value(h1, "font-weight"), Some("bold"));
        assert_eq!(doc.computed_value(h2, "font-weight"), Some("normal"));
        assert_eq!(doc.font_size(h1), Pt::from_f32(24.0));
    }

    #[test]
    fn metrics_are_observational() {
        let plain = engine().style_html(PAGE, "");
        let measured = StyleEngine::builder()
            .parallel(false)
            .metrics(true)
            .build()
            .expect("engine")
            .style_html(PAGE, "");
        let metrics = measured.report().metrics.as_ref().expect("metrics");
        for phase in ["parse", "index", "cascade", "inheritance", "box_model", "typography"] {
            assert!(metrics.phase_ms(phase).is_some(), "missing phase {phase}");
        }
        assert_eq!(metrics.nodes.count as usize, measured.tree().len());
        assert_eq!(metrics.counter("rules"), 4);
        assert!(plain.report().metrics.is_none());
        for id in plain.tree().preorder() {
            assert_eq!(plain.computed(id), measured.computed(id));
        }
    }

    #[test]
    fn builder_validates() {
        assert!(matches!(
            StyleEngine::builder().workers(0).build(),
            Err(StyleError::InvalidConfiguration(_))
        ));
        assert!(StyleEngine::builder().chunk_timeout(Duration::ZERO).build().is_err());
        assert!(matches!(
            StyleEngine::builder().debug_path("/nonexistent-dir/docstyle/debug.jsonl").build(),
            Err(StyleError::Io(_))
        ));
    }

    #[test]
    fn debug_trace_records_rules_and_nodes() {
        let path = temp_path("debug");
        let engine = StyleEngine::builder()
            .parallel(false)
            .debug_path(&path)
            .build()
            .expect("engine");
        engine.style_html(PAGE, "");
        let trace = std::fs::read_to_string(&path).expect("trace");
        let _ = std::fs::remove_file(&path);
        assert!(trace.contains("\"type\":\"css.rule\""));
        assert!(trace.contains("\"type\":\"css.rule_skipped\""));
        assert!(trace.contains("\"type\":\"cascade.node\""));
        assert!(trace.contains("\"type\":\"debug.summary\""));
    }

    #[test]
    fn percentage_base_applies_to_boxes() {
        let engine = StyleEngine::builder()
            .parallel(false)
            .percentage_base(400.0)
            .build()
            .expect("engine");
        let doc = engine.style_html("<html><body><div style=\"width: 25%\">x</div></body></html>", "");
        let div = doc.tree().find_by_tag("div")[0];
        assert_eq!(doc.box_model(div).unwrap().width, Some(Pt::from_f32(100.0)));
    }
}
