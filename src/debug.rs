use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::selector::Specificity;

/// JSONL trace of cascade decisions. One object per line.
#[derive(Clone)]
pub(crate) struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: BufWriter<File>,
    counters: BTreeMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: BufWriter::new(file),
                counters: BTreeMap::new(),
            })),
        })
    }

    pub fn log_json(&self, json: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn log_rule(&self, selector: &str, parsed: bool, specificity: Specificity) {
        self.log_json(&format!(
            "{{\"type\":\"css.rule\",\"selector\":\"{}\",\"parsed\":{},\"specificity\":[{},{},{}]}}",
            json_escape(selector),
            parsed,
            specificity.0,
            specificity.1,
            specificity.2
        ));
        if !parsed {
            self.increment("css.selector_unparsed", 1);
        }
    }

    pub fn log_skipped_rule(&self, prelude: &str, reason: &str) {
        self.log_json(&format!(
            "{{\"type\":\"css.rule_skipped\",\"prelude\":\"{}\",\"reason\":\"{}\"}}",
            json_escape(prelude),
            json_escape(reason)
        ));
        self.increment("css.rule_skipped", 1);
    }

    pub fn log_node_matches(&self, path: &str, rule_ids: &[usize]) {
        let ids: Vec<String> = rule_ids.iter().map(|id| id.to_string()).collect();
        self.log_json(&format!(
            "{{\"type\":\"cascade.node\",\"path\":\"{}\",\"rules\":[{}]}}",
            json_escape(path),
            ids.join(",")
        ));
        self.increment("cascade.matches", rule_ids.len() as u64);
    }

    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let counters = std::mem::take(&mut state.counters);
            let counts: Vec<String> = counters
                .iter()
                .map(|(key, value)| format!("\"{}\":{}", json_escape(key), value))
                .collect();
            let json = format!(
                "{{\"type\":\"debug.summary\",\"context\":\"{}\",\"counts\":{{{}}}}}",
                json_escape(context),
                counts.join(",")
            );
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(ch),
        }
    }
    out
}
