//! Folded-stack encoding for flame graph renderers.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, HashMap};

use crate::Sample;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlameGraphLine {
    pub command: String,
    /// `command;root;...;leaf`.
    pub stack: String,
    pub count: u64,
}

/// Folds samples into one line per distinct stack, root first.
///
/// Lines are ordered by count descending, then by stack.
pub fn fold_samples(samples: &[Sample]) -> Vec<FlameGraphLine> {
    let mut stacks = HashMap::<String, (&str, u64)>::new();
    for sample in samples {
        let mut key = sample.command.clone();
        for frame in sample.frames.iter().rev() {
            key.push(';');
            key.push_str(frame);
        }
        stacks.entry(key).or_insert((sample.command.as_str(), 0)).1 += 1;
    }

    let mut lines: Vec<FlameGraphLine> = stacks
        .into_iter()
        .map(|(stack, (command, count))| FlameGraphLine {
            command: command.to_string(),
            stack,
            count,
        })
        .collect();
    lines.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.stack.cmp(&b.stack)));
    lines
}

/// Renders the classic `stack count` text consumed by `flamegraph.pl` and inferno.
pub fn to_folded_text(lines: &[FlameGraphLine]) -> String {
    if lines.is_empty() {
        return "# empty profile: no samples captured".to_string();
    }
    let mut out = String::new();
    for line in lines {
        out.push_str(&format!("{} {}\n", line.stack, line.count));
    }
    out.trim_end().to_string()
}

pub fn to_speedscope(name: &str, lines: &[FlameGraphLine]) -> serde_json::Value {
    let mut frames: Vec<serde_json::Value> = vec![];
    let mut frame_index = BTreeMap::<String, usize>::new();
    let mut samples = Vec::<Vec<usize>>::new();
    let mut weights = Vec::<u64>::new();

    for line in lines {
        let mut stack = Vec::<usize>::new();
        for frame in line.stack.split(';') {
            let idx = if let Some(i) = frame_index.get(frame) {
                *i
            } else {
                let i = frames.len();
                frames.push(serde_json::json!({"name": frame}));
                frame_index.insert(frame.to_string(), i);
                i
            };
            stack.push(idx);
        }
        samples.push(stack);
        weights.push(line.count);
    }

    serde_json::json!({
        "$schema": "https://www.speedscope.app/file-format-schema.json",
        "shared": {"frames": frames},
        "profiles": [{
            "type": "sampled",
            "name": name,
            "unit": "none",
            "startValue": 0,
            "endValue": weights.iter().copied().sum::<u64>(),
            "samples": samples,
            "weights": weights,
        }],
        "activeProfileIndex": 0,
        "exporter": "perfscope",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(command: &str, frames: &[&str]) -> Sample {
        Sample {
            command: command.to_string(),
            pid: 100,
            timestamp: "1.0".to_string(),
            frames: frames.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn identical_stacks_merge_root_first() {
        let samples = vec![sample("cmdA", &["foo", "bar"]), sample("cmdA", &["foo", "bar"])];
        let lines = fold_samples(&samples);
        assert_eq!(
            lines,
            vec![FlameGraphLine {
                command: "cmdA".to_string(),
                stack: "cmdA;bar;foo".to_string(),
                count: 2,
            }]
        );
    }

    #[test]
    fn counts_sum_to_sample_total() {
        let samples = vec![
            sample("app", &["leaf", "mid", "main"]),
            sample("app", &["other", "main"]),
            sample("app", &["leaf", "mid", "main"]),
            sample("worker", &["leaf", "mid", "main"]),
            sample("app", &[]),
        ];
        let lines = fold_samples(&samples);
        assert_eq!(lines.iter().map(|l| l.count).sum::<u64>(), samples.len() as u64);
        assert_eq!(lines[0].stack, "app;main;mid;leaf");
        assert_eq!(lines[0].count, 2);
        assert!(lines.iter().any(|l| l.stack == "worker;main;mid;leaf" && l.count == 1));
    }

    #[test]
    fn frameless_sample_is_command_only() {
        let lines = fold_samples(&[sample("swapper", &[])]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].stack, "swapper");
        assert_eq!(lines[0].count, 1);
    }

    #[test]
    fn folded_text_format() {
        let lines = fold_samples(&[
            sample("a", &["f", "main"]),
            sample("a", &["f", "main"]),
            sample("a", &["g", "main"]),
        ]);
        assert_eq!(to_folded_text(&lines), "a;main;f 2\na;main;g 1");
        assert!(to_folded_text(&[]).starts_with('#'));
    }

    #[test]
    fn speedscope_shares_frames() {
        let lines = fold_samples(&[sample("a", &["f", "main"]), sample("a", &["g", "main"])]);
        let doc = to_speedscope("pid 1", &lines);
        assert_eq!(doc["shared"]["frames"].as_array().map(|f| f.len()), Some(4));
        assert_eq!(doc["profiles"][0]["endValue"], serde_json::json!(2));
        assert_eq!(doc["profiles"][0]["name"], serde_json::json!("pid 1"));
    }
}
