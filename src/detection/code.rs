// Code block detection with language guessing
//
// Finds fenced markdown blocks and inline code regions introduced by
// language keywords. Inline regions extend from the keyword to the first
// prose boundary (sentence end followed by a capitalized word) or the end of
// the text. Consumed through the `CodeDetector` trait.

use regex::Regex;

use super::models::{CodeBlock, CodeDetection};

/// Span producer for source code
pub trait CodeDetector: Send + Sync {
    fn detect(&self, text: &str) -> CodeDetection;
}

/// Heuristic detector: markdown fences plus keyword-introduced inline code
pub struct HeuristicCodeDetector {
    fence: Regex,
    starters: Vec<(&'static str, Regex, f64)>,
    prose_boundary: Regex,
}

impl HeuristicCodeDetector {
    pub fn new() -> Self {
        let fence = Regex::new(r"(?s)```([a-zA-Z0-9_+-]*)\n?(.*?)```").unwrap();

        // (language, start pattern, confidence)
        let starters = vec![
            (
                "python",
                Regex::new(r"\bdef\s+\w+\s*\(|\bimport\s+\w+|\bprint\s*\(|\blambda\s+\w+:").unwrap(),
                0.85,
            ),
            (
                "javascript",
                Regex::new(r"\bfunction\s+\w+\s*\(|\bconst\s+\w+\s*=|\blet\s+\w+\s*=|console\.log\(")
                    .unwrap(),
                0.80,
            ),
            (
                "sql",
                Regex::new(r"(?i)\bSELECT\b.+\bFROM\b|\bINSERT\s+INTO\b|\bUPDATE\b.+\bSET\b")
                    .unwrap(),
                0.85,
            ),
            (
                "bash",
                Regex::new(r"#!/bin/(?:ba)?sh|\becho\s+\$|\bsudo\s+\w+|\bchmod\s+\d+").unwrap(),
                0.80,
            ),
            (
                "rust",
                Regex::new(r"\bfn\s+\w+\s*\(|\blet\s+mut\s+\w+|\bimpl\s+\w+").unwrap(),
                0.80,
            ),
        ];

        // A sentence end followed by whitespace and a capitalized word marks
        // the return to prose
        let prose_boundary = Regex::new(r"[.!?]\s+[A-Z]").unwrap();

        Self {
            fence,
            starters,
            prose_boundary,
        }
    }

    /// Find where an inline code region that begins at `start` ends
    fn inline_end(&self, text: &str, start: usize) -> usize {
        match self.prose_boundary.find(&text[start..]) {
            // Keep the sentence-final punctuation out of the code block
            Some(m) => start + m.start(),
            None => text.len(),
        }
    }
}

impl Default for HeuristicCodeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeDetector for HeuristicCodeDetector {
    fn detect(&self, text: &str) -> CodeDetection {
        let mut blocks: Vec<CodeBlock> = Vec::new();

        for caps in self.fence.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            blocks.push(CodeBlock {
                start: whole.start(),
                end: whole.end(),
                language: if tag.is_empty() {
                    None
                } else {
                    Some(tag.to_lowercase())
                },
                confidence: 0.95,
            });
        }

        for (language, pattern, confidence) in &self.starters {
            for m in pattern.find_iter(text) {
                let start = m.start();
                // Skip matches already inside a detected block
                if blocks.iter().any(|b| start >= b.start && start < b.end) {
                    continue;
                }
                let end = self.inline_end(text, start);
                if end > start {
                    blocks.push(CodeBlock {
                        start,
                        end,
                        language: Some((*language).to_string()),
                        confidence: *confidence,
                    });
                }
            }
        }

        // Merge overlapping inline regions, keeping the earliest start
        blocks.sort_by_key(|b| (b.start, b.end));
        let mut merged: Vec<CodeBlock> = Vec::new();
        for block in blocks {
            match merged.last_mut() {
                Some(last) if block.start < last.end => {
                    if block.end > last.end {
                        last.end = block.end;
                    }
                    if block.confidence > last.confidence {
                        last.confidence = block.confidence;
                        last.language = block.language;
                    }
                }
                _ => merged.push(block),
            }
        }

        let best = merged
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        CodeDetection {
            has_code: !merged.is_empty(),
            language: best.and_then(|b| b.language.clone()),
            confidence: best.map(|b| b.confidence).unwrap_or(0.0),
            blocks: merged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_code_in_prose() {
        let detector = HeuristicCodeDetector::new();
        let detection = detector.detect("What is the capital of France?");
        assert!(!detection.has_code);
        assert!(detection.blocks.is_empty());
    }

    #[test]
    fn test_detects_python_function() {
        let detector = HeuristicCodeDetector::new();
        let text = "How can I improve this Python function: def hello(): print('Hello world')";
        let detection = detector.detect(text);
        assert!(detection.has_code);
        assert_eq!(detection.language.as_deref(), Some("python"));
        let block = &detection.blocks[0];
        assert!(text[block.start..block.end].starts_with("def hello()"));
    }

    #[test]
    fn test_inline_code_stops_at_prose_boundary() {
        let detector = HeuristicCodeDetector::new();
        let text = "script: import os; os.getenv('SECRET'). Can you help optimize it?";
        let detection = detector.detect(text);
        assert!(detection.has_code);
        let block = &detection.blocks[0];
        let code = &text[block.start..block.end];
        assert!(code.contains("os.getenv"));
        assert!(!code.contains("Can you"));
    }

    #[test]
    fn test_fenced_block_language() {
        let detector = HeuristicCodeDetector::new();
        let text = "Review this:\n```rust\nfn main() {}\n```\nThanks";
        let detection = detector.detect(text);
        assert!(detection.has_code);
        assert_eq!(detection.language.as_deref(), Some("rust"));
        assert_eq!(detection.blocks.len(), 1);
        assert!((detection.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_sql_detection() {
        let detector = HeuristicCodeDetector::new();
        let detection = detector.detect("Optimize SELECT id, name FROM users WHERE active = 1");
        assert!(detection.has_code);
        assert_eq!(detection.language.as_deref(), Some("sql"));
    }

    #[test]
    fn test_blocks_sorted_and_disjoint() {
        let detector = HeuristicCodeDetector::new();
        let text = "First def a(): pass. Then later const x = 1";
        let detection = detector.detect(text);
        let blocks = &detection.blocks;
        for pair in blocks.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }
}
