//! Captura acotada de stdout/stderr de un stage.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticStream {
    Stdout,
    Stderr,
}

impl DiagnosticStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticStream::Stdout => "stdout",
            DiagnosticStream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLine {
    pub stream: DiagnosticStream,
    pub line: String,
}

/// Buffer FIFO limitado en bytes: al superar `cap` descarta las líneas más
/// antiguas. Una línea que por sí sola supera `cap` se recorta por el final.
#[derive(Debug, Clone)]
pub struct DiagnosticBuffer {
    lines: VecDeque<DiagnosticLine>,
    bytes: usize,
    cap: usize,
    dropped: usize,
}

impl DiagnosticBuffer {
    pub fn new(cap: usize) -> Self {
        Self { lines: VecDeque::new(),
               bytes: 0,
               cap,
               dropped: 0 }
    }

    pub fn push(&mut self, stream: DiagnosticStream, mut line: String) {
        if line.len() > self.cap {
            let mut cut = line.len() - self.cap;
            while !line.is_char_boundary(cut) {
                cut += 1;
            }
            line = line.split_off(cut);
        }
        self.bytes += line.len();
        self.lines.push_back(DiagnosticLine { stream, line });
        while self.bytes > self.cap {
            match self.lines.pop_front() {
                Some(old) => {
                    self.bytes -= old.line.len();
                    self.dropped += 1;
                }
                None => break,
            }
        }
    }

    /// Líneas descartadas por el tope.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn retained_bytes(&self) -> usize {
        self.bytes
    }

    pub fn into_lines(self) -> Vec<DiagnosticLine> {
        self.lines.into_iter().collect()
    }
}

/// Texto de las últimas `max_lines` líneas, en orden, prefijadas con su canal.
pub fn excerpt(lines: &[DiagnosticLine], max_lines: usize) -> String {
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].iter()
                  .map(|l| format!("[{}] {}", l.stream.as_str(), l.line))
                  .collect::<Vec<_>>()
                  .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_lines_are_dropped_over_cap() {
        let mut buf = DiagnosticBuffer::new(10);
        buf.push(DiagnosticStream::Stdout, "aaaa".into());
        buf.push(DiagnosticStream::Stdout, "bbbb".into());
        buf.push(DiagnosticStream::Stderr, "cccc".into());
        assert_eq!(buf.dropped(), 1);
        assert!(buf.retained_bytes() <= 10);
        let lines = buf.into_lines();
        assert_eq!(lines[0].line, "bbbb");
        assert_eq!(lines[1].stream, DiagnosticStream::Stderr);
    }

    #[test]
    fn oversized_line_keeps_its_tail() {
        let mut buf = DiagnosticBuffer::new(4);
        buf.push(DiagnosticStream::Stdout, "0123456789".into());
        assert_eq!(buf.into_lines()[0].line, "6789");
    }

    #[test]
    fn excerpt_takes_last_lines() {
        let lines: Vec<DiagnosticLine> = (0..5).map(|i| DiagnosticLine { stream: DiagnosticStream::Stdout,
                                                                          line: format!("l{i}") })
                                               .collect();
        assert_eq!(excerpt(&lines, 2), "[stdout] l3\n[stdout] l4");
    }
}
