//! Heuristic complexity and risk scoring of the incoming question.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::query::RiskInfo;
use crate::utils::sqltext::ci;

static WRITE_KEYWORDS_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\b(delete|update|insert|merge|drop|alter|truncate)\b"));

pub fn classify(question: &str) -> RiskInfo {
    let text = question.to_lowercase();
    let mut risk = 0;
    let mut complexity = 0;

    if WRITE_KEYWORDS_RE.is_match(&text) {
        risk += 5;
    }
    if text.contains("join") {
        complexity += text.matches("join").count() as i32;
    }
    if text.len() > 120 {
        complexity += 1;
    }
    if text.contains("all") || text.contains("everything") {
        risk += 1;
    }

    let intent = if risk >= 3 { "risky" } else { "read" };
    RiskInfo { intent: intent.to_string(), complexity, risk }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_wording_is_risky() {
        let info = classify("delete all patient rows");
        assert_eq!(info.intent, "risky");
        assert!(info.risk >= 5);
    }

    #[test]
    fn plain_question_reads_as_read() {
        let info = classify("how many patients per gender");
        assert_eq!(info.intent, "read");
        assert_eq!(info.risk, 0);
    }

    #[test]
    fn joins_raise_complexity() {
        let info = classify("join admissions and join patients by subject");
        assert_eq!(info.complexity, 2);
    }
}
