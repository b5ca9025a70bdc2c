//! Token-budget trimming of the candidate context.
//!
//! Order is most-specific first: examples, then templates, then schemas, and
//! glossary takes whatever budget remains. Token counting is a whitespace
//! approximation; the budget is a guardrail, not an exact accounting.

use crate::models::rag::{CandidateContext, ScoredDocument};

fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count().max(1)
}

fn trim_items(items: &[ScoredDocument], budget: usize) -> (Vec<ScoredDocument>, usize) {
    let mut kept = Vec::new();
    let mut used = 0usize;
    for item in items {
        let cost = count_tokens(&item.text);
        if used + cost > budget {
            break;
        }
        kept.push(item.clone());
        used += cost;
    }
    (kept, used)
}

pub fn trim_context_to_budget(context: CandidateContext, budget: usize) -> CandidateContext {
    let mut remaining = budget;

    let (examples, used) = trim_items(&context.examples, remaining);
    remaining = remaining.saturating_sub(used);

    let (templates, used) = trim_items(&context.templates, remaining);
    remaining = remaining.saturating_sub(used);

    let (schemas, used) = trim_items(&context.schemas, remaining);
    remaining = remaining.saturating_sub(used);

    let (glossary, _) = trim_items(&context.glossary, remaining);

    CandidateContext { schemas, examples, templates, glossary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rag::{DocMetadata, DocType};

    fn doc(id: &str, words: usize, doc_type: DocType) -> ScoredDocument {
        ScoredDocument {
            id: id.to_string(),
            text: vec!["w"; words].join(" "),
            metadata: DocMetadata::of(doc_type),
            score: 1.0,
        }
    }

    #[test]
    fn examples_consume_budget_first() {
        let context = CandidateContext {
            schemas: vec![doc("s", 10, DocType::Schema)],
            examples: vec![doc("e", 10, DocType::Example)],
            templates: vec![doc("t", 10, DocType::Template)],
            glossary: vec![doc("g", 10, DocType::Glossary)],
        };
        let trimmed = trim_context_to_budget(context, 25);
        assert_eq!(trimmed.examples.len(), 1);
        assert_eq!(trimmed.templates.len(), 1);
        // 5 tokens left: schema no longer fits, glossary neither.
        assert!(trimmed.schemas.is_empty());
        assert!(trimmed.glossary.is_empty());
    }

    #[test]
    fn zero_budget_empties_everything() {
        let context = CandidateContext {
            schemas: vec![doc("s", 3, DocType::Schema)],
            examples: vec![doc("e", 3, DocType::Example)],
            templates: vec![],
            glossary: vec![],
        };
        let trimmed = trim_context_to_budget(context, 0);
        assert!(trimmed.is_empty());
    }
}
