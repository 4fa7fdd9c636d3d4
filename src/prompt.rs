//! Prompt templates with named `{slot}` placeholders.
//!
//! A template is parsed once at construction; every placeholder must belong
//! to the declared slot set and every declared slot must appear. Rendering is
//! a pure substitution that fails when a slot has no binding. `{{` and `}}`
//! produce literal braces.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{RagError, Result, TemplateError};
use crate::models::ScoredReview;

pub const REVIEWS_SLOT: &str = "reviews";
pub const QUESTION_SLOT: &str = "question";

pub const CLI_TEMPLATE: &str = "
You are a helpful assistant trained to answer questions using customer reviews of a pizza restaurant.

Based only on the following reviews, answer the question truthfully. If the answer isn't clear, say \"I don't know\".

Reviews:
{reviews}

Question:
{question}
";

pub const CHAT_TEMPLATE: &str = "
You are a friendly pizza expert assistant named PizzaBot.
Answer questions using the following customer reviews.
Be honest, helpful, and add a touch of personality.
If the reviews don't contain enough info, it's okay to guess based on common themes.

Reviews:
{reviews}

Question:
{question}
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
    slots: Vec<String>,
}

pub type Bindings<'a> = HashMap<&'a str, String>;

impl PromptTemplate {
    pub fn new(source: &str, required_slots: &[&str]) -> std::result::Result<Self, TemplateError> {
        let segments = parse(source)?;

        for segment in &segments {
            if let Segment::Slot(name) = segment {
                if !required_slots.contains(&name.as_str()) {
                    return Err(TemplateError::UnknownSlot(name.clone()));
                }
            }
        }
        for slot in required_slots {
            let present = segments
                .iter()
                .any(|s| matches!(s, Segment::Slot(name) if name == slot));
            if !present {
                return Err(TemplateError::MissingSlot(slot.to_string()));
            }
        }

        Ok(Self {
            segments,
            slots: required_slots.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Template with the `{reviews}` and `{question}` slots.
    pub fn review_qa(source: &str) -> std::result::Result<Self, TemplateError> {
        Self::new(source, &[REVIEWS_SLOT, QUESTION_SLOT])
    }

    /// Load a `{reviews}`/`{question}` template from a file, falling back to
    /// `default` when no path is given.
    pub fn review_qa_from(path: Option<&Path>, default: &str) -> Result<Self> {
        match path {
            Some(p) => {
                let source = std::fs::read_to_string(p).map_err(|e| {
                    RagError::Storage(format!("failed to read template {}: {}", p.display(), e))
                })?;
                Ok(Self::review_qa(&source)?)
            }
            None => Ok(Self::review_qa(default)?),
        }
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub fn render(&self, bindings: &Bindings<'_>) -> std::result::Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(name) => {
                    let value = bindings
                        .get(name.as_str())
                        .ok_or_else(|| TemplateError::UnboundSlot(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn parse(source: &str) -> std::result::Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    if n == '{' {
                        return Err(TemplateError::UnbalancedBrace(pos));
                    }
                    name.push(n);
                }
                let name = name.trim().to_string();
                if !closed || name.is_empty() {
                    return Err(TemplateError::UnbalancedBrace(pos));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot(name));
            }
            '}' => return Err(TemplateError::UnbalancedBrace(pos)),
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// One `- ` bullet line per review, in retrieval order.
pub fn format_reviews(reviews: &[ScoredReview]) -> String {
    reviews
        .iter()
        .map(|r| format!("- {}", r.review.page_content()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a `{reviews}`/`{question}` template.
pub fn build_prompt(
    template: &PromptTemplate,
    reviews: &[ScoredReview],
    question: &str,
) -> Result<String> {
    let mut bindings = Bindings::new();
    bindings.insert(REVIEWS_SLOT, format_reviews(reviews));
    bindings.insert(QUESTION_SLOT, question.to_string());
    Ok(template.render(&bindings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Review;

    fn scored(id: &str, text: &str) -> ScoredReview {
        ScoredReview { review: Review::new(id, text), score: 1.0 }
    }

    #[test]
    fn test_builtin_templates_are_valid() {
        assert!(PromptTemplate::review_qa(CLI_TEMPLATE).is_ok());
        assert!(PromptTemplate::review_qa(CHAT_TEMPLATE).is_ok());
    }

    #[test]
    fn test_missing_slot_rejected_at_construction() {
        let err = PromptTemplate::review_qa("Reviews: {reviews}").unwrap_err();
        assert_eq!(err, TemplateError::MissingSlot("question".to_string()));
    }

    #[test]
    fn test_unknown_slot_rejected() {
        let err = PromptTemplate::review_qa("{reviews} {question} {context}").unwrap_err();
        assert_eq!(err, TemplateError::UnknownSlot("context".to_string()));
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        assert!(matches!(
            PromptTemplate::review_qa("{reviews} {question"),
            Err(TemplateError::UnbalancedBrace(_))
        ));
        assert!(matches!(
            PromptTemplate::review_qa("{reviews} } {question}"),
            Err(TemplateError::UnbalancedBrace(_))
        ));
    }

    #[test]
    fn test_render_substitutes_and_escapes() {
        let template = PromptTemplate::review_qa("{{json}} R={reviews} Q={question}").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("reviews", "r".to_string());
        bindings.insert("question", "{q}".to_string());
        assert_eq!(template.render(&bindings).unwrap(), "{json} R=r Q={q}");
    }

    #[test]
    fn test_render_requires_every_binding() {
        let template = PromptTemplate::review_qa("{reviews}{question}").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("reviews", String::new());
        assert_eq!(
            template.render(&bindings).unwrap_err(),
            TemplateError::UnboundSlot("question".to_string())
        );
    }

    #[test]
    fn test_format_reviews_one_line_each_in_order() {
        let text =
            format_reviews(&[scored("1", "Great crust, fast delivery"), scored("2", "Cold pizza")]);
        assert_eq!(text, "- Great crust, fast delivery\n- Cold pizza");
        assert_eq!(format_reviews(&[]), "");
    }

    #[test]
    fn test_build_prompt_fills_both_slots() {
        let template = PromptTemplate::review_qa(CLI_TEMPLATE).unwrap();
        let reviews = [scored("1", "Great crust, fast delivery")];
        let prompt = build_prompt(&template, &reviews, "Is the delivery fast?").unwrap();
        assert!(prompt.contains("Reviews:\n- Great crust, fast delivery\n"));
        assert!(prompt.contains("Question:\nIs the delivery fast?"));
    }

    #[test]
    fn test_template_file_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, "Q: {question}\nR: {reviews}").unwrap();
        let template = PromptTemplate::review_qa_from(Some(&path), CLI_TEMPLATE).unwrap();
        assert_eq!(template.slots(), &["reviews".to_string(), "question".to_string()]);

        std::fs::write(&path, "Q: {question}").unwrap();
        assert!(matches!(
            PromptTemplate::review_qa_from(Some(&path), CLI_TEMPLATE),
            Err(RagError::Template(TemplateError::MissingSlot(_)))
        ));
    }
}
