use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::error::{RagError, Result};
use crate::logger::Logger;
use crate::models::{ScoredReview, TurnRecord};
use crate::prompt::{build_prompt, PromptTemplate};
use crate::proxy::Generator;
use crate::rag::ReviewStore;

/// Outcome of one answered question.
#[derive(Debug, Clone)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub reviews: Vec<ScoredReview>,
    pub prompt: String,
}

/// Retrieve, prompt, generate: the work behind a single user question.
pub struct ChatPipeline {
    store: Arc<ReviewStore>,
    generator: Arc<dyn Generator>,
    template: PromptTemplate,
    top_k: usize,
    logger: Option<Arc<Logger>>,
}

impl ChatPipeline {
    pub fn new(
        store: Arc<ReviewStore>,
        generator: Arc<dyn Generator>,
        template: PromptTemplate,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            generator,
            template,
            top_k,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn store(&self) -> &Arc<ReviewStore> {
        &self.store
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    pub fn logger(&self) -> Option<&Arc<Logger>> {
        self.logger.as_ref()
    }

    /// Answer `question` and record the exchange in `conversation`. On error
    /// the conversation is left untouched.
    pub async fn answer(&self, conversation: &mut Conversation, question: &str) -> Result<Turn> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidQuery("question must not be empty".to_string()));
        }

        let reviews = self.store.retrieve(question, self.top_k).await?;
        let prompt = build_prompt(&self.template, &reviews, question)?;

        tracing::info!(
            session = %conversation.id(),
            "Answering with {} retrieved reviews",
            reviews.len()
        );
        let answer = self.generator.generate(&prompt).await?;

        conversation.record_exchange(question, &answer);

        if let Some(ref logger) = self.logger {
            let record = TurnRecord {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                session_id: conversation.id(),
                question: question.to_string(),
                answer: answer.clone(),
                top_reviews: reviews.iter().map(|r| r.review.page_content()).collect(),
            };
            if let Err(e) = logger.log_turn(&record).await {
                tracing::warn!("Failed to write turn log: {}", e);
            }
        }

        Ok(Turn {
            question: question.to_string(),
            answer,
            reviews,
            prompt,
        })
    }
}
