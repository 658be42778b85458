//! Regex keyword classifier.
//!
//! Used when no LLM endpoint is configured. A reply containing both approval
//! and rejection words, or neither, is unclear.

use async_trait::async_trait;
use regex::Regex;

use tessera_core::types::{ApprovalIntent, ApprovalIntentResult};

use crate::classifier::{ClassifierFactory, IntentClassifier};
use crate::error::{ClassifierBuildError, ClassifierError};

const APPROVE_PATTERN: &str = r"(?i)\b(yes|yeah|yep|yup|sure|ok|okay|approve[sd]?|go ahead|do it|please do|sounds good|confirm(?:ed)?|lgtm|absolutely|of course)\b";
const REJECT_PATTERN: &str = r"(?i)\b(no|nope|nah|reject(?:ed)?|cancel(?:led)?|don'?t|do not|stop|skip|never ?mind|not now)\b";

pub struct KeywordClassifier {
    approve: Regex,
    reject: Regex,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            approve: Regex::new(APPROVE_PATTERN).expect("Invalid approve regex"),
            reject: Regex::new(REJECT_PATTERN).expect("Invalid reject regex"),
        }
    }

    pub fn classify_text(&self, reply_text: &str) -> ApprovalIntentResult {
        let approve = self.approve.find(reply_text);
        let reject = self.reject.find(reply_text);

        match (approve, reject) {
            (Some(m), None) => ApprovalIntentResult {
                intent: ApprovalIntent::Approve,
                confidence: 0.8,
                reasoning: format!("Reply contains \"{}\"", m.as_str()),
            },
            (None, Some(m)) => ApprovalIntentResult {
                intent: ApprovalIntent::Reject,
                confidence: 0.8,
                reasoning: format!("Reply contains \"{}\"", m.as_str()),
            },
            (Some(_), Some(_)) => {
                ApprovalIntentResult::unclear("Reply contains both approval and rejection words")
            }
            (None, None) => ApprovalIntentResult::unclear("Reply contains no approval or rejection words"),
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, reply_text: &str) -> Result<ApprovalIntentResult, ClassifierError> {
        Ok(self.classify_text(reply_text))
    }
}

/// Builds a keyword classifier for every user.
#[derive(Default)]
pub struct KeywordClassifierFactory;

#[async_trait]
impl ClassifierFactory for KeywordClassifierFactory {
    async fn build(&self, _user_id: &str) -> Result<Box<dyn IntentClassifier>, ClassifierBuildError> {
        Ok(Box::new(KeywordClassifier::new()))
    }
}
