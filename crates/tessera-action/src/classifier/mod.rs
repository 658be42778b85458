//! Approval reply classification.
//!
//! Classifiers are built per user because credentials and model choice are
//! per user; building can fail before any text is looked at.

pub mod keywords;

use async_trait::async_trait;

use tessera_core::types::ApprovalIntentResult;

use crate::error::{ClassifierBuildError, ClassifierError};

pub use keywords::{KeywordClassifier, KeywordClassifierFactory};

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, reply_text: &str) -> Result<ApprovalIntentResult, ClassifierError>;
}

#[async_trait]
pub trait ClassifierFactory: Send + Sync {
    async fn build(&self, user_id: &str) -> Result<Box<dyn IntentClassifier>, ClassifierBuildError>;
}
