pub mod dag;
pub mod linear;
pub mod tree;

use anyhow::Result;
use serde_json::Value;

use crate::models::{ParsedConversation, Platform};

pub use tree::BranchPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportShape {
    Linear,
    Dag,
}

impl ExportShape {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Dag => "dag",
        }
    }
}

#[must_use]
pub const fn export_shape(platform: Platform) -> ExportShape {
    match platform {
        Platform::Claude => ExportShape::Linear,
        Platform::Chatgpt => ExportShape::Dag,
    }
}

/// Splits a whole export document into per-conversation values.
pub fn conversation_list(platform: Platform, document: Value) -> Result<Vec<Value>> {
    match export_shape(platform) {
        ExportShape::Linear => linear::conversation_list(document),
        ExportShape::Dag => dag::conversation_list(document),
    }
}

/// Runs the platform adapter over one conversation value.
pub fn parse_conversation(
    platform: Platform,
    conversation: &Value,
    policy: BranchPolicy,
) -> Result<ParsedConversation> {
    match export_shape(platform) {
        ExportShape::Linear => linear::parse_conversation(conversation),
        ExportShape::Dag => dag::parse_conversation(conversation, policy),
    }
}
