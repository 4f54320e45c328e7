pub mod conversation;
pub mod query_envelope;

pub use conversation::{
    ARTIFACT_SCHEMA_VERSION, CanonicalMessage, ConversationRecord, FullArtifact, ParsedConversation,
    Platform, Role, all_platforms, artifact_json_schema,
};
pub use query_envelope::{
    EnvelopeErrorCode, QUERY_ENVELOPE_SCHEMA_VERSION, QueryEnvelope, QueryEnvelopeCommandFailure,
    QueryEnvelopeError, QueryEnvelopeMeta, QueryEnvelopeWarning,
};
