//! Prompts for translation and question answering.
//!
//! Every prompt lives here so wording changes touch exactly one place and
//! tests can inspect the messages without a live model.

use edgequake_llm::ChatMessage;

/// System prompt for the upload (translation) stream.
pub const TRANSLATOR_SYSTEM_PROMPT: &str = "You are a professional translator.";

/// Instruction prefixed to the extracted text of an upload.
pub const TRANSLATION_INSTRUCTION: &str =
    "This text may contain Arabic, Turkish, or both. Translate all parts to English accurately:";

/// System prompt for the question stream.
pub const ASSISTANT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer questions using the provided document if available, otherwise use your general knowledge.";

/// Context used when no document has been stored yet.
pub const NO_DOCUMENT_CONTEXT: &str =
    "No document has been uploaded. Answer based on general knowledge.";

/// Messages asking the model to translate `text` to English.
pub fn translation_messages(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(TRANSLATOR_SYSTEM_PROMPT),
        ChatMessage::user(format!("{TRANSLATION_INSTRUCTION}\n\n{text}")),
    ]
}

/// Messages asking the model to answer `question` using `context`.
///
/// An empty context is replaced by [`NO_DOCUMENT_CONTEXT`].
pub fn question_messages(context: &str, question: &str) -> Vec<ChatMessage> {
    let context = if context.is_empty() {
        NO_DOCUMENT_CONTEXT
    } else {
        context
    };
    vec![
        ChatMessage::system(ASSISTANT_SYSTEM_PROMPT),
        ChatMessage::user(format!("Document: {context}")),
        ChatMessage::user(format!("Question: {question}")),
    ]
}
