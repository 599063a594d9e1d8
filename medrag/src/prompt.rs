//! Prompt templates and the fixed answer strings.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Emitted by the extraction step when a chunk has nothing relevant.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found.";

/// Final answer when every extraction came back empty.
pub const NOT_SURE_ANSWER: &str = "I am not sure based on the available information.";

/// Final answer when retrieval returned no chunks at all.
pub const NO_CONTEXT_ANSWER: &str = "I could not find any relevant information for your question.";

/// Final answer when a per-query failure was swallowed.
pub const APOLOGY_ANSWER: &str = "Sorry, I had trouble generating a response.";

/// Default extraction prompt, run once per retrieved chunk.
pub const DEFAULT_MAP_TEMPLATE: &str = "Extract any sentences from the text below that mention \
treatments, medications, or remedies relevant to the user's question. If none, say 'No relevant \
information found.'\nQuestion: {input}\nText: '{text}'\n";

/// Default combine prompt, run once over all extractions.
pub const DEFAULT_COMBINE_TEMPLATE: &str = "You are a medical assistant. Answer the user's \
question using ONLY the extracted information below. If it says 'No relevant information found,' \
then you MUST say 'I am not sure based on the available information.' List any specific \
treatments or medications found.\n\nInformation:\n{text}\n\nQuestion: {input}\n\nAnswer:";

/// A prompt with `{text}` and `{input}` placeholders.
///
/// Deserializes from a plain string through [`PromptTemplate::new`], so a
/// template read from config is checked the same way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Create a template. It must reference `{text}`; `{input}` is optional.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `{text}` is missing.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains("{text}") {
            return Err(RagError::Configuration(
                "prompt template must contain a {text} placeholder".to_string(),
            ));
        }
        Ok(Self { template })
    }

    /// The default extraction template.
    pub fn map_default() -> Self {
        Self { template: DEFAULT_MAP_TEMPLATE.to_string() }
    }

    /// The default combine template.
    pub fn combine_default() -> Self {
        Self { template: DEFAULT_COMBINE_TEMPLATE.to_string() }
    }

    /// Fill in both placeholders.
    ///
    /// Placeholders are only recognised in the template itself, never inside
    /// the substituted chunk text or question.
    pub fn render(&self, text: &str, input: &str) -> String {
        let mut parts = self.template.split("{text}");
        let mut rendered = parts.next().unwrap_or_default().replace("{input}", input);
        for part in parts {
            rendered.push_str(text);
            rendered.push_str(&part.replace("{input}", input));
        }
        rendered
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = RagError;

    fn try_from(template: String) -> Result<Self> {
        Self::new(template)
    }
}

impl From<PromptTemplate> for String {
    fn from(template: PromptTemplate) -> Self {
        template.template
    }
}

/// Whether an extraction output means "nothing relevant here".
///
/// Tolerates surrounding whitespace and quotes, a missing or extra trailing
/// period in any nesting with the quotes, and case differences. An empty
/// output also counts.
pub fn is_no_information(output: &str) -> bool {
    let normalize = |s: &str| {
        let mut current = s.trim();
        loop {
            let next = current
                .trim_matches(|c: char| c == '\'' || c == '"' || c == '`')
                .trim_end_matches(['.', '!'])
                .trim();
            if next == current {
                break;
            }
            current = next;
        }
        current.to_lowercase()
    };
    let normalized = normalize(output);
    normalized.is_empty() || normalized == normalize(NO_RELEVANT_INFORMATION)
}
