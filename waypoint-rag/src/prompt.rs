//! Prompt assembly: a fixed instruction template filled with the query and
//! the serialized candidates.
//!
//! The template is validated once, when the [`PromptAssembler`] is built.
//! Rendering is a single pass over the template, so placeholder-looking text
//! inside the query or the candidates is never expanded.

use std::path::Path;

use crate::document::Candidate;
use crate::error::{RagError, Result};
use crate::schema::OutputSchema;

/// Replaced by the user's query.
pub const QUERY_PLACEHOLDER: &str = "{{USER_QUERY}}";
/// Replaced by the serialized candidate block.
pub const CANDIDATES_PLACEHOLDER: &str = "{{RETRIEVED_NODES}}";

const INTRO: &str = "You are a friendly and knowledgeable travel assistant who recommends tourist \
destinations based on a traveler's preferences. Analyze the traveler's request together with the \
retrieved information about tourist locations and give personalized recommendations.";

const CRITERIA: &str = "Instructions:

1. Read the traveler's request carefully and work out their preferences and requirements.
2. Review the retrieved locations. Use only facts stated in them.
3. Compare locations on how well they match the request, visitor numbers, rating, price and the \
type of destination.
4. Pick the best matches and describe each one briefly, highlighting what makes it fit.
5. Keep a warm, conversational tone, as if chatting with a friend about exciting trips.";

/// An instruction template with both placeholders and every schema marker.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    /// Validate a template against `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::TemplateError`] if either placeholder or any
    /// section marker of `schema` is missing.
    pub fn new(text: impl Into<String>, schema: &OutputSchema) -> Result<Self> {
        let text = text.into();
        for placeholder in [QUERY_PLACEHOLDER, CANDIDATES_PLACEHOLDER] {
            if !text.contains(placeholder) {
                return Err(RagError::TemplateError(format!(
                    "template is missing the {placeholder} placeholder"
                )));
            }
        }
        for marker in schema.markers() {
            if !text.contains(&marker) {
                return Err(RagError::TemplateError(format!(
                    "template does not mention the {marker} section marker"
                )));
            }
        }
        Ok(Self { text })
    }

    /// Read and validate a template file.
    pub async fn from_file(path: impl AsRef<Path>, schema: &OutputSchema) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RagError::TemplateError(format!("cannot read template {}: {e}", path.display()))
        })?;
        Self::new(text, schema)
    }

    /// The built-in travel template rendered from `schema`.
    pub fn default_for(schema: &OutputSchema) -> Self {
        let mut example = String::new();
        for section in schema.sections() {
            example.push_str(&section.open_tag());
            example.push_str("\n...\n");
            example.push_str(&section.close_tag());
            example.push('\n');
        }

        let text = format!(
            "{INTRO}\n\n\
             The traveler's request:\n\n<user_query>\n{QUERY_PLACEHOLDER}\n</user_query>\n\n\
             Retrieved locations, best match first. Each entry lists the location's details \
             followed by its description:\n\n<retrieved_nodes>\n{CANDIDATES_PLACEHOLDER}\n</retrieved_nodes>\n\n\
             {CRITERIA}\n\n\
             6. Select exactly {count} locations and number them 1 to {count}.\n\
             7. {format}\n\
             Your response must have exactly this shape:\n\n{example}\n\
             Do not write anything outside these tags.",
            count = schema.recommendation_count(),
            format = schema.format_instructions(),
        );
        Self { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Substitute both placeholders in one left-to-right pass.
    pub fn render(&self, query: &str, candidates: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + query.len() + candidates.len());
        let mut rest = self.text.as_str();
        loop {
            let next = [(QUERY_PLACEHOLDER, query), (CANDIDATES_PLACEHOLDER, candidates)]
                .into_iter()
                .filter_map(|(placeholder, value)| {
                    rest.find(placeholder).map(|at| (at, placeholder, value))
                })
                .min_by_key(|(at, _, _)| *at);
            match next {
                Some((at, placeholder, value)) => {
                    out.push_str(&rest[..at]);
                    out.push_str(value);
                    rest = &rest[at + placeholder.len()..];
                }
                None => {
                    out.push_str(rest);
                    return out;
                }
            }
        }
    }
}

/// Serialize candidates into the block handed to the model, preserving order.
///
/// Each entry is numbered by rank and lists the document id, its metadata
/// in key order, the retrieval score and the text.
pub fn serialize_candidates(candidates: &[Candidate]) -> String {
    let mut out = String::new();
    for (rank, candidate) in candidates.iter().enumerate() {
        if rank > 0 {
            out.push('\n');
        }
        let doc = &candidate.document;
        out.push_str(&format!("[{}] id: {}\n", rank + 1, doc.id));
        for key in doc.metadata.keys() {
            if let Some(value) = doc.metadata_str(key) {
                out.push_str(&format!("{key}: {value}\n"));
            }
        }
        out.push_str(&format!("score: {:.4} ({})\n", candidate.score, candidate.strategy));
        out.push_str(&format!("text: {}\n", doc.text.trim()));
    }
    out
}

/// Renders prompts from a validated template.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    template: PromptTemplate,
}

impl PromptAssembler {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }

    /// An assembler using the built-in template for `schema`.
    pub fn for_schema(schema: &OutputSchema) -> Self {
        Self::new(PromptTemplate::default_for(schema))
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Render the prompt for one query.
    pub fn assemble(&self, query: &str, candidates: &[Candidate]) -> String {
        self.template.render(query, &serialize_candidates(candidates))
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::for_schema(&OutputSchema::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Strategy};
    use serde_json::json;

    #[test]
    fn default_template_is_valid_for_its_schema() {
        let schema = OutputSchema::travel();
        let template = PromptTemplate::default_for(&schema);
        assert!(PromptTemplate::new(template.as_str(), &schema).is_ok());
        assert!(template.as_str().contains("exactly 3 locations"));
    }

    #[test]
    fn missing_placeholder_is_template_error() {
        let schema = OutputSchema::travel();
        let err = PromptTemplate::new("no placeholders <greeting></greeting>", &schema).unwrap_err();
        assert!(matches!(err, RagError::TemplateError(_)));
    }

    #[test]
    fn missing_marker_is_template_error() {
        let schema = OutputSchema::travel();
        let err = PromptTemplate::new("{{USER_QUERY}} {{RETRIEVED_NODES}}", &schema).unwrap_err();
        assert!(err.to_string().contains("<greeting>"));
    }

    #[test]
    fn render_does_not_expand_placeholders_inside_values() {
        let template = PromptTemplate { text: "Q={{USER_QUERY}} N={{RETRIEVED_NODES}}".into() };
        let rendered = template.render("{{RETRIEVED_NODES}}", "nodes");
        assert_eq!(rendered, "Q={{RETRIEVED_NODES}} N=nodes");
    }

    #[test]
    fn render_handles_repeated_placeholders() {
        let template = PromptTemplate { text: "{{USER_QUERY}}|{{USER_QUERY}}".into() };
        assert_eq!(template.render("q", "n"), "q|q");
    }

    #[test]
    fn candidates_serialize_in_order_with_metadata() {
        let candidates = vec![
            Candidate::new(
                Document::new("eg-1", "Sandy beach.")
                    .with_metadata("country", "Egypt")
                    .with_metadata("rating", json!(4.6)),
                0.91,
                Strategy::Dense,
            ),
            Candidate::new(Document::new("br-2", "Lively coast."), 0.5, Strategy::Dense),
        ];
        let block = serialize_candidates(&candidates);
        assert_eq!(
            block,
            "[1] id: eg-1\ncountry: Egypt\nrating: 4.6\nscore: 0.9100 (dense)\ntext: Sandy beach.\n\
             \n[2] id: br-2\nscore: 0.5000 (dense)\ntext: Lively coast.\n"
        );
    }

    #[test]
    fn assemble_places_query_and_candidates() {
        let assembler = PromptAssembler::default();
        let prompt = assembler.assemble("beach trips", &[]);
        assert!(prompt.contains("<user_query>\nbeach trips\n</user_query>"));
        assert!(!prompt.contains(QUERY_PLACEHOLDER));
        assert!(!prompt.contains(CANDIDATES_PLACEHOLDER));
    }
}
