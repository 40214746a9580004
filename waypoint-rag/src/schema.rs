//! The section contract between the prompt template and the output normalizer.
//!
//! The model is told to wrap its answer in `<name>...</name>` blocks for
//! each section, in order. The prompt assembler renders those instructions
//! from an [`OutputSchema`], and the normalizer strips exactly those markers,
//! so changing the contract is a single edit here.

use regex::Regex;

/// A named section of the model's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Tag name, e.g. `greeting`.
    pub name: String,
    /// What the model should write inside the section.
    pub instruction: String,
}

impl Section {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self { name: name.into(), instruction: instruction.into() }
    }

    pub fn open_tag(&self) -> String {
        format!("<{}>", self.name)
    }

    pub fn close_tag(&self) -> String {
        format!("</{}>", self.name)
    }
}

/// Ordered sections plus the number of enumerated recommendations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    sections: Vec<Section>,
    recommendation_count: usize,
}

impl Default for OutputSchema {
    fn default() -> Self {
        Self::travel()
    }
}

impl OutputSchema {
    /// Greeting, exactly three numbered recommendations, and a conclusion.
    pub fn travel() -> Self {
        Self {
            sections: vec![
                Section::new(
                    "greeting",
                    "A brief, personalized greeting that acknowledges the traveler's preferences.",
                ),
                Section::new(
                    "recommendations",
                    "Exactly {count} numbered recommendations, one paragraph each. Every \
                     recommendation starts with the location name and its region or country, \
                     followed by why it matches the request.",
                ),
                Section::new("conclusion", "A short wrap-up with a friendly sign-off."),
            ],
            recommendation_count: 3,
        }
    }

    /// Build a custom schema. Section names must be non-empty ASCII identifiers.
    pub fn new(sections: Vec<Section>, recommendation_count: usize) -> Option<Self> {
        let valid = !sections.is_empty()
            && sections.iter().all(|s| {
                !s.name.is_empty()
                    && s.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            });
        valid.then_some(Self { sections, recommendation_count })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn recommendation_count(&self) -> usize {
        self.recommendation_count
    }

    /// Every literal marker, opening and closing, in section order.
    pub fn markers(&self) -> Vec<String> {
        self.sections.iter().flat_map(|s| [s.open_tag(), s.close_tag()]).collect()
    }

    /// A case-insensitive pattern matching any section marker, tolerating
    /// whitespace inside the angle brackets.
    pub fn marker_pattern(&self) -> Regex {
        let names: Vec<String> = self.sections.iter().map(|s| regex::escape(&s.name)).collect();
        Regex::new(&format!(r"(?i)<\s*/?\s*(?:{})\s*>", names.join("|")))
            .expect("section names are validated identifiers")
    }

    /// The formatting instructions embedded in the prompt template.
    pub fn format_instructions(&self) -> String {
        let mut out = String::from("Use the following tags to structure your response, in this order:\n");
        for section in &self.sections {
            let instruction =
                section.instruction.replace("{count}", &self.recommendation_count.to_string());
            out.push_str(&format!("   {}{}: {}\n", section.open_tag(), section.close_tag(), instruction));
        }
        out
    }
}
