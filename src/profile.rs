//! User profile
//!
//! Process-wide, read-only after init. The ranking and email services read
//! it; nothing writes it.

use serde::{Deserialize, Serialize};

/// Reader expertise levels recognized by the ranking prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertiseLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl Default for ExpertiseLevel {
    fn default() -> Self {
        ExpertiseLevel::Intermediate
    }
}

impl std::fmt::Display for ExpertiseLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpertiseLevel::Beginner => write!(f, "beginner"),
            ExpertiseLevel::Intermediate => write!(f, "intermediate"),
            ExpertiseLevel::Advanced => write!(f, "advanced"),
        }
    }
}

/// Who the digest is for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default = "default_name")]
    pub name: String,

    /// Short free-text background used verbatim in prompts
    #[serde(default)]
    pub background: String,

    /// Ordered interest tags; earlier tags weigh more
    #[serde(default)]
    pub interests: Vec<String>,

    #[serde(default)]
    pub expertise_level: ExpertiseLevel,

    /// Topics the reader does not want surfaced
    #[serde(default)]
    pub avoidances: Vec<String>,
}

fn default_name() -> String {
    "Reader".to_string()
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: default_name(),
            background: String::new(),
            interests: Vec::new(),
            expertise_level: ExpertiseLevel::default(),
            avoidances: Vec::new(),
        }
    }
}

impl UserProfile {
    /// One-paragraph rendering for prompts
    pub fn describe(&self) -> String {
        let mut out = format!("Name: {}. Expertise: {}.", self.name, self.expertise_level);
        if !self.background.is_empty() {
            out.push_str(&format!(" Background: {}.", self.background));
        }
        if !self.interests.is_empty() {
            out.push_str(&format!(" Interests: {}.", self.interests.join(", ")));
        }
        if !self.avoidances.is_empty() {
            out.push_str(&format!(" Avoid: {}.", self.avoidances.join(", ")));
        }
        out
    }

    /// Query string used to seed context retrieval
    pub fn interest_query(&self) -> String {
        self.interests
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
