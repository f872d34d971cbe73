// src/analysis/topics.rs
// Topic coverage: which themes a session has already discussed

use serde::Serialize;
use std::collections::BTreeSet;

/// A canonical topic label plus the literal phrases that evidence it
#[derive(Debug, Clone, Copy)]
pub struct TopicGroup {
    pub label: &'static str,
    pub synonyms: &'static [&'static str],
}

impl TopicGroup {
    fn mentioned_in(&self, lowercase_text: &str) -> bool {
        lowercase_text.contains(self.label)
            || self.synonyms.iter().any(|s| lowercase_text.contains(s))
    }

    fn names(&self, topic: &str) -> bool {
        self.label == topic || self.synonyms.iter().any(|s| *s == topic)
    }
}

pub const TOPIC_GROUPS: &[TopicGroup] = &[
    TopicGroup {
        label: "velocity",
        synonyms: &[
            "speed",
            "cycle-time",
            "cycle time",
            "time-to-market",
            "time to market",
            "lead time",
            "throughput",
            "deploy frequency",
            "velocidade",
            "agilidade",
            "tempo de entrega",
        ],
    },
    TopicGroup {
        label: "quality",
        synonyms: &[
            "bugs",
            "defects",
            "defeitos",
            "incidents",
            "incidentes",
            "rework",
            "retrabalho",
            "test coverage",
            "cobertura de testes",
            "qualidade",
        ],
    },
    TopicGroup {
        label: "cost",
        synonyms: &[
            "custos",
            "o custo",
            "custo de",
            "budget",
            "orçamento",
            "spend",
            "gasto",
            "savings",
            "economia",
            "return on investment",
            "retorno sobre investimento",
        ],
    },
    TopicGroup {
        label: "adoption",
        synonyms: &[
            "adoção",
            "rollout",
            "copilot",
            "chatgpt",
            "ai tools",
            "ferramentas de ia",
            "uso de ia",
            "licenses",
            "licenças",
        ],
    },
    TopicGroup {
        label: "governance",
        synonyms: &[
            "governança",
            "compliance",
            "policy",
            "política",
            "security",
            "segurança",
            "lgpd",
            "gdpr",
            "privacy",
            "privacidade",
        ],
    },
    TopicGroup {
        label: "talent",
        synonyms: &[
            "skills",
            "habilidades",
            "training",
            "treinamento",
            "hiring",
            "contratação",
            "equipe",
            "upskilling",
        ],
    },
    TopicGroup {
        label: "data",
        synonyms: &[
            "dados",
            "dataset",
            "data quality",
            "data pipeline",
            "data lake",
            "warehouse",
        ],
    },
    TopicGroup {
        label: "tooling",
        synonyms: &[
            "ferramentas",
            "ci/cd",
            "pipeline",
            "github",
            "gitlab",
            "jira",
        ],
    },
];

/// Topics every assessment should touch
pub const ESSENTIAL_TOPICS: [&str; 5] = ["velocity", "quality", "cost", "adoption", "governance"];

/// Coverage of the essential topics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicCoverage {
    /// covered / essential * 100, rounded to nearest integer
    pub percentage: u32,
    pub covered: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TopicTracker {
    groups: &'static [TopicGroup],
    essential: &'static [&'static str],
}

impl Default for TopicTracker {
    fn default() -> Self {
        Self {
            groups: TOPIC_GROUPS,
            essential: &ESSENTIAL_TOPICS,
        }
    }
}

impl TopicTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical labels mentioned in an answer
    pub fn detect_topics(&self, answer: &str) -> BTreeSet<String> {
        let text = answer.to_lowercase();
        self.groups
            .iter()
            .filter(|g| g.mentioned_in(&text))
            .map(|g| g.label.to_string())
            .collect()
    }

    /// True if the topic's label or any of its synonyms is in the covered set.
    ///
    /// `topic` may be a canonical label or one of its synonyms. Unknown topics
    /// are only covered if present verbatim.
    pub fn is_covered(&self, topic: &str, covered: &BTreeSet<String>) -> bool {
        let topic = topic.trim().to_lowercase();
        match self.group_for(&topic) {
            Some(group) => {
                covered.contains(group.label)
                    || group.synonyms.iter().any(|s| covered.contains(*s))
            }
            None => covered.contains(&topic),
        }
    }

    pub fn coverage(&self, covered: &BTreeSet<String>) -> TopicCoverage {
        let (hit, miss): (Vec<&str>, Vec<&str>) = self
            .essential
            .iter()
            .copied()
            .partition(|t| self.is_covered(t, covered));

        let percentage = if self.essential.is_empty() {
            100
        } else {
            (hit.len() as f64 / self.essential.len() as f64 * 100.0).round() as u32
        };

        TopicCoverage {
            percentage,
            covered: hit.into_iter().map(str::to_string).collect(),
            missing: miss.into_iter().map(str::to_string).collect(),
        }
    }

    /// Resolve a label or synonym to its group
    pub fn group_for(&self, topic: &str) -> Option<&TopicGroup> {
        self.groups.iter().find(|g| g.names(topic))
    }
}
