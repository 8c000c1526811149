//! Built-in agents.
//!
//! | Agent | Stages | Output |
//! |-------|--------|--------|
//! | `niche_analysis` | grounded research, then deep structuring | object |
//! | `persona` | fast | object |
//! | `ad_copy` | fast | array |
//! | `strategy_summary` | deep | text |

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use stratagem_core::{ModelClass, SchemaDescriptor};

use crate::error::AgentError;
use crate::pipeline::{field, Payload, Pipeline, Stage};

const MARKETER: &str = "You are a senior growth marketer. Be concrete, cite numbers where \
you have them, and never invent facts about the business.";

const STRUCTURED: &str = "Answer with JSON only, matching the requested schema. \
Do not wrap it in prose.";

/// Every agent the gateway knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    NicheAnalysis,
    Persona,
    AdCopy,
    StrategySummary,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        Self::NicheAnalysis,
        Self::Persona,
        Self::AdCopy,
        Self::StrategySummary,
    ];

    pub const fn id(self) -> &'static str {
        match self {
            Self::NicheAnalysis => "niche_analysis",
            Self::Persona => "persona",
            Self::AdCopy => "ad_copy",
            Self::StrategySummary => "strategy_summary",
        }
    }

    /// Stage list and output shape for this agent.
    pub fn pipeline(self) -> Pipeline {
        match self {
            Self::NicheAnalysis => Pipeline::new(
                Stage::initial(ModelClass::Grounded, niche_research_prompt)
                    .with_system_instruction(MARKETER),
            )
            .then(
                Stage::refine(ModelClass::Deep, niche_structure_prompt)
                    .with_system_instruction(STRUCTURED),
            )
            .with_output_schema(niche_schema()),
            Self::Persona => Pipeline::new(
                Stage::initial(ModelClass::Fast, persona_prompt).with_system_instruction(STRUCTURED),
            )
            .with_output_schema(persona_schema()),
            Self::AdCopy => Pipeline::new(
                Stage::initial(ModelClass::Fast, ad_copy_prompt).with_system_instruction(STRUCTURED),
            )
            .with_output_schema(ad_copy_schema()),
            Self::StrategySummary => Pipeline::new(
                Stage::initial(ModelClass::Deep, strategy_summary_prompt)
                    .with_system_instruction(MARKETER),
            ),
        }
    }
}

impl Display for AgentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == value.trim())
            .ok_or_else(|| AgentError::UnknownAgent(value.to_string()))
    }
}

fn business_brief(payload: &Payload) -> String {
    format!(
        "Business: {}\nIndustry: {}\nLocation: {}\nTarget audience: {}\nGoals: {}",
        field(payload, "businessName"),
        field(payload, "industry"),
        field(payload, "location"),
        field(payload, "targetAudience"),
        field(payload, "goals"),
    )
}

fn niche_research_prompt(payload: &Payload) -> String {
    format!(
        "Research the market niche for the business below using current web sources.\n\
         Cover demand signals, direct competitors and their positioning, typical pricing, \
         and underserved customer segments.\n\n{}",
        business_brief(payload)
    )
}

fn niche_structure_prompt(payload: &Payload, research: &str) -> String {
    format!(
        "Turn the market research below into a structured niche analysis for {}.\n\
         Keep every competitor and figure the research mentions.\n\n\
         RESEARCH:\n{research}",
        field(payload, "businessName"),
    )
}

fn persona_prompt(payload: &Payload) -> String {
    format!(
        "Create one detailed buyer persona for the business below.\n\
         Niche notes: {}\n\n{}",
        field(payload, "nicheSummary"),
        business_brief(payload)
    )
}

fn ad_copy_prompt(payload: &Payload) -> String {
    format!(
        "Write three ad variations for {} on {}.\n\
         Tone: {}\nOffer: {}\nPersona: {}\n\n{}",
        field(payload, "businessName"),
        field(payload, "platforms"),
        field(payload, "tone"),
        field(payload, "offer"),
        field(payload, "persona"),
        business_brief(payload)
    )
}

fn strategy_summary_prompt(payload: &Payload) -> String {
    format!(
        "Write an executive marketing strategy summary in plain prose (no lists longer than \
         five items) for the business below.\n\
         Niche analysis: {}\nPersona: {}\nBudget: {}\n\n{}",
        field(payload, "nicheSummary"),
        field(payload, "persona"),
        field(payload, "budget"),
        business_brief(payload)
    )
}

fn niche_schema() -> SchemaDescriptor {
    SchemaDescriptor::object()
        .field("summary", SchemaDescriptor::String)
        .field("marketSize", SchemaDescriptor::String)
        .field(
            "competitors",
            SchemaDescriptor::array_of(
                SchemaDescriptor::object()
                    .field("name", SchemaDescriptor::String)
                    .field("positioning", SchemaDescriptor::String),
            ),
        )
        .field(
            "opportunities",
            SchemaDescriptor::array_of(SchemaDescriptor::String),
        )
        .optional("risks", SchemaDescriptor::array_of(SchemaDescriptor::String))
}

fn persona_schema() -> SchemaDescriptor {
    SchemaDescriptor::object()
        .field("name", SchemaDescriptor::String)
        .field("age", SchemaDescriptor::Integer)
        .field("occupation", SchemaDescriptor::String)
        .field("goals", SchemaDescriptor::array_of(SchemaDescriptor::String))
        .field(
            "painPoints",
            SchemaDescriptor::array_of(SchemaDescriptor::String),
        )
        .field(
            "channels",
            SchemaDescriptor::array_of(SchemaDescriptor::String),
        )
}

fn ad_copy_schema() -> SchemaDescriptor {
    SchemaDescriptor::array_of(
        SchemaDescriptor::object()
            .field("platform", SchemaDescriptor::String)
            .field("headline", SchemaDescriptor::String)
            .field("body", SchemaDescriptor::String)
            .field("callToAction", SchemaDescriptor::String),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ids_parse_back_to_their_kind() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.id().parse::<AgentKind>().expect("known id"), kind);
        }
    }

    #[test]
    fn unknown_id_is_a_caller_error() {
        let error = "poem_writer".parse::<AgentKind>().expect_err("unknown");
        assert!(matches!(error, AgentError::UnknownAgent(id) if id == "poem_writer"));
    }

    #[test]
    fn niche_analysis_is_two_stage_ending_deep() {
        let pipeline = AgentKind::NicheAnalysis.pipeline();
        assert_eq!(pipeline.stages().len(), 2);
        assert_eq!(pipeline.stages()[0].model_class, ModelClass::Grounded);
        assert_eq!(pipeline.model_class(), ModelClass::Deep);
        assert!(pipeline.output_schema().is_some());
    }

    #[test]
    fn structured_agents_never_end_on_a_grounded_stage() {
        for kind in AgentKind::ALL {
            let pipeline = kind.pipeline();
            if pipeline.output_schema().is_some() {
                assert_ne!(pipeline.model_class(), ModelClass::Grounded, "{kind}");
            }
        }
    }

    #[test]
    fn strategy_summary_has_no_schema() {
        assert!(AgentKind::StrategySummary.pipeline().output_schema().is_none());
    }

    #[test]
    fn prompts_mark_missing_fields() {
        let payload = json!({"businessName": "Lagos Bakes"})
            .as_object()
            .cloned()
            .expect("object");
        let prompt = persona_prompt(&payload);

        assert!(prompt.contains("Business: Lagos Bakes"));
        assert!(prompt.contains("Industry: (not provided)"));
    }
}
