use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Directive appended to every request so the model keeps paragraph breaks
/// and drops stray markdown emphasis.
pub const FORMAT_DIRECTIVE: &str =
    "Keep appropriate paragraph breaks and remove any asterisk (*) markup.";

/// Appended to the phase-one request: ask for a plan, not a rewrite.
pub const REASONING_DIRECTIVE: &str = "Analyze what needs to be improved in this content and explain your \
optimization approach and plan. Summarize briefly how you will improve it instead of giving the improved \
content directly.";

/// Appended to the phase-two request: ask for the rewrite only.
pub const REWRITE_DIRECTIVE: &str = "Provide the optimized content with appropriate paragraph formatting, \
remove all asterisk (*) markup and keep the structure clear. Output only the optimized result, without \
explanations.";

const CUSTOM_FALLBACK: &str = "Please optimize this content based on custom instructions:";

/// The user-selected rewriting style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    #[default]
    Improve,
    Simplify,
    Persuasive,
    Professional,
    Creative,
    Custom,
}

/// Static text carried by each mode.
#[derive(Debug)]
pub struct ModeProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub instruction: &'static str,
    pub system_prompt: &'static str,
}

// Indexed by the enum discriminant; keep in declaration order.
static PROFILES: [ModeProfile; 6] = [
    ModeProfile {
        name: "improve",
        description: "General improvement for clarity and effectiveness",
        instruction: "Improve this content for clarity and effectiveness, maintaining the original intent and tone:",
        system_prompt: "You are a senior editor who spots weak phrasing, logical gaps and messy structure. \
Preserve the author's core intent while reorganizing paragraphs, tightening sentences and choosing better \
words so the piece reads clearly and persuasively. Keep paragraphs well separated and the key points prominent.",
    },
    ModeProfile {
        name: "simplify",
        description: "Make the content easier to understand",
        instruction: "Simplify this content to make it easier to understand, using plain language and shorter sentences:",
        system_prompt: "You are an expert at concise writing. Remove redundant words and repetition, replace \
long descriptions with short phrases, keep paragraphs compact, highlight the core points and drop minor \
details without losing professional depth. Aim to cut the length by roughly 30-40% while keeping the \
original value and information.",
    },
    ModeProfile {
        name: "persuasive",
        description: "Enhance persuasiveness and conversion potential",
        instruction: "Make this content more persuasive and compelling to drive action:",
        system_prompt: "You are a marketing copywriter who writes persuasive, engaging content. You know how \
to use emotional triggers, social proof and action-oriented language to move readers to act. Keep paragraphs \
clear and make the core selling points stand out.",
    },
    ModeProfile {
        name: "professional",
        description: "Refine for a professional, business context",
        instruction: "Refine this content for a professional business context, ensuring it's polished and formal:",
        system_prompt: "You are a business writing expert. Your prose is concise, precise and logical, uses \
appropriate business terminology and keeps a professional tone. Keep paragraphs clear and emphasize logic \
and authority.",
    },
    ModeProfile {
        name: "creative",
        description: "Make the content more engaging and creative",
        instruction: "Make this content more creative, engaging, and memorable:",
        system_prompt: "You are a creative writer who produces vivid, imaginative content with fresh \
phrasing and unusual angles that readers remember. Keep paragraphs clear and stay creative without losing \
professionalism.",
    },
    ModeProfile {
        name: "custom",
        description: "Use your own custom prompt",
        instruction: CUSTOM_FALLBACK,
        system_prompt: "You are a highly adaptable copy expert who tailors style and tone to specific \
requirements. Keep paragraphs clear while meeting the client's particular instructions.",
    },
];

impl OptimizationMode {
    pub fn all() -> [OptimizationMode; 6] {
        [
            OptimizationMode::Improve,
            OptimizationMode::Simplify,
            OptimizationMode::Persuasive,
            OptimizationMode::Professional,
            OptimizationMode::Creative,
            OptimizationMode::Custom,
        ]
    }

    pub fn from_str_loose(s: &str) -> Result<Self, String> {
        let wanted = s.trim().to_lowercase();
        Self::all()
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| format!("Unknown optimization mode: {}", s))
    }

    pub fn profile(self) -> &'static ModeProfile {
        &PROFILES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }

    pub fn description(self) -> &'static str {
        self.profile().description
    }

    pub fn system_prompt(self) -> &'static str {
        self.profile().system_prompt
    }

    /// The instruction sentence prefixed to the user's content.
    ///
    /// For [`OptimizationMode::Custom`] the caller's text wins when it is
    /// non-blank; every other mode ignores `custom`.
    pub fn instruction(self, custom: Option<&str>) -> String {
        match (self, custom.map(str::trim)) {
            (OptimizationMode::Custom, Some(text)) if !text.is_empty() => text.to_string(),
            _ => self.profile().instruction.to_string(),
        }
    }
}

impl std::fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// User message for the non-streamed "explain your plan" request.
pub fn compose_reasoning_request(instruction: &str, content: &str) -> String {
    format!("{} {}\n\n{}\n\n{}", instruction, FORMAT_DIRECTIVE, content, REASONING_DIRECTIVE)
}

/// User message for the streamed rewrite request.
pub fn compose_rewrite_request(instruction: &str, content: &str) -> String {
    format!("{} {}\n\n{}\n\n{}", instruction, FORMAT_DIRECTIVE, content, REWRITE_DIRECTIVE)
}
