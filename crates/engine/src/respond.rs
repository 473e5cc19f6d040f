use cadence_core::domain::conversation::{Conversation, ConversationOutcome};
use cadence_core::domain::message::Message;

/// What the generator wants done with an inbound message. `should_escalate`
/// wins over everything else: no reply is sent and the conversation is handed
/// to a human.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedReply {
    pub text: String,
    pub should_escalate: bool,
    pub escalation_reason: Option<String>,
    pub outcome: Option<ConversationOutcome>,
    pub next_step: Option<i64>,
}

#[async_trait::async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate_reply(
        &self,
        conversation: &Conversation,
        history: &[Message],
        inbound_text: &str,
    ) -> GeneratedReply;
}

const ESCALATION_KEYWORDS: &[&str] =
    &["human", "real person", "advisor", "manager", "complaint", "lawyer"];

const NOT_INTERESTED_KEYWORDS: &[&str] =
    &["not interested", "no thanks", "stop", "unsubscribe", "leave me alone"];

/// Deterministic scripted responder: walks a fixed sequence of step replies,
/// escalates on keywords, and closes out contacts who opt out. Default wiring
/// and the reference implementation for tests.
pub struct ScriptedResponder {
    steps: Vec<String>,
}

impl ScriptedResponder {
    pub fn new(steps: Vec<String>) -> Self {
        Self { steps }
    }
}

impl Default for ScriptedResponder {
    fn default() -> Self {
        Self::new(vec![
            "Thanks for getting back to us! Is this still a good time to talk about your request?"
                .to_string(),
            "Great. Would you prefer a morning or an afternoon call with one of our advisors?"
                .to_string(),
            "Perfect, I have booked that in. You will receive a confirmation shortly.".to_string(),
        ])
    }
}

#[async_trait::async_trait]
impl ResponseGenerator for ScriptedResponder {
    async fn generate_reply(
        &self,
        conversation: &Conversation,
        _history: &[Message],
        inbound_text: &str,
    ) -> GeneratedReply {
        let lowered = inbound_text.to_lowercase();

        if let Some(keyword) =
            ESCALATION_KEYWORDS.iter().find(|keyword| lowered.contains(*keyword))
        {
            return GeneratedReply {
                text: String::new(),
                should_escalate: true,
                escalation_reason: Some(format!("contact mentioned \"{keyword}\"")),
                outcome: None,
                next_step: None,
            };
        }

        if NOT_INTERESTED_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            return GeneratedReply {
                text: "Understood, we will not contact you again. Have a great day!".to_string(),
                should_escalate: false,
                escalation_reason: None,
                outcome: Some(ConversationOutcome::NotInterested),
                next_step: None,
            };
        }

        // current_step is 1-based; past the end of the script we keep
        // repeating the final step.
        let index = usize::try_from(conversation.current_step.max(1) - 1).unwrap_or(0);
        let index = index.min(self.steps.len().saturating_sub(1));
        let text = self.steps.get(index).cloned().unwrap_or_default();
        let at_final_step = index + 1 >= self.steps.len();

        GeneratedReply {
            text,
            should_escalate: false,
            escalation_reason: None,
            outcome: if at_final_step {
                Some(ConversationOutcome::Booked)
            } else {
                Some(ConversationOutcome::Qualified)
            },
            next_step: Some((index as i64 + 2).min(self.steps.len() as i64)),
        }
    }
}
