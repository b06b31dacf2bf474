//! Chat assistant: AI recommendations over the active catalog plus the
//! category-subscription suggestion.

use crate::ingest::providers::gemini::GeminiClient;
use crate::model::{EventRecord, UserPreferences};

pub const UNAVAILABLE_REPLY: &str =
    "Recommendation service is currently unavailable. Please check API configuration.";
pub const ERROR_REPLY: &str =
    "I'm having a bit of trouble connecting to my knowledge base. Please try again in a moment.";

const SYSTEM_PROMPT: &str = "You are a helpful local event expert. You recommend events based on a provided list and user preferences.";

fn build_prompt(message: &str, events: &[EventRecord], city: &str) -> String {
    let listing = events
        .iter()
        .map(|e| format!("{} at {} on {}", e.title, e.venue_name, e.date_time))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The user wants event recommendations in {city}.\nAvailable Events:\n{listing}\n\n\
         User Prompt: \"{message}\"\n\n\
         Based on the available events and the user's preferences, provide a friendly \
         recommendation. If no events match perfectly, suggest the closest ones. Be concise and helpful."
    )
}

/// Ask the AI for a recommendation. Never fails: errors become a fixed reply.
pub async fn recommend(
    client: Option<&GeminiClient>,
    message: &str,
    events: &[EventRecord],
    city: &str,
) -> String {
    let Some(client) = client else {
        return UNAVAILABLE_REPLY.to_string();
    };
    match client
        .generate(&build_prompt(message, events, city), Some(SYSTEM_PROMPT), None)
        .await
    {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!(error = ?e, model = client.model(), "recommendation call failed");
            ERROR_REPLY.to_string()
        }
    }
}

/// First catalog category mentioned in `message` that the user is not yet
/// subscribed to.
pub fn suggest_subscription(
    message: &str,
    events: &[EventRecord],
    prefs: &UserPreferences,
) -> Option<String> {
    let lower = message.to_lowercase();
    crate::admin::categories(events)
        .into_iter()
        .filter(|c| !prefs.categories.contains(c))
        .find(|c| lower.contains(&c.to_lowercase()))
}

pub fn subscription_prompt(category: &str) -> String {
    format!("I can notify you whenever new {category} events are added. Would you like to subscribe?")
}
