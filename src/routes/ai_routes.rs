//! AI-assist routes
//!
//! Public endpoints under `/api/ai` that explain policies to citizens:
//! cached summarization, single-turn grounded Q&A, and suggested
//! questions. Every prompt carries only the one policy's own text, and
//! the chat prompt instructs the model to decline questions the policy
//! cannot answer.

use std::sync::Arc;

use bson::{doc, DateTime};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db::schemas::{PolicyDoc, POLICY_COLLECTION};
use crate::routes::respond::{
    error_response, json_response, ok_data, parse_json_body, parse_object_id, wrap, BoxBody,
};
use crate::server::AppState;
use crate::types::AppError;

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    question: String,
}

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, rest: &str) -> Response<BoxBody> {
    let method = req.method().clone();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::POST, ["summarize", policy_id]) => {
            wrap(summarize(req, &state, policy_id).await)
        }
        (&Method::POST, ["chat", policy_id]) => wrap(chat(req, &state, policy_id).await),
        (&Method::GET, ["suggestions", policy_id]) => {
            wrap(suggestions(req, &state, policy_id).await)
        }
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

/// POST /api/ai/summarize/{policyId}
///
/// The first successful summary is stored on the policy; later calls
/// serve it without touching the model.
async fn summarize(
    _req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let id = parse_object_id(raw_id)?;
    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let policy = policies
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    if let Some(summary) = policy.summary.as_deref().filter(|s| !s.is_empty()) {
        return Ok(json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "data": { "summary": summary },
                "cached": true,
            }),
        ));
    }

    let prompt = summary_prompt(&policy);
    let summary = state.delegate.prompt(&prompt).await?;

    policies
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "summary": summary.as_str(),
                "metadata.updated_at": DateTime::now(),
            }},
        )
        .await?;
    info!(policy = raw_id, "policy summary generated");

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "data": { "summary": summary },
            "cached": false,
        }),
    ))
}

/// POST /api/ai/chat/{policyId}
async fn chat(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let id = parse_object_id(raw_id)?;
    let body: ChatBody = parse_json_body(req).await?;

    let question = body.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("Question is required".to_string()));
    }
    if !(5..=500).contains(&question.chars().count()) {
        return Err(AppError::Validation(
            "Question must be 5-500 characters".to_string(),
        ));
    }

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let policy = policies
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    let prompt = chat_prompt(&policy, question);
    let answer = state.delegate.prompt(&prompt).await?;

    Ok(ok_data(json!({
        "question": question,
        "answer": answer,
        "policyTitle": policy.title,
    })))
}

/// GET /api/ai/suggestions/{policyId}
async fn suggestions(
    _req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let id = parse_object_id(raw_id)?;
    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let policy = policies
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    let prompt = suggestions_prompt(&policy);
    let reply = state.delegate.prompt(&prompt).await?;
    let questions = split_questions(&reply);

    Ok(ok_data(json!({ "questions": questions })))
}

// ============================================================================
// Prompts
// ============================================================================

fn summary_prompt(policy: &PolicyDoc) -> String {
    format!(
        "You are a helpful AI assistant that explains government policies in simple, \
         easy-to-understand language.\n\n\
         Policy Title: {}\n\
         Category: {}\n\
         Full Description: {}\n\n\
         Please provide a concise, easy-to-understand summary of this policy in 2-3 \
         paragraphs. Use simple language that an average citizen can understand. Explain:\n\
         1. What this policy is about\n\
         2. Who it affects\n\
         3. What changes or actions it introduces\n\
         4. Why it matters to citizens\n\n\
         Keep it friendly and accessible.",
        policy.title, policy.category, policy.description
    )
}

fn chat_prompt(policy: &PolicyDoc, question: &str) -> String {
    let mut context = format!(
        "Title: {}\nCategory: {}\nDescription: {}",
        policy.title, policy.category, policy.description
    );
    if let Some(summary) = policy.summary.as_deref().filter(|s| !s.is_empty()) {
        context.push_str(&format!("\nSummary: {}", summary));
    }
    if let Some(date) = policy.effective_date {
        let formatted = date.to_chrono().format("%Y-%m-%d");
        context.push_str(&format!("\nEffective Date: {}", formatted));
    }

    format!(
        "You are a knowledgeable assistant helping citizens understand government \
         policies. Answer questions clearly and accurately based on the policy \
         information provided.\n\n\
         POLICY CONTEXT:\n{}\n\n\
         CITIZEN QUESTION: {}\n\n\
         Please provide a helpful, accurate answer based ONLY on the policy information \
         above. If the question cannot be answered from this policy, politely say so and \
         suggest contacting the relevant government office. Keep your answer concise and \
         easy to understand.",
        context, question
    )
}

fn suggestions_prompt(policy: &PolicyDoc) -> String {
    format!(
        "Based on this government policy, generate 5 common questions that citizens \
         might ask:\n\n\
         Policy Title: {}\n\
         Category: {}\n\
         Description: {}\n\n\
         Provide ONLY the questions, one per line, without numbering. Make them \
         practical and relevant to citizens' concerns.",
        policy.title, policy.category, policy.description
    )
}

// ============================================================================
// Helpers
// ============================================================================

/// One question per reply line, minus any numbering the model added
fn split_questions(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(strip_leading_number)
        .filter(|line| !line.is_empty())
        .take(5)
        .map(str::to_string)
        .collect()
}

fn strip_leading_number(line: &str) -> &str {
    let trimmed = line.trim();
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = trimmed[digits..].strip_prefix('.') {
            return rest.trim_start();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_suggestions_are_cleaned() {
        let reply = "1. What does this cost?\n\n2. Who qualifies?\nHow do I apply?\n";
        assert_eq!(
            split_questions(reply),
            vec![
                "What does this cost?".to_string(),
                "Who qualifies?".to_string(),
                "How do I apply?".to_string(),
            ]
        );
    }

    #[test]
    fn at_most_five_suggestions_survive() {
        let reply = "a\nb\nc\nd\ne\nf\ng";
        assert_eq!(split_questions(reply).len(), 5);
    }

    #[test]
    fn unnumbered_lines_pass_through() {
        assert_eq!(strip_leading_number("  Plain question  "), "Plain question");
        assert_eq!(strip_leading_number("2026 budget?"), "2026 budget?");
        assert_eq!(strip_leading_number("3. Numbered"), "Numbered");
    }

    #[test]
    fn chat_prompt_carries_optional_context() {
        let mut policy = PolicyDoc {
            title: "Clean Air Act".to_string(),
            category: "Environment".to_string(),
            description: "Reduces emissions.".to_string(),
            ..Default::default()
        };
        let bare = chat_prompt(&policy, "When does it start?");
        assert!(!bare.contains("Summary:"));
        assert!(!bare.contains("Effective Date:"));

        policy.summary = Some("Less smog.".to_string());
        policy.effective_date = Some(DateTime::from_millis(1_756_684_800_000));
        let full = chat_prompt(&policy, "When does it start?");
        assert!(full.contains("Summary: Less smog."));
        assert!(full.contains("Effective Date: "));
    }
}
