//! Prompt builders for the budget-planner delegate calls
//!
//! Three prompts per run: a sufficiency probe, one scoring request per
//! batch of ideas, and a closing executive-summary request. Each asks
//! for a single JSON object in a documented shape.

use serde::Serialize;

use crate::db::schemas::{AllocationLine, Tier};

/// Display an amount in Crore (1 Cr = 10,000,000)
pub fn crore(amount: i64) -> String {
    format!("{:.2}", amount as f64 / 10_000_000.0)
}

/// Display an amount in Lakh (1 L = 100,000)
pub fn lakh(amount: i64) -> String {
    format!("{:.2}", amount as f64 / 100_000.0)
}

/// Compact projection of an idea sent to the delegate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactIdea {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    pub impact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    pub benefits: String,
    pub target_area: String,
}

fn render_ideas(ideas: &[CompactIdea]) -> String {
    serde_json::to_string_pretty(ideas).unwrap_or_else(|_| "[]".to_string())
}

/// Prompt asking whether the budget can cover the idea set at all
pub fn sufficiency_prompt(total_budget: i64, ideas: &[CompactIdea]) -> String {
    let sample_len = ideas.len().min(5);
    format!(
        r#"You are a government budget analyst. Quickly assess if the provided budget is sufficient for these approved civic innovation ideas.

TOTAL AVAILABLE BUDGET: Rs {crore} Crore

NUMBER OF IDEAS: {count}

SAMPLE IDEAS (first 5):
{sample}

TASK:
Analyze if the budget is sufficient. Consider:
- Number of ideas ({count})
- Typical costs for such projects
- Minimum viable implementation

OUTPUT ONLY VALID JSON:
{{
  "isSufficient": true_or_false,
  "estimatedMinimumBudget": number_in_rupees,
  "message": "brief_explanation"
}}"#,
        crore = crore(total_budget),
        count = ideas.len(),
        sample = render_ideas(&ideas[..sample_len]),
    )
}

/// Prompt scoring and allocating one batch of ideas
pub fn batch_prompt(batch: &[CompactIdea], total_budget: i64, batch_number: usize) -> String {
    format!(
        r#"You are an expert government budget analyst. Analyze these civic innovation ideas and allocate budget intelligently.

TOTAL AVAILABLE BUDGET: Rs {crore} Crore
BATCH: {batch_number}

IDEAS:
{ideas}

ANALYSIS CRITERIA:
1. Citizen Impact (40%): How many citizens benefit? Problem severity?
2. Feasibility (30%): Technical complexity, resource availability
3. Timeline (20%): Urgency and implementation speed
4. Innovation (10%): Uniqueness and scalability

TASK:
- Calculate REALISTIC budget for each idea (analyze actual requirements, NOT user estimates)
- Assign priority score (0-100)
- Provide brief justification (max 100 words)

OUTPUT ONLY VALID JSON:
{{
  "allocations": [
    {{
      "ideaId": "id",
      "allocatedBudget": number_in_rupees,
      "priorityScore": number_0_to_100,
      "priority": "High|Medium|Low",
      "justification": "brief_reason",
      "estimatedTimeline": "X months",
      "expectedROI": "High|Medium|Low"
    }}
  ]
}}"#,
        crore = crore(total_budget),
        batch_number = batch_number,
        ideas = render_ideas(batch),
    )
}

/// Prompt producing the executive summary and recommendations
pub fn summary_prompt(
    allocations: &[AllocationLine],
    total_budget: i64,
    allocated_budget: i64,
) -> String {
    let high = allocations.iter().filter(|a| a.priority == Tier::High).count();
    let medium = allocations
        .iter()
        .filter(|a| a.priority == Tier::Medium)
        .count();
    let low = allocations.iter().filter(|a| a.priority == Tier::Low).count();

    let top_three = allocations
        .iter()
        .take(3)
        .map(|a| {
            format!(
                "{}: Rs {} Lakh - {}",
                a.idea.to_hex(),
                lakh(a.allocated_budget),
                a.priority.as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Generate a brief executive summary for this budget allocation plan.

TOTAL BUDGET: Rs {total} Crore
ALLOCATED: Rs {allocated} Crore
IDEAS ANALYZED: {count}
HIGH PRIORITY: {high}
MEDIUM PRIORITY: {medium}
LOW PRIORITY: {low}

TOP 3 ALLOCATIONS:
{top_three}

Provide:
1. A 2-3 sentence summary
2. 3 key recommendations (one line each)

OUTPUT ONLY VALID JSON:
{{
  "summary": "brief_summary",
  "recommendations": ["rec1", "rec2", "rec3"]
}}"#,
        total = crore(total_budget),
        allocated = crore(allocated_budget),
        count = allocations.len(),
        high = high,
        medium = medium,
        low = low,
        top_three = top_three,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    fn compact(id: &str, title: &str) -> CompactIdea {
        CompactIdea {
            id: id.to_string(),
            title: title.to_string(),
            description: "A description".to_string(),
            category: "Education".to_string(),
            sub_category: None,
            impact: "District".to_string(),
            timeline: Some("6 months".to_string()),
            benefits: "Benefit one; Benefit two".to_string(),
            target_area: "Ward 12".to_string(),
        }
    }

    #[test]
    fn crore_and_lakh_display() {
        assert_eq!(crore(100_000_000), "10.00");
        assert_eq!(crore(25_000_000), "2.50");
        assert_eq!(lakh(9_000_000), "90.00");
        assert_eq!(lakh(150_000), "1.50");
    }

    #[test]
    fn sufficiency_prompt_samples_first_five() {
        let ideas: Vec<CompactIdea> = (0..8)
            .map(|i| compact(&format!("id-{i}"), &format!("Idea {i}")))
            .collect();
        let prompt = sufficiency_prompt(50_000_000, &ideas);

        assert!(prompt.contains("NUMBER OF IDEAS: 8"));
        assert!(prompt.contains("Idea 4"));
        assert!(!prompt.contains("Idea 5"));
        assert!(prompt.contains("\"isSufficient\""));
    }

    #[test]
    fn batch_prompt_names_batch_and_budget() {
        let ideas = vec![compact("a", "First"), compact("b", "Second")];
        let prompt = batch_prompt(&ideas, 100_000_000, 2);

        assert!(prompt.contains("BATCH: 2"));
        assert!(prompt.contains("Rs 10.00 Crore"));
        assert!(prompt.contains("\"ideaId\""));
        assert!(prompt.contains("First"));
    }

    #[test]
    fn summary_prompt_counts_tiers() {
        let line = |tier: Tier, amount: i64| AllocationLine {
            idea: ObjectId::new(),
            allocated_budget: amount,
            priority_score: 80.0,
            priority: tier,
            justification: "because".to_string(),
            estimated_timeline: None,
            expected_roi: None,
        };
        let allocations = vec![
            line(Tier::High, 9_000_000),
            line(Tier::High, 5_000_000),
            line(Tier::Low, 1_000_000),
        ];

        let prompt = summary_prompt(&allocations, 100_000_000, 15_000_000);
        assert!(prompt.contains("HIGH PRIORITY: 2"));
        assert!(prompt.contains("MEDIUM PRIORITY: 0"));
        assert!(prompt.contains("LOW PRIORITY: 1"));
        assert!(prompt.contains("IDEAS ANALYZED: 3"));
    }
}
