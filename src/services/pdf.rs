//! PDF rendering and extraction
//!
//! Renders a budget allocation plan into a downloadable report and
//! pulls plain text out of uploaded policy PDFs. Extraction is
//! tolerant: an unreadable document yields no text rather than failing
//! the upload.

use std::collections::HashMap;
use std::io::BufWriter;

use bson::oid::ObjectId;
use chrono::Utc;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use tracing::warn;

use crate::db::schemas::BudgetAllocationDoc;
use crate::planner::{crore, lakh};
use crate::types::AppError;

/// Idea fields the report shows per allocation line
#[derive(Debug, Clone)]
pub struct IdeaRef {
    pub title: String,
    pub category: String,
}

/// Names and idea lookups resolved by the caller
#[derive(Debug, Default)]
pub struct ReportMeta {
    pub created_by: Option<String>,
    pub approved_by: Option<String>,
    pub ideas: HashMap<ObjectId, IdeaRef>,
}

/// Attachment filename for a rendered report
pub fn report_filename(fiscal_year: &str) -> String {
    format!(
        "Budget_Allocation_{}_{}.pdf",
        fiscal_year,
        Utc::now().timestamp_millis()
    )
}

/// Extract plain text from an uploaded PDF; unreadable input yields None
pub fn extract_pdf_text(bytes: &[u8]) -> Option<String> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to extract text from uploaded PDF");
            None
        }
    }
}

const PAGE_WIDTH: f64 = 210.0;
const PAGE_HEIGHT: f64 = 297.0;
const MARGIN: f64 = 20.0;
const PAGE_TOP: f64 = PAGE_HEIGHT - MARGIN;
const PAGE_BOTTOM: f64 = MARGIN;

fn mm(value: f64) -> Mm {
    Mm(value as _)
}

/// Render a plan into PDF bytes
pub fn render_allocation_report(
    plan: &BudgetAllocationDoc,
    meta: &ReportMeta,
) -> Result<Vec<u8>, AppError> {
    let (doc, first_page, first_layer) = PdfDocument::new(
        "Budget Allocation Report",
        mm(PAGE_WIDTH),
        mm(PAGE_HEIGHT),
        "Layer 1",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(render_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(render_error)?;

    {
        let mut writer = Writer {
            doc: &doc,
            layer: doc.get_page(first_page).get_layer(first_layer),
            regular,
            bold,
            y: PAGE_TOP,
        };

        writer.centered_title("Budget Allocation Report");
        writer.centered_line(&format!("Fiscal Year: {}", plan.fiscal_year));
        writer.centered_line(&format!("Generated: {}", Utc::now().format("%d/%m/%Y")));
        writer.gap(10.0);

        writer.heading("Executive Summary");
        writer.body(&plan.summary);
        writer.gap(6.0);

        writer.subheading("Budget Overview");
        writer.body(&format!("Total Budget: Rs {} Crore", crore(plan.total_budget)));
        writer.body(&format!("Allocated: Rs {} Crore", crore(plan.allocated_budget)));
        writer.body(&format!(
            "Contingency Reserve: Rs {} Crore",
            crore(plan.contingency_reserve)
        ));
        writer.body(&format!("Status: {}", plan.status.as_str()));
        writer.gap(6.0);

        if !plan.recommendations.is_empty() {
            writer.subheading("Key Recommendations");
            for (index, recommendation) in plan.recommendations.iter().enumerate() {
                writer.body(&format!("{}. {}", index + 1, recommendation));
            }
        }

        writer.new_page();
        writer.heading("Budget Allocations by Priority");
        writer.gap(4.0);

        let line_count = plan.allocations.len();
        for (index, line) in plan.allocations.iter().enumerate() {
            let idea = meta.ideas.get(&line.idea);
            let title = idea.map(|i| i.title.as_str()).unwrap_or("Idea");
            let category = idea.map(|i| i.category.as_str()).unwrap_or("Unknown");

            writer.entry_title(&format!("{}. {}", index + 1, title));
            writer.detail(&format!("Category: {}", category));
            writer.detail(&format!(
                "Priority: {} (Score: {}/100)",
                line.priority.as_str(),
                line.priority_score
            ));
            writer.detail(&format!(
                "Allocated Budget: Rs {} Lakh",
                lakh(line.allocated_budget)
            ));
            writer.detail(&format!(
                "Timeline: {}",
                line.estimated_timeline.as_deref().unwrap_or("TBD")
            ));
            writer.detail(&format!(
                "Expected ROI: {}",
                line.expected_roi.map(|t| t.as_str()).unwrap_or("N/A")
            ));
            writer.fine(&format!("Justification: {}", line.justification));
            writer.gap(6.0);

            // Four entries per page
            if (index + 1) % 4 == 0 && index + 1 < line_count {
                writer.new_page();
            }
        }

        let approval = match &meta.approved_by {
            Some(name) => format!("Approved by: {}", name),
            None => "Status: Draft".to_string(),
        };
        writer.footer(&format!(
            "Created by: {} | {}",
            meta.created_by.as_deref().unwrap_or("Admin"),
            approval
        ));
    }

    let mut buffer = BufWriter::new(Vec::new());
    doc.save(&mut buffer).map_err(render_error)?;
    buffer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to render PDF: {}", e)))
}

fn render_error(err: printpdf::Error) -> AppError {
    AppError::Internal(format!("Failed to render PDF: {}", err))
}

/// Break text on whitespace into lines of at most `width` characters
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Cursor-based page writer; y runs downward from the page top
struct Writer<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f64,
}

impl Writer<'_> {
    fn new_page(&mut self) {
        let (page, layer) = self
            .doc
            .add_page(mm(PAGE_WIDTH), mm(PAGE_HEIGHT), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_TOP;
    }

    fn ensure_room(&mut self, needed: f64) {
        if self.y - needed < PAGE_BOTTOM {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f64) {
        self.y -= height;
    }

    fn centered_title(&mut self, text: &str) {
        self.ensure_room(14.0);
        let x = centered_x(text, 4.2);
        self.layer
            .use_text(text, 24.0, mm(x), mm(self.y), &self.bold);
        self.y -= 12.0;
    }

    fn centered_line(&mut self, text: &str) {
        self.ensure_room(8.0);
        let x = centered_x(text, 2.1);
        self.layer
            .use_text(text, 12.0, mm(x), mm(self.y), &self.regular);
        self.y -= 6.0;
    }

    fn heading(&mut self, text: &str) {
        self.ensure_room(12.0);
        self.layer
            .use_text(text, 16.0, mm(MARGIN), mm(self.y), &self.bold);
        self.y -= 8.0;
    }

    fn subheading(&mut self, text: &str) {
        self.ensure_room(10.0);
        self.layer
            .use_text(text, 14.0, mm(MARGIN), mm(self.y), &self.bold);
        self.y -= 7.0;
    }

    fn entry_title(&mut self, text: &str) {
        self.ensure_room(9.0);
        for line in wrap_text(text, 80) {
            self.layer
                .use_text(line, 12.0, mm(MARGIN), mm(self.y), &self.bold);
            self.y -= 6.0;
        }
    }

    fn body(&mut self, text: &str) {
        for line in wrap_text(text, 88) {
            self.ensure_room(6.0);
            self.layer
                .use_text(line, 11.0, mm(MARGIN), mm(self.y), &self.regular);
            self.y -= 5.0;
        }
    }

    fn detail(&mut self, text: &str) {
        for line in wrap_text(text, 96) {
            self.ensure_room(6.0);
            self.layer
                .use_text(line, 10.0, mm(MARGIN), mm(self.y), &self.regular);
            self.y -= 4.5;
        }
    }

    fn fine(&mut self, text: &str) {
        for line in wrap_text(text, 107) {
            self.ensure_room(5.0);
            self.layer
                .use_text(line, 9.0, mm(MARGIN), mm(self.y), &self.regular);
            self.y -= 4.0;
        }
    }

    fn footer(&mut self, text: &str) {
        self.layer
            .use_text(text, 9.0, mm(MARGIN), mm(12.0), &self.regular);
    }
}

fn centered_x(text: &str, char_width: f64) -> f64 {
    let width = text.chars().count() as f64 * char_width;
    ((PAGE_WIDTH - width) / 2.0).max(MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{AllocationLine, PlanStatus, Tier};

    #[test]
    fn wrap_text_splits_on_word_boundaries() {
        let lines = wrap_text("one two three four five", 9);
        assert_eq!(lines, vec!["one two", "three", "four five"]);
    }

    #[test]
    fn wrap_text_keeps_short_text_whole() {
        assert_eq!(wrap_text("short", 80), vec!["short"]);
        assert_eq!(wrap_text("", 80), vec![""]);
    }

    #[test]
    fn report_filename_carries_fiscal_year() {
        let name = report_filename("2026");
        assert!(name.starts_with("Budget_Allocation_2026_"));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn renders_a_pdf_document() {
        let plan = BudgetAllocationDoc {
            _id: Some(ObjectId::new()),
            total_budget: 100_000_000,
            allocated_budget: 90_000_000,
            contingency_reserve: 10_000_000,
            allocations: vec![AllocationLine {
                idea: ObjectId::new(),
                allocated_budget: 9_000_000,
                priority_score: 85.0,
                priority: Tier::High,
                justification: "High impact on daily commuters across the district".to_string(),
                estimated_timeline: Some("6 months".to_string()),
                expected_roi: Some(Tier::High),
            }],
            summary: "A balanced allocation favoring infrastructure.".to_string(),
            recommendations: vec!["Start with the highest scored projects".to_string()],
            status: PlanStatus::Draft,
            created_by: ObjectId::new(),
            fiscal_year: "2026".to_string(),
            ..Default::default()
        };
        let meta = ReportMeta::default();

        let bytes = render_allocation_report(&plan, &meta).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.len() > 500);
    }

    #[test]
    fn unreadable_pdf_yields_no_text() {
        assert!(extract_pdf_text(b"definitely not a pdf").is_none());
    }
}
