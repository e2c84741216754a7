//! Goal decomposition.
//!
//! A [`DecompositionProvider`] turns a free-text goal into an ordered list
//! of [`CandidateTask`]s. The bundled [`KeywordDecomposer`] matches the goal
//! against a handful of category patterns; any provider can be swapped in.
//! [`fallback_plan`] is the fixed plan used when a provider fails.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::Priority;
use crate::error::{Error, Result};

/// Title of the research task every plan starts with.
pub const RESEARCH_TITLE: &str = "Research and gather requirements";
/// Title of the human review task every plan ends with.
pub const REVIEW_TITLE: &str = "Review and approve plan";

/// One task proposed by a decomposition provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTask {
    pub title: String,
    pub description: String,
    /// Only a human can complete this task.
    pub needs_human: bool,
    /// Why a human is needed. Required when `needs_human` is set.
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Indices of earlier candidates in the same plan this one waits on.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl CandidateTask {
    pub fn autonomous(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            needs_human: false,
            blocked_reason: None,
            priority: Priority::default(),
            depends_on: Vec::new(),
        }
    }

    pub fn human(title: &str, description: &str, reason: &str) -> Self {
        Self {
            needs_human: true,
            blocked_reason: Some(reason.to_string()),
            ..Self::autonomous(title, description)
        }
    }

    pub fn after(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Source of task plans for a goal. May fail or hang; callers apply a
/// timeout and fall back to [`fallback_plan`].
#[async_trait]
pub trait DecompositionProvider: Send + Sync {
    async fn decompose(&self, goal: &str) -> Result<Vec<CandidateTask>>;
}

/// The minimal plan used when decomposition fails.
pub fn fallback_plan(goal: &str) -> Vec<CandidateTask> {
    vec![
        research_task(goal),
        CandidateTask::human(
            REVIEW_TITLE,
            &format!("Review the plan for: {}", goal),
            "Plan needs human approval before work continues",
        ),
    ]
}

/// Check the invariants every plan must hold.
///
/// At least one autonomous and one human-gated task, a reason on every
/// human-gated task, and dependencies that only point backwards.
pub fn validate_plan(plan: &[CandidateTask]) -> Result<()> {
    if !plan.iter().any(|c| !c.needs_human) {
        return Err(Error::Decomposition("plan has no autonomous task".to_string()));
    }
    if !plan.iter().any(|c| c.needs_human) {
        return Err(Error::Decomposition("plan has no human-gated task".to_string()));
    }
    for (i, candidate) in plan.iter().enumerate() {
        if candidate.title.trim().is_empty() {
            return Err(Error::Decomposition(format!("task {} has no title", i)));
        }
        let reason_missing = candidate
            .blocked_reason
            .as_deref()
            .map_or(true, |r| r.trim().is_empty());
        if candidate.needs_human && reason_missing {
            return Err(Error::Decomposition(format!(
                "human task '{}' has no reason",
                candidate.title
            )));
        }
        if let Some(bad) = candidate.depends_on.iter().find(|&&d| d >= i) {
            return Err(Error::Decomposition(format!(
                "task '{}' depends on later task {}",
                candidate.title, bad
            )));
        }
    }
    Ok(())
}

fn research_task(goal: &str) -> CandidateTask {
    CandidateTask::autonomous(
        RESEARCH_TITLE,
        &format!("Collect context and constraints for: {}", goal),
    )
    .with_priority(Priority::High)
}

struct Category {
    name: &'static str,
    pattern: Regex,
    tasks: fn() -> Vec<CandidateTask>,
}

fn category(
    name: &'static str,
    pattern: &str,
    tasks: fn() -> Vec<CandidateTask>,
) -> Result<Category> {
    let pattern = Regex::new(pattern)
        .map_err(|e| Error::Validation(format!("bad pattern for {}: {}", name, e)))?;
    Ok(Category { name, pattern, tasks })
}

/// Keyword-driven decomposition.
///
/// Emits the research task, the tasks of every matching category (each
/// depending on research), and the final human review. Goals that match
/// nothing get a generic execution task.
pub struct KeywordDecomposer {
    categories: Vec<Category>,
}

impl KeywordDecomposer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            categories: vec![
                category(
                    "marketing",
                    r"(?i)\b(market|marketing|launch|campaign|brand|promot\w*)\b",
                    marketing_tasks,
                )?,
                category(
                    "content",
                    r"(?i)\b(content|blog|write|writing|article|copy|newsletter|docs?)\b",
                    content_tasks,
                )?,
                category(
                    "development",
                    r"(?i)\b(build|develop|code|app|website|api|feature|software)\b",
                    development_tasks,
                )?,
                category(
                    "research",
                    r"(?i)\b(research|analy[sz]e|analysis|data|report|survey)\b",
                    analysis_tasks,
                )?,
                category(
                    "sales",
                    r"(?i)\b(sales?|sell|outreach|leads?|customers?|prospects?)\b",
                    sales_tasks,
                )?,
                category(
                    "hiring",
                    r"(?i)\b(hire|hiring|recruit\w*|candidates?|interview)\b",
                    hiring_tasks,
                )?,
            ],
        })
    }

    /// Names of the categories a goal matches, in declaration order.
    pub fn matching_categories(&self, goal: &str) -> Vec<&'static str> {
        self.categories
            .iter()
            .filter(|c| c.pattern.is_match(goal))
            .map(|c| c.name)
            .collect()
    }

    pub fn plan(&self, goal: &str) -> Vec<CandidateTask> {
        let mut plan = vec![research_task(goal)];

        let mut domain: Vec<CandidateTask> = self
            .categories
            .iter()
            .filter(|c| c.pattern.is_match(goal))
            .flat_map(|c| (c.tasks)())
            .collect();
        if domain.is_empty() {
            domain.push(CandidateTask::autonomous(
                "Execute the goal",
                &format!("Carry out the work for: {}", goal),
            ));
        }
        plan.extend(domain.into_iter().map(|t| t.after(0)));

        plan.push(CandidateTask::human(
            REVIEW_TITLE,
            &format!("Review the plan for: {}", goal),
            "Plan needs human approval",
        ));
        plan
    }
}

#[async_trait]
impl DecompositionProvider for KeywordDecomposer {
    async fn decompose(&self, goal: &str) -> Result<Vec<CandidateTask>> {
        if goal.trim().is_empty() {
            return Err(Error::Decomposition("empty goal".to_string()));
        }
        Ok(self.plan(goal))
    }
}

fn marketing_tasks() -> Vec<CandidateTask> {
    vec![
        CandidateTask::autonomous("Draft marketing strategy", "Positioning, audience and channels"),
        CandidateTask::human(
            "Approve marketing budget",
            "Confirm spend for the campaign",
            "Budget decisions need human approval",
        ),
    ]
}

fn content_tasks() -> Vec<CandidateTask> {
    vec![
        CandidateTask::autonomous("Outline content", "Structure and key points"),
        CandidateTask::autonomous("Write first draft", "Draft the content from the outline"),
    ]
}

fn development_tasks() -> Vec<CandidateTask> {
    vec![
        CandidateTask::autonomous("Draft technical design", "Components, interfaces and risks"),
        CandidateTask::human(
            "Provide access credentials",
            "Repository and environment access",
            "Credentials can only be supplied by a human",
        ),
    ]
}

fn analysis_tasks() -> Vec<CandidateTask> {
    vec![CandidateTask::autonomous(
        "Analyze findings",
        "Summarize collected data into a report",
    )]
}

fn sales_tasks() -> Vec<CandidateTask> {
    vec![
        CandidateTask::autonomous("Build prospect list", "Identify target accounts"),
        CandidateTask::human(
            "Approve outreach messaging",
            "Sign off on the outreach copy",
            "Customer-facing messaging needs human approval",
        ),
    ]
}

fn hiring_tasks() -> Vec<CandidateTask> {
    vec![
        CandidateTask::autonomous(
            "Write job description",
            "Role, responsibilities and requirements",
        ),
        CandidateTask::human(
            "Confirm compensation range",
            "Set the salary band for the role",
            "Compensation must be decided by a human",
        ),
    ]
}
