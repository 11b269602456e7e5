use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::WorkflowError;

#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "AnchorDateType")]
    pub anchor_date_type: String,
    #[serde(rename = "StartOffsetDays")]
    pub start_offset_days: i64,
    #[serde(rename = "DurationBusinessDays", default)]
    pub duration_business_days: i64,
    #[serde(rename = "DefaultRole", default)]
    pub default_role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowTemplate {
    #[serde(rename = "WorkflowId")]
    pub workflow_id: String,
    #[serde(rename = "Activities", default)]
    pub activities: Vec<Activity>,
}

/// Ordered `(Category, AnchorDateType) -> index` map, built by first
/// occurrence in the template (spec.md §4.9). Also exposes a category-only
/// variant for deployments that don't need per-anchor gating.
pub struct CategoryOrder {
    by_category_and_anchor: HashMap<(String, String), usize>,
    by_category: HashMap<String, usize>,
}

impl CategoryOrder {
    pub fn from_template(template: &WorkflowTemplate) -> Self {
        let mut by_category_and_anchor = HashMap::new();
        let mut by_category = HashMap::new();

        for activity in &template.activities {
            let key = (activity.category.clone(), activity.anchor_date_type.clone());
            let next_index = by_category_and_anchor.len();
            by_category_and_anchor.entry(key).or_insert(next_index);

            let next_index = by_category.len();
            by_category.entry(activity.category.clone()).or_insert(next_index);
        }

        Self { by_category_and_anchor, by_category }
    }

    pub fn index_of(&self, category: &str, anchor_date_type: &str) -> Option<usize> {
        self.by_category_and_anchor.get(&(category.to_string(), anchor_date_type.to_string())).copied()
    }

    pub fn index_of_category(&self, category: &str) -> Option<usize> {
        self.by_category.get(category).copied()
    }

    /// The category immediately preceding `category` for the given anchor
    /// type, or `None` if `category` is first (or unknown).
    pub fn predecessor(&self, category: &str, anchor_date_type: &str) -> Option<&str> {
        let index = self.index_of(category, anchor_date_type)?;
        if index == 0 {
            return None;
        }
        self.by_category_and_anchor
            .iter()
            .find(|(_, &i)| i == index - 1)
            .map(|((cat, _), _)| cat.as_str())
    }
}

pub fn load_template(path: &Path) -> Result<WorkflowTemplate, WorkflowError> {
    let content = std::fs::read_to_string(path).map_err(WorkflowError::ReadFile)?;
    let template: WorkflowTemplate = serde_json::from_str(&content).map_err(WorkflowError::Parse)?;
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_template() -> WorkflowTemplate {
        WorkflowTemplate {
            workflow_id: "wf-1".to_string(),
            activities: vec![
                Activity {
                    category: "Kickoff".to_string(),
                    anchor_date_type: "GoLive".to_string(),
                    start_offset_days: -5,
                    duration_business_days: 2,
                    default_role: None,
                },
                Activity {
                    category: "Configuration".to_string(),
                    anchor_date_type: "GoLive".to_string(),
                    start_offset_days: -2,
                    duration_business_days: 3,
                    default_role: None,
                },
                Activity {
                    category: "Hypercare".to_string(),
                    anchor_date_type: "HypercareEnd".to_string(),
                    start_offset_days: 10,
                    duration_business_days: 5,
                    default_role: None,
                },
            ],
        }
    }

    #[test]
    fn builds_ordered_index_by_first_occurrence() {
        let order = CategoryOrder::from_template(&sample_template());
        assert_eq!(order.index_of("Kickoff", "GoLive"), Some(0));
        assert_eq!(order.index_of("Configuration", "GoLive"), Some(1));
        assert_eq!(order.index_of("Hypercare", "HypercareEnd"), Some(2));
        assert_eq!(order.index_of("Unknown", "GoLive"), None);
    }

    #[test]
    fn category_only_variant_ignores_anchor() {
        let order = CategoryOrder::from_template(&sample_template());
        assert_eq!(order.index_of_category("Kickoff"), Some(0));
        assert_eq!(order.index_of_category("Configuration"), Some(1));
    }

    #[test]
    fn predecessor_walks_back_one_step() {
        let order = CategoryOrder::from_template(&sample_template());
        assert_eq!(order.predecessor("Configuration", "GoLive"), Some("Kickoff"));
        assert_eq!(order.predecessor("Kickoff", "GoLive"), None);
        assert_eq!(order.predecessor("Hypercare", "HypercareEnd"), None);
    }

    #[test]
    fn load_template_parses_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(
            &path,
            r#"{"WorkflowId": "wf-1", "Activities": [{"Category": "Kickoff", "AnchorDateType": "GoLive", "StartOffsetDays": -5}]}"#,
        )
        .unwrap();

        let template = load_template(&path).unwrap();
        assert_eq!(template.workflow_id, "wf-1");
        assert_eq!(template.activities.len(), 1);
    }

    #[test]
    fn load_template_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_template(&path).is_err());
    }
}
