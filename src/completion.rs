//! Decides from payload shape alone whether a job has produced its result.
//!
//! The results endpoint has no explicit "done" flag: while a run is in
//! progress it answers `{"status": "pending"}` (or a progress object), and
//! once finished it answers the report itself.

use serde_json::{Map, Value};

use crate::models::JobKind;

const CONTAINER_KEYS: [&str; 2] = ["report", "data"];
const SUCCESS_STATUSES: [&str; 2] = ["completed", "done"];
const FAILURE_STATUSES: [&str; 2] = ["failed", "error"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Pending,
    Complete,
    /// The payload itself reports a terminal failure.
    Failed(String),
}

pub fn is_complete(kind: JobKind, payload: &Value) -> bool {
    detect(kind, payload) == Completion::Complete
}

pub fn detect(kind: JobKind, payload: &Value) -> Completion {
    let Some(object) = payload.as_object() else {
        return Completion::Pending;
    };

    let status = object
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase());

    if let Some(status) = status.as_deref() {
        if FAILURE_STATUSES.contains(&status) {
            return Completion::Failed(failure_message(object, status));
        }
    }

    let container = CONTAINER_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_object));

    if has_populated_list(kind, object) || container.is_some_and(|c| has_populated_list(kind, c))
    {
        return Completion::Complete;
    }

    // An empty report is a finished run that found nothing, unless the
    // transport says the run is still going.
    match (container, status.as_deref()) {
        (Some(_), None) => Completion::Complete,
        (Some(_), Some(status)) if SUCCESS_STATUSES.contains(&status) => Completion::Complete,
        _ => Completion::Pending,
    }
}

fn list_keys(kind: JobKind) -> &'static [&'static str] {
    match kind {
        JobKind::FindIssues => &["findings", "findings_by_file"],
        JobKind::CatalogAi => &["inventory_by_file"],
    }
}

fn has_populated_list(kind: JobKind, object: &Map<String, Value>) -> bool {
    list_keys(kind).iter().any(|key| match object.get(*key) {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(entries)) => !entries.is_empty(),
        _ => false,
    })
}

fn failure_message(object: &Map<String, Value>, status: &str) -> String {
    ["error", "message", "detail"]
        .iter()
        .find_map(|key| match object.get(*key) {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Some(Value::Object(inner)) => inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(|| format!("job reported status {status}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn pending_placeholder_keeps_polling() {
        for kind in JobKind::ALL {
            assert_eq!(detect(kind, &json!({"status": "pending"})), Completion::Pending);
            assert_eq!(detect(kind, &json!({"status": "running", "progress": 40})), Completion::Pending);
            assert_eq!(detect(kind, &json!({})), Completion::Pending);
            assert_eq!(detect(kind, &Value::Null), Completion::Pending);
            assert_eq!(detect(kind, &json!([1, 2])), Completion::Pending);
        }
    }

    #[test]
    fn findings_report_is_complete() {
        let payload = json!({"report": {"findings": [{"owasp_id": "A03", "severity": "high"}]}});
        assert!(is_complete(JobKind::FindIssues, &payload));

        let bare = json!({"run_id": "J1", "findings": [{"owasp_id": "A01"}]});
        assert!(is_complete(JobKind::FindIssues, &bare));

        let by_file = json!({"findings_by_file": {"app.py": [{"owasp_id": "A01"}]}});
        assert!(is_complete(JobKind::FindIssues, &by_file));
    }

    #[test]
    fn catalog_inventory_is_complete() {
        let payload = json!({"data": {"inventory_by_file": [{"file_path": "agent.py"}]}});
        assert!(is_complete(JobKind::CatalogAi, &payload));

        let top_level = json!({"inventory_by_file": [{"file_path": "agent.py"}]});
        assert!(is_complete(JobKind::CatalogAi, &top_level));
    }

    #[test]
    fn lists_of_the_other_kind_do_not_count() {
        let findings = json!({"status": "running", "findings": [{"owasp_id": "A01"}]});
        assert!(!is_complete(JobKind::CatalogAi, &findings));

        let inventory = json!({"status": "running", "inventory_by_file": [{"file_path": "a.py"}]});
        assert!(!is_complete(JobKind::FindIssues, &inventory));
    }

    #[test]
    fn empty_report_is_complete_without_running_status() {
        let clean_scan = json!({"report": {"findings": [], "summary": {"total_findings": 0}}});
        assert!(is_complete(JobKind::FindIssues, &clean_scan));

        let done = json!({"status": "completed", "report": {"findings": []}});
        assert!(is_complete(JobKind::FindIssues, &done));

        let legacy_done = json!({"status": "done", "data": {"inventory_by_file": []}});
        assert!(is_complete(JobKind::CatalogAi, &legacy_done));
    }

    #[test]
    fn empty_report_with_active_status_keeps_polling() {
        let partial = json!({"status": "running", "report": {"findings": []}});
        assert_eq!(detect(JobKind::FindIssues, &partial), Completion::Pending);

        let null_container = json!({"report": null, "data": null});
        assert_eq!(detect(JobKind::FindIssues, &null_container), Completion::Pending);

        let empty_list = json!({"findings": []});
        assert_eq!(detect(JobKind::FindIssues, &empty_list), Completion::Pending);
    }

    #[test]
    fn populated_report_wins_over_stale_status() {
        let payload = json!({"status": "running", "report": {"findings": [{"owasp_id": "A05"}]}});
        assert!(is_complete(JobKind::FindIssues, &payload));
    }

    #[test]
    fn failure_status_is_reported_with_message() {
        assert_eq!(
            detect(JobKind::CatalogAi, &json!({"status": "error", "error": "path not found"})),
            Completion::Failed("path not found".to_string())
        );
        assert_eq!(
            detect(JobKind::FindIssues, &json!({"status": "FAILED"})),
            Completion::Failed("job reported status failed".to_string())
        );
        assert_eq!(
            detect(
                JobKind::FindIssues,
                &json!({"status": "failed", "error": {"code": "E1", "message": "crashed"}})
            ),
            Completion::Failed("crashed".to_string())
        );
    }
}
