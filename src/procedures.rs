//! Helpers for the procedure records the knowledge base returns.
//!
//! Search intents carry a list of procedure objects in `data.procedures`. The view layer
//! renders them as [`ProcedureSummary`] values and turns a click into a
//! follow-up turn built with [`detail_prompt`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static PROCEDURE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+\.\d+\b").expect("Invalid procedure code regex"));

const DETAIL_KEYWORDS: [&str; 8] = [
    "chi tiết",
    "thông tin",
    "hướng dẫn",
    "quy trình",
    "cách làm",
    "thủ tục",
    "giấy tờ",
    "hồ sơ",
];

const UNKNOWN: &str = "Không xác định";

/// Display fields of a procedure record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcedureSummary {
    pub code: String,
    pub title: String,
    pub description: String,
    pub department: String,
    pub level: String,
}

impl ProcedureSummary {
    /// Read a raw procedure object, filling display fallbacks for missing fields.
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str, fallback: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        Self {
            code: field("ma_hoso", "N/A"),
            title: field("ten_thutuc", "Không có tiêu đề"),
            description: field("mo_ta", ""),
            department: field("co_quan", UNKNOWN),
            level: field("cap_thuc_hien", UNKNOWN),
        }
    }

    /// All procedure records in a message payload, read from its
    /// `procedures` array. A bare array is accepted too; anything else yields
    /// nothing.
    pub fn list_from(data: Option<&Value>) -> Vec<Self> {
        let items = data.and_then(|data| match data.get("procedures") {
            Some(procedures) => procedures.as_array(),
            None => data.as_array(),
        });
        items
            .map(|items| items.iter().map(Self::from_value).collect())
            .unwrap_or_default()
    }
}

/// Prompt sent when the user picks a procedure from a result list.
pub fn detail_prompt(procedure_name: &str) -> String {
    format!("Chi tiết về thủ tục: {}", procedure_name)
}

/// First procedure code (e.g. `1.001`) mentioned in the text.
pub fn extract_procedure_code(text: &str) -> Option<&str> {
    PROCEDURE_CODE.find(text).map(|m| m.as_str())
}

/// Whether the text asks for the details of a procedure.
pub fn is_procedure_detail_query(text: &str) -> bool {
    let lower = text.to_lowercase();
    DETAIL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_fallbacks() {
        let summary = ProcedureSummary::from_value(&json!({
            "ma_hoso": "1.001612",
            "ten_thutuc": "Đăng ký thành lập doanh nghiệp tư nhân"
        }));
        assert_eq!(summary.code, "1.001612");
        assert_eq!(summary.title, "Đăng ký thành lập doanh nghiệp tư nhân");
        assert_eq!(summary.description, "");
        assert_eq!(summary.department, UNKNOWN);
        assert_eq!(summary.level, UNKNOWN);

        let empty = ProcedureSummary::from_value(&json!({}));
        assert_eq!(empty.code, "N/A");
        assert_eq!(empty.title, "Không có tiêu đề");
    }

    #[test]
    fn test_list_from_payload() {
        let data = json!({
            "procedures": [
                {"ma_hoso": "1.001", "ten_thutuc": "A"},
                {"ma_hoso": "2.002", "ten_thutuc": "B"}
            ]
        });
        let list = ProcedureSummary::list_from(Some(&data));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].code, "1.001");
        assert_eq!(list[1].title, "B");

        let bare = json!([{"ten_thutuc": "C"}]);
        assert_eq!(ProcedureSummary::list_from(Some(&bare))[0].title, "C");

        assert!(ProcedureSummary::list_from(Some(&json!({"x": 1}))).is_empty());
        assert!(ProcedureSummary::list_from(Some(&json!({"procedures": null}))).is_empty());
        assert!(ProcedureSummary::list_from(None).is_empty());
    }

    #[test]
    fn test_extract_procedure_code() {
        assert_eq!(extract_procedure_code("Thủ tục 1.001612 cần gì?"), Some("1.001612"));
        assert_eq!(extract_procedure_code("không có mã"), None);
    }

    #[test]
    fn test_detail_query_keywords() {
        assert!(is_procedure_detail_query("Cho tôi CHI TIẾT về hộ chiếu"));
        assert!(is_procedure_detail_query("Hồ sơ gồm những gì"));
        assert!(!is_procedure_detail_query("Xin chào"));
    }

    #[test]
    fn test_detail_prompt() {
        assert_eq!(detail_prompt("Cấp hộ chiếu"), "Chi tiết về thủ tục: Cấp hộ chiếu");
    }
}
