use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A function definition recovered from C-like source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFunction {
    pub id: String,
    pub function_name: String,
    /// Verbatim signature and body.
    pub content: String,
    pub parameters: Vec<String>,
    pub return_type: String,
    pub file_path: String,
    /// 1-based line of the first signature token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    /// 1-based line of the closing brace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

impl SourceFunction {
    /// Text handed to the embedding provider for this function.
    pub fn embedding_text(&self) -> &str {
        &self.content
    }
}

/// Deterministic id derived from the file path and function name.
pub fn function_id(file_path: &str, function_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"|");
    hasher.update(function_name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_id_is_deterministic_and_path_scoped() {
        let a = function_id("src/nvs.c", "NVS_open");
        assert_eq!(a, function_id("src/nvs.c", "NVS_open"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, function_id("src/other.c", "NVS_open"));
        assert_ne!(a, function_id("src/nvs.c", "NVS_close"));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let f = SourceFunction {
            id: function_id("a.c", "add"),
            function_name: "add".to_string(),
            content: "int add(int a, int b) { return a + b; }".to_string(),
            parameters: vec!["int a".to_string(), "int b".to_string()],
            return_type: "int".to_string(),
            file_path: "a.c".to_string(),
            start_line: Some(1),
            end_line: None,
        };
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["functionName"], "add");
        assert_eq!(json["returnType"], "int");
        assert_eq!(json["startLine"], 1);
        assert!(json.get("endLine").is_none());
    }
}
