//! JSON wire shapes for the request/response queues. Kept separate from
//! `rankode_engine`'s domain types: the wire format has its own field names,
//! integer status codes, and an `order` the engine doesn't care about once
//! inputs are sorted.

use rankode_engine::{AttemptStatus, CaseStatus};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Clone)]
pub struct TestCase {
    pub id: i64,
    pub order: i32,
    pub input_file_name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Request {
    pub id: i64,
    pub language: String,
    pub code: String,
    pub memory_limit: i64,
    pub timeout: i64,
    pub max_output_size: i64,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub verification_file_name: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct TestResult {
    pub test_id: i64,
    pub status: i32,
    pub output: String,
    pub execution_time: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct Response {
    pub id: i64,
    pub status: i32,
    pub error: String,
    pub memory_usage: i64,
    pub tests: Vec<TestResult>,
}

pub fn attempt_status_code(status: AttemptStatus) -> i32 {
    match status {
        AttemptStatus::Successful => 0,
        AttemptStatus::BuildFailed => 1,
        AttemptStatus::RunFailed => 2,
        AttemptStatus::InternalError => 3,
    }
}

pub fn case_status_code(status: CaseStatus) -> i32 {
    match status {
        CaseStatus::Complete => 0,
        CaseStatus::CompilationError => 1,
        CaseStatus::RunningError => 2,
        CaseStatus::OutOfMemory => 3,
        CaseStatus::Timeout => 4,
        CaseStatus::OutputOverflow => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_status_codes_match_the_documented_table() {
        assert_eq!(attempt_status_code(AttemptStatus::Successful), 0);
        assert_eq!(attempt_status_code(AttemptStatus::BuildFailed), 1);
        assert_eq!(attempt_status_code(AttemptStatus::RunFailed), 2);
        assert_eq!(attempt_status_code(AttemptStatus::InternalError), 3);
    }

    #[test]
    fn case_status_codes_match_the_documented_table() {
        assert_eq!(case_status_code(CaseStatus::Complete), 0);
        assert_eq!(case_status_code(CaseStatus::CompilationError), 1);
        assert_eq!(case_status_code(CaseStatus::RunningError), 2);
        assert_eq!(case_status_code(CaseStatus::OutOfMemory), 3);
        assert_eq!(case_status_code(CaseStatus::Timeout), 4);
        assert_eq!(case_status_code(CaseStatus::OutputOverflow), 5);
    }

    #[test]
    fn request_deserializes_with_optional_verification_file() {
        let raw = r#"{"id":1,"language":"c","code":"int main(){}","memory_limit":1,
            "timeout":1,"max_output_size":1,"test_cases":[]}"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        assert!(request.verification_file_name.is_none());
    }
}
