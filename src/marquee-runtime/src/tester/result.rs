use marquee_core::{ProviderError, ProviderMetadata};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Success,
    Failure,
    /// The provider reported that it does not support the capability.
    NotImplemented,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTestCaseResult {
    pub name: String,
    pub status: TestStatus,
    pub time_taken: Duration,
    pub short_log: String,
    pub full_log: Option<String>,
}

impl ProviderTestCaseResult {
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Running,
            time_taken: Duration::ZERO,
            short_log: String::new(),
            full_log: None,
        }
    }

    pub fn success(name: impl Into<String>, time_taken: Duration, short_log: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Success,
            time_taken,
            short_log: short_log.into(),
            full_log: None,
        }
    }

    /// Classifies a provider error: `NotImplemented` stays distinct from
    /// every other failure.
    pub fn from_error(name: impl Into<String>, time_taken: Duration, error: &ProviderError) -> Self {
        let status = if error.is_not_implemented() {
            TestStatus::NotImplemented
        } else {
            TestStatus::Failure
        };
        Self {
            name: name.into(),
            status,
            time_taken,
            short_log: error.to_string(),
            full_log: Some(format!("{error:?}")),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TestStatus::Success
    }
}

/// All case results for one provider, in the order they ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTestResult {
    pub provider: ProviderMetadata,
    pub outputs: Vec<ProviderTestCaseResult>,
}

impl ProviderTestResult {
    pub fn new(provider: ProviderMetadata) -> Self {
        Self {
            provider,
            outputs: Vec::new(),
        }
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.outputs.iter().filter(|o| o.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_implemented_is_distinct_from_failure() {
        let unsupported = ProviderTestCaseResult::from_error(
            "Filters",
            Duration::from_millis(3),
            &ProviderError::not_implemented("filters"),
        );
        assert_eq!(unsupported.status, TestStatus::NotImplemented);

        let broken = ProviderTestCaseResult::from_error(
            "Filters",
            Duration::from_millis(3),
            &ProviderError::Network {
                message: "reset".into(),
            },
        );
        assert_eq!(broken.status, TestStatus::Failure);
        assert_eq!(broken.short_log, "network error: reset");
        assert!(broken.full_log.unwrap().contains("Network"));
    }
}
