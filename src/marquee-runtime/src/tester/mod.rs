//! Conformance testing of provider APIs.

mod cases;
mod result;
mod runner;
mod stage;

pub use cases::TestCase;
pub use result::{ProviderTestCaseResult, ProviderTestResult, TestStatus};
pub use runner::{ProviderTester, TesterError};
pub use stage::{TestJobState, TestStage};
