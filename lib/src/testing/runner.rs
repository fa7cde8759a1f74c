use super::{IntoTestResult, TestResult};

/// Run one test function, logging its name and outcome.
pub fn run_single_test<R: IntoTestResult>(name: &str, test: impl FnOnce() -> R) -> TestResult {
    crate::klog_debug!("TEST {} ...", name);
    let result = test().into_test_result();
    match result {
        TestResult::Pass => crate::klog_debug!("TEST {} ok", name),
        TestResult::Skipped => crate::klog_debug!("TEST {} skipped", name),
        TestResult::Fail => crate::klog_info!("TEST {} FAILED", name),
    }
    result
}
