//! Built-in test harness.
//!
//! Suites compile into the subsystem crates behind the `itests` feature and
//! run inside the embedding kernel (or any host that registers a runtime
//! table): there is no hosted test runner in a freestanding build. Each
//! suite is a list of plain functions returning [`TestResult`] or a c-style
//! `i32` (0 = pass), wrapped by `define_test_suite!` into a runner the
//! embedder invokes.

pub mod harness;
mod runner;

mod assertions;
pub use harness::{TestRunSummary, TestSuiteDesc, TestSuiteResult, run_suites};
pub use runner::run_single_test;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skipped,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass | Self::Skipped)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Adapter so suites can mix `TestResult`-returning and `i32`-returning
/// (0 = pass) test functions.
pub trait IntoTestResult {
    fn into_test_result(self) -> TestResult;
}

impl IntoTestResult for TestResult {
    fn into_test_result(self) -> TestResult {
        self
    }
}

impl IntoTestResult for i32 {
    fn into_test_result(self) -> TestResult {
        if self == 0 {
            TestResult::Pass
        } else {
            TestResult::Fail
        }
    }
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($msg:expr) => {{
        $crate::klog_info!("TEST FAIL: {}", $msg);
        $crate::testing::TestResult::Fail
    }};
    ($fmt:expr, $($arg:tt)*) => {{
        $crate::klog_info!(concat!("TEST FAIL: ", $fmt), $($arg)*);
        $crate::testing::TestResult::Fail
    }};
}

#[macro_export]
macro_rules! run_test {
    ($passed:expr, $total:expr, $test_fn:expr) => {{
        $total += 1;
        let result = $crate::testing::run_single_test(stringify!($test_fn), || $test_fn());
        if result.is_pass() {
            $passed += 1;
        }
        result
    }};

    ($test_fn:expr) => {{ $crate::testing::run_single_test(stringify!($test_fn), || $test_fn()) }};
}

/// Define a suite from a list of test functions.
///
/// Expands to `run_<suite>_suite(&mut TestSuiteResult) -> i32` and a
/// `pub static <SUITE>_SUITE: TestSuiteDesc` the embedder collects.
#[macro_export]
macro_rules! define_test_suite {
    ($suite_name:ident, [$($test_fn:path),* $(,)?]) => {
        $crate::paste::paste! {
            pub fn [<run_ $suite_name _suite>](
                out: &mut $crate::testing::TestSuiteResult,
            ) -> i32 {
                let start_ms = $crate::clock::uptime_ms();
                let mut passed = 0u32;
                let mut total = 0u32;

                $(
                    $crate::run_test!(passed, total, $test_fn);
                )*

                let elapsed = $crate::clock::uptime_ms().saturating_sub(start_ms) as u32;
                out.name = stringify!($suite_name);
                out.fill(passed, total, elapsed);
                if passed == total { 0 } else { -1 }
            }

            pub static [<$suite_name:upper _SUITE>]: $crate::testing::TestSuiteDesc =
                $crate::testing::TestSuiteDesc {
                    name: stringify!($suite_name),
                    run: [<run_ $suite_name _suite>],
                };
        }
    };
}
