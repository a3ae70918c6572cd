
mod rate_limit_tests;
mod runtime_tests;
