mod history_tests;
mod rate_limit_tests;
