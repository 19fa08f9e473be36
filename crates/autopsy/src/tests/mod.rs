mod helpers;

mod pattern_tests;
mod pipeline_tests;
mod role_tests;
