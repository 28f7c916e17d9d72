mod helpers;

mod cancel_tests;
mod scheduler_tests;
