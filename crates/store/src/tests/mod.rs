mod helpers;
mod key_tests;
mod worker_tests;
mod write_tests;
