pub mod job;
pub mod submission;
pub mod verdict;
