pub mod image;
pub mod job;
pub mod job_log;
pub mod request;
