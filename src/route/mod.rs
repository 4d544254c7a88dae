pub mod attendance;
pub mod auth;
pub mod candidate;
pub mod company;
pub mod dashboard;
pub mod department;
pub mod employee;
pub mod goal;
pub mod interview;
pub mod invitation;
pub mod job_posting;
pub mod leave;
pub mod listing;
pub mod review;
pub mod user;
