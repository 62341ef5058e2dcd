pub mod attendance;
pub mod auth;
pub mod certificates;
pub mod class_groups;
pub mod core;
pub mod lessons;
pub mod projects;
pub mod sessions;
pub mod students;
