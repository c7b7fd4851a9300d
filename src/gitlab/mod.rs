pub mod client;

pub use client::GitLabClient;
