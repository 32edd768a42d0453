//! GitHub Actions source plugin: workflow runs, their jobs and the
//! repository board.

pub mod models;
pub mod plugin;
pub mod tasks;

pub use models::{GithubJob, GithubRepo, GithubRun};
pub use plugin::GithubPlugin;
pub use tasks::{new_api_client, GithubApiParams, GithubOptions, GithubTaskData};
