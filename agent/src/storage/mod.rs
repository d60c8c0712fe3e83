//! Local storage: layout, settings and the JSON-file backed stores

pub mod deployments;
pub mod instance;
pub mod layout;
pub mod services;
pub mod settings;
pub mod table;
pub mod task_results;
