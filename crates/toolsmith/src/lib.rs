pub mod agent;
pub mod augmenter;
pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod protocol;
pub mod providers;
pub mod registry;
pub mod schema;
pub mod systems;
