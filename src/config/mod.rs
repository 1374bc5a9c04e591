// Application configuration

pub mod app;
pub mod rules;

pub use app::AppConfig;
pub use rules::load_form_rules;
