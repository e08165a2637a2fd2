pub mod activation_api;
pub mod config;
pub mod screens;
pub mod state_file;

pub use activation_api::{ActivateError, ActivationClient, ActivationTask};
pub use config::{ClientArgs, ClientConfig, Command};
pub use screens::ActivationScreen;
pub use state_file::FileRepository;
