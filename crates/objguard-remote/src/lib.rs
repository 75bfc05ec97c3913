pub mod client;
pub mod config;
pub mod error;
pub mod user;

pub use client::RemoteUserClient;
pub use config::RemoteOptions;
pub use error::RemoteUserError;
pub use user::UserRep;
