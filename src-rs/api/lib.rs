pub mod handlers;
pub mod identity;
pub mod server;
pub mod stream;

pub use handlers::AppState;
pub use identity::CallerIdentity;
pub use server::RelayServer;
