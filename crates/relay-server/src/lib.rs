pub mod error;
pub mod logging;
pub mod server;
pub mod state;
pub mod supervisor;
pub mod ws;

pub use logging::init_logging;
pub use server::{build_router, run_server};
pub use state::{connect_backend, gateway_config, AppState, Backend};
pub use supervisor::{supervise_bridge, RestartPolicy};
